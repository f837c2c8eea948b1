use std::sync::LazyLock;

use regex::Regex;

use crate::persistence::truncate_with_ellipsis;

static LEADING_NOISE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\s\W]+").unwrap());

#[derive(Clone, Debug)]
pub struct TitleConfig {
    pub max_words: usize,
    pub max_chars: usize,
    /// Used when nothing usable is left after cleaning.
    pub fallback: String,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            max_words: 5,
            max_chars: 40,
            fallback: "New Conversation".to_string(),
        }
    }
}

/// Derives a short session title from the first message of a conversation.
#[derive(Clone, Debug, Default)]
pub struct TitleGenerator {
    config: TitleConfig,
}

impl TitleGenerator {
    pub fn new(config: TitleConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self, first_message: &str) -> String {
        let stripped = LEADING_NOISE.replace(first_message.trim(), "");
        let words: Vec<&str> = stripped.split_whitespace().take(self.config.max_words).collect();
        let title = truncate_with_ellipsis(&words.join(" "), self.config.max_chars);

        let mut chars = title.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => self.config.fallback.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_first_words_and_capitalizes() {
        let titles = TitleGenerator::default();
        assert_eq!(
            titles.generate("how do lifetimes work in async rust code?"),
            "How do lifetimes work in"
        );
    }

    #[test]
    fn strips_leading_punctuation() {
        let titles = TitleGenerator::default();
        assert_eq!(titles.generate("  ...¿ -- explain traits"), "Explain traits");
    }

    #[test]
    fn long_words_are_truncated() {
        let titles = TitleGenerator::default();
        let title = titles.generate("Pneumonoultramicroscopicsilicovolcanoconiosis is a long word");
        assert_eq!(title.chars().count(), 40);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn empty_or_symbol_only_falls_back() {
        let titles = TitleGenerator::default();
        assert_eq!(titles.generate(""), "New Conversation");
        assert_eq!(titles.generate("  ?!?  "), "New Conversation");
    }

    #[test]
    fn custom_config() {
        let titles = TitleGenerator::new(TitleConfig {
            max_words: 2,
            fallback: "Untitled".into(),
            ..Default::default()
        });
        assert_eq!(titles.generate("one two three"), "One two");
        assert_eq!(titles.generate("!!!"), "Untitled");
    }

    #[test]
    fn unicode_first_letter() {
        let titles = TitleGenerator::default();
        assert_eq!(titles.generate("élan vital"), "Élan vital");
    }
}
