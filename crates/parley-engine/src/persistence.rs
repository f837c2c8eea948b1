use std::collections::HashSet;

/// Thresholds for deciding when a conversation becomes a listed session.
#[derive(Clone, Debug)]
pub struct PersistenceConfig {
    /// Messages shorter than this never start a session.
    pub short_floor: usize,
    /// Messages longer than this start a session.
    pub qualify_threshold: usize,
    pub title_words: usize,
    pub title_max_chars: usize,
    /// Compared against the trimmed, lowercased message.
    pub greetings: HashSet<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            short_floor: 10,
            qualify_threshold: 250,
            title_words: 5,
            title_max_chars: 40,
            greetings: [
                "oi", "ola", "olá", "bom dia", "boa tarde", "boa noite", "teste", "hello", "hi", "hey",
                "testando",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceDecision {
    Ignore,
    /// Session already listed: bump its ordering timestamp.
    Touch,
    /// Session qualifies now: persist it under this fallback title.
    Create { title: String },
}

/// Pure decision function over user turns.
#[derive(Clone, Debug, Default)]
pub struct SessionPolicy {
    config: PersistenceConfig,
}

impl SessionPolicy {
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    pub fn is_greeting(&self, content: &str) -> bool {
        self.config.greetings.contains(&content.trim().to_lowercase())
    }

    pub fn decide(&self, content: &str, already_persisted: bool) -> PersistenceDecision {
        let len = content.chars().count();

        if len < self.config.short_floor && !already_persisted {
            return PersistenceDecision::Ignore;
        }
        if self.is_greeting(content) {
            return PersistenceDecision::Ignore;
        }
        if already_persisted {
            return PersistenceDecision::Touch;
        }
        if len > self.config.qualify_threshold {
            return PersistenceDecision::Create {
                title: self.fallback_title(content),
            };
        }
        PersistenceDecision::Ignore
    }

    /// First few words, with `...` when words were dropped, capped in length.
    pub fn fallback_title(&self, content: &str) -> String {
        let words: Vec<&str> = content.split_whitespace().collect();
        let mut title = words
            .iter()
            .take(self.config.title_words)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if words.len() > self.config.title_words {
            title.push_str("...");
        }
        truncate_with_ellipsis(&title, self.config.title_max_chars)
    }
}

/// Cap `text` at `max` characters, ending in `...` when cut.
pub(crate) fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let head: String = text.chars().take(keep).collect();
    format!("{}...", head.trim_end())
}
