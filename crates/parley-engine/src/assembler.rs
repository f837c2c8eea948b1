use parley_core::messages::ChatMessage;
use parley_core::profile::UserProfile;
use parley_store::TurnRow;

const PROFILE_HEADER: &str = "\n\n=== USER PROFILE ===\n";

#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// How many of the most recent turns are sent to the model.
    pub context_limit: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { context_limit: 10 }
    }
}

/// Builds the message list sent to a provider.
#[derive(Clone, Debug, Default)]
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn context_limit(&self) -> usize {
        self.config.context_limit
    }

    /// Base prompt followed by one `Label: value` line per filled-in
    /// profile field. The header is only added when the profile has content.
    pub fn compose_system_prompt(&self, base: &str, profile: &UserProfile) -> String {
        let mut prompt = base.to_string();
        let fields = profile.non_empty_fields();
        if !fields.is_empty() {
            prompt.push_str(PROFILE_HEADER);
            for (label, value) in fields {
                prompt.push_str(label);
                prompt.push_str(": ");
                prompt.push_str(value);
                prompt.push('\n');
            }
        }
        prompt
    }

    /// System prompt (when non-empty) followed by the turns in order.
    pub fn assemble(&self, system_prompt: &str, turns: &[TurnRow]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        if !system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.extend(turns.iter().map(|t| ChatMessage::new(t.role, t.content.clone())));
        messages
    }
}

/// Rough token count: four characters per token.
pub fn estimate_input_tokens(messages: &[ChatMessage]) -> u64 {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    (chars / 4) as u64
}
