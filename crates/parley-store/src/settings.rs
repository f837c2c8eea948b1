use std::collections::BTreeMap;

use tracing::instrument;

use parley_core::profile::UserProfile;
use parley_core::provider::ProviderKind;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Prompt type used when a provider has no prompt of its own.
pub const GENERAL_PROMPT: &str = "general";

/// Editable system prompts and the single user profile.
#[derive(Clone)]
pub struct SettingsRepo {
    db: Database,
}

impl SettingsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Base system prompt for a provider, falling back to the general prompt
    /// when the provider-specific one is missing or blank.
    #[instrument(skip(self), fields(provider = %kind))]
    pub fn system_prompt(&self, kind: ProviderKind) -> Result<String, StoreError> {
        if let Some(prompt) = self.prompt(kind.as_str())? {
            if !prompt.trim().is_empty() {
                return Ok(prompt);
            }
        }
        Ok(self.prompt(GENERAL_PROMPT)?.unwrap_or_default())
    }

    pub fn prompt(&self, prompt_type: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT content FROM system_prompts WHERE prompt_type = ?1")?;
            let mut rows = stmt.query([prompt_type])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_helpers::get(row, 0, "system_prompts", "content")?)),
                None => Ok(None),
            }
        })
    }

    pub fn all_prompts(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT prompt_type, content FROM system_prompts")?;
            let mut rows = stmt.query([])?;
            let mut prompts = BTreeMap::new();
            while let Some(row) = rows.next()? {
                prompts.insert(
                    row_helpers::get(row, 0, "system_prompts", "prompt_type")?,
                    row_helpers::get(row, 1, "system_prompts", "content")?,
                );
            }
            Ok(prompts)
        })
    }

    #[instrument(skip(self, content))]
    pub fn save_prompt(&self, prompt_type: &str, content: &str) -> Result<(), StoreError> {
        let now = row_helpers::now_timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO system_prompts (prompt_type, content, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(prompt_type) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
                rusqlite::params![prompt_type, content, now],
            )?;
            Ok(())
        })
    }

    pub fn user_profile(&self) -> Result<UserProfile, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT display_name, email, gender, birthdate, custom_instructions
                 FROM user_profile WHERE id = 1",
            )?;
            let mut rows = stmt.query([])?;
            let Some(row) = rows.next()? else {
                return Ok(UserProfile::default());
            };
            Ok(UserProfile {
                display_name: row_helpers::get(row, 0, "user_profile", "display_name")?,
                email: row_helpers::get(row, 1, "user_profile", "email")?,
                gender: row_helpers::get(row, 2, "user_profile", "gender")?,
                birthdate: row_helpers::get(row, 3, "user_profile", "birthdate")?,
                custom_instructions: row_helpers::get(row, 4, "user_profile", "custom_instructions")?,
            })
        })
    }

    #[instrument(skip(self, profile))]
    pub fn save_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let now = row_helpers::now_timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_profile (id, display_name, email, gender, birthdate, custom_instructions, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    email = excluded.email,
                    gender = excluded.gender,
                    birthdate = excluded.birthdate,
                    custom_instructions = excluded.custom_instructions,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    profile.display_name,
                    profile.email,
                    profile.gender,
                    profile.birthdate,
                    profile.custom_instructions,
                    now,
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SettingsRepo {
        SettingsRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn seeded_prompts_available() {
        let repo = setup();
        let prompts = repo.all_prompts().unwrap();
        assert!(prompts.contains_key("general"));
        assert!(prompts.contains_key("ollama"));
        assert!(prompts.contains_key("lmstudio"));
        assert!(repo.system_prompt(ProviderKind::LmStudio).unwrap().contains("LM Studio"));
    }

    #[test]
    fn blank_provider_prompt_falls_back_to_general() {
        let repo = setup();
        repo.save_prompt("ollama", "   ").unwrap();
        repo.save_prompt(GENERAL_PROMPT, "Be kind.").unwrap();
        assert_eq!(repo.system_prompt(ProviderKind::Ollama).unwrap(), "Be kind.");
    }

    #[test]
    fn save_prompt_overwrites() {
        let repo = setup();
        repo.save_prompt("lmstudio", "Answer in haiku.").unwrap();
        assert_eq!(repo.prompt("lmstudio").unwrap().as_deref(), Some("Answer in haiku."));
        assert_eq!(repo.prompt("unknown").unwrap(), None);
    }

    #[test]
    fn profile_roundtrip() {
        let repo = setup();
        assert_eq!(repo.user_profile().unwrap(), UserProfile::default());

        let profile = UserProfile {
            display_name: "Ana".into(),
            custom_instructions: "Prefer short answers".into(),
            ..Default::default()
        };
        repo.save_profile(&profile).unwrap();
        assert_eq!(repo.user_profile().unwrap(), profile);
    }
}
