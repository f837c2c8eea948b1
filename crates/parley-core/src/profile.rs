use serde::{Deserialize, Serialize};

/// Optional facts about the person chatting, folded into the system prompt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub display_name: String,
    pub email: String,
    pub gender: String,
    pub birthdate: String,
    pub custom_instructions: String,
}

impl UserProfile {
    /// Labelled fields with non-blank values, in display order.
    pub fn non_empty_fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("Name", self.display_name.as_str()),
            ("Email", self.email.as_str()),
            ("Gender", self.gender.as_str()),
            ("Birthdate", self.birthdate.as_str()),
            ("Instructions", self.custom_instructions.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(label, v)| (label, v.trim()))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.non_empty_fields().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_are_skipped() {
        let profile = UserProfile {
            display_name: "Ana".into(),
            gender: "   ".into(),
            custom_instructions: " be brief ".into(),
            ..Default::default()
        };
        assert_eq!(
            profile.non_empty_fields(),
            vec![("Name", "Ana"), ("Instructions", "be brief")]
        );
        assert!(!profile.is_empty());
        assert!(UserProfile::default().is_empty());
    }

    #[test]
    fn missing_json_fields_default() {
        let profile: UserProfile = serde_json::from_str(r#"{"email":"a@b.c"}"#).unwrap();
        assert_eq!(profile.email, "a@b.c");
        assert!(profile.display_name.is_empty());
    }
}
