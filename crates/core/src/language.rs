//! Language definitions

use serde::{Deserialize, Serialize};

/// Languages the moderation rules and voice providers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Arabic,
    Spanish,
    French,
}

impl Language {
    /// ISO 639-1 code used in provider requests and rule files.
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Arabic => "ar",
            Language::Spanish => "es",
            Language::French => "fr",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Language::English),
            "ar" => Some(Language::Arabic),
            "es" => Some(Language::Spanish),
            "fr" => Some(Language::French),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for lang in [
            Language::English,
            Language::Arabic,
            Language::Spanish,
            Language::French,
        ] {
            assert_eq!(Language::from_code(lang.code()), Some(lang));
        }
        assert_eq!(Language::from_code("xx"), None);
    }
}
