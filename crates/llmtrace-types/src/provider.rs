//! LLM vendor identifiers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

const KNOWN: [&str; 4] = ["openai", "anthropic", "google", "mistral"];

/// Which LLM vendor a tracked call went to.
///
/// The four well-known vendors have dedicated variants; anything else is
/// carried verbatim in `Other` so new vendors need no code change.
///
/// Equality, hashing and ordering go through `as_str()`, so an `Other`
/// spelling of a well-known vendor is the same provider as its variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Mistral,
    Other(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Mistral => "mistral",
            Provider::Other(name) => KNOWN
                .into_iter()
                .find(|known| known.eq_ignore_ascii_case(name))
                .map_or(name.as_str(), |known| known),
        }
    }

    /// The dedicated variant when `Other` names a well-known vendor.
    pub fn canonical(self) -> Self {
        match self {
            Provider::Other(name) => Provider::from(name),
            known => known,
        }
    }
}

impl PartialEq for Provider {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Provider {}

impl Hash for Provider {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl PartialOrd for Provider {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Provider {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Provider {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "openai" => Provider::OpenAi,
            "anthropic" => Provider::Anthropic,
            "google" => Provider::Google,
            "mistral" => Provider::Mistral,
            _ => Provider::Other(s.to_string()),
        }
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        Provider::from(s.as_str())
    }
}

impl From<Provider> for String {
    fn from(p: Provider) -> Self {
        p.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers_parse_case_insensitively() {
        assert_eq!(Provider::from("OpenAI"), Provider::OpenAi);
        assert_eq!(Provider::from("anthropic"), Provider::Anthropic);
        assert_eq!(Provider::from("Google"), Provider::Google);
        assert_eq!(Provider::from("MISTRAL"), Provider::Mistral);
    }

    #[test]
    fn test_unknown_provider_is_kept_verbatim() {
        let p = Provider::from("cohere");
        assert_eq!(p, Provider::Other("cohere".to_string()));
        assert_eq!(p.to_string(), "cohere");
    }

    #[test]
    fn test_provider_serializes_as_plain_string() {
        let json = serde_json::to_string(&Provider::Anthropic).unwrap();
        assert_eq!(json, "\"anthropic\"");
        let parsed: Provider = serde_json::from_str("\"groq\"").unwrap();
        assert_eq!(parsed, Provider::Other("groq".to_string()));
    }

    #[test]
    fn test_other_spelling_of_known_vendor_is_the_same_provider() {
        let spelled = Provider::Other("OpenAI".to_string());
        assert_eq!(spelled.as_str(), "openai");
        assert_eq!(spelled, Provider::OpenAi);
        assert_eq!(spelled.clone().canonical(), Provider::OpenAi);
        assert!(matches!(spelled.canonical(), Provider::OpenAi));

        // Unknown vendors stay case-sensitive, like the stored text.
        assert_ne!(
            Provider::Other("Cohere".to_string()),
            Provider::Other("cohere".to_string())
        );
    }
}
