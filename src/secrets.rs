//! Secret matching and redaction.
//!
//! The agent decides which keys (query parameters, headers, ...) count as
//! secrets by handing out a matcher kind and a list of patterns during the
//! announce handshake.  Until then the default policy redacts every key
//! containing `key`, `pass` or `secret`, ignoring case.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde_json::Value;

use crate::error::SecretsError;

/// Replacement for the value of a secret query parameter.
pub const REDACTED: &str = "<redacted>";

/// The supported kinds of secret matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// The key equals one of the list entries.
    Equals,
    /// The key equals one of the list entries, ignoring case.
    EqualsIgnoreCase,
    /// The key contains one of the list entries.
    Contains,
    /// The key contains one of the list entries, ignoring case.
    ContainsIgnoreCase,
    /// The key fully matches one of the regular expressions in the list.
    Regex,
    /// Nothing is a secret.
    None,
}

impl MatcherKind {
    /// All kinds, in the order the agent documents them.
    pub const ALL: [MatcherKind; 6] = [
        MatcherKind::EqualsIgnoreCase,
        MatcherKind::Equals,
        MatcherKind::ContainsIgnoreCase,
        MatcherKind::Contains,
        MatcherKind::Regex,
        MatcherKind::None,
    ];

    /// The name of the kind as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            MatcherKind::Equals => "equals",
            MatcherKind::EqualsIgnoreCase => "equals-ignore-case",
            MatcherKind::Contains => "contains",
            MatcherKind::ContainsIgnoreCase => "contains-ignore-case",
            MatcherKind::Regex => "regex",
            MatcherKind::None => "none",
        }
    }
}

impl FromStr for MatcherKind {
    type Err = SecretsError;

    fn from_str(s: &str) -> Result<MatcherKind, SecretsError> {
        MatcherKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SecretsError::UnsupportedMatcher(s.to_string()))
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
enum Patterns {
    Plain(Vec<String>),
    Compiled(Vec<Regex>),
}

/// A validated secrets policy.
#[derive(Debug, Clone)]
pub struct SecretMatcher {
    kind: MatcherKind,
    list: Vec<String>,
    patterns: Patterns,
}

impl SecretMatcher {
    /// Creates a matcher of the given kind over the given list.
    ///
    /// Fails if the kind is `regex` and one of the entries does not compile.
    pub fn new(kind: MatcherKind, list: Vec<String>) -> Result<SecretMatcher, SecretsError> {
        let patterns = match kind {
            MatcherKind::Regex => Patterns::Compiled(
                list.iter()
                    .map(|entry| {
                        Regex::new(&format!("^(?:{})$", entry))
                            .map_err(|err| SecretsError::InvalidRegex(entry.clone(), err))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            MatcherKind::EqualsIgnoreCase | MatcherKind::ContainsIgnoreCase => {
                Patterns::Plain(list.iter().map(|s| s.to_lowercase()).collect())
            }
            _ => Patterns::Plain(list.clone()),
        };
        Ok(SecretMatcher {
            kind,
            list,
            patterns,
        })
    }

    /// Validates the `secrets` object of an announce response.
    ///
    /// The whole object is rejected as soon as one attribute is invalid so
    /// that a partial configuration is never applied.
    pub fn from_agent_config(secrets: &Value) -> Result<SecretMatcher, SecretsError> {
        let matcher = secrets.get("matcher").unwrap_or(&Value::Null);
        let kind: MatcherKind = matcher
            .as_str()
            .ok_or_else(|| SecretsError::MatcherNotString(matcher.to_string()))?
            .parse()?;

        let list = secrets.get("list").unwrap_or(&Value::Null);
        let list = list
            .as_array()
            .ok_or_else(|| SecretsError::ListNotArray(list.to_string()))?
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| SecretsError::ListEntryNotString(entry.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        SecretMatcher::new(kind, list)
    }

    /// The kind of this matcher.
    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    /// The list this matcher was created from.
    pub fn list(&self) -> &[String] {
        &self.list
    }

    /// Checks whether the given key is considered a secret.
    pub fn is_secret(&self, key: &str) -> bool {
        match (&self.patterns, self.kind) {
            (_, MatcherKind::None) => false,
            (Patterns::Compiled(regexes), _) => regexes.iter().any(|re| re.is_match(key)),
            (Patterns::Plain(list), MatcherKind::Equals) => list.iter().any(|s| s == key),
            (Patterns::Plain(list), MatcherKind::EqualsIgnoreCase) => {
                let key = key.to_lowercase();
                list.iter().any(|s| *s == key)
            }
            (Patterns::Plain(list), MatcherKind::Contains) => {
                list.iter().any(|s| key.contains(s.as_str()))
            }
            (Patterns::Plain(list), _) => {
                let key = key.to_lowercase();
                list.iter().any(|s| key.contains(s.as_str()))
            }
        }
    }

    /// Replaces the values of all secret parameters in a query string.
    ///
    /// Returns `None` for an empty query.
    pub fn redact_query(&self, query: &str) -> Option<String> {
        if query.is_empty() {
            return None;
        }
        let redacted: Vec<String> = query
            .split('&')
            .map(|param| {
                let key = param.split('=').next().unwrap_or_default();
                if !key.is_empty() && self.is_secret(key) {
                    format!("{}={}", key, REDACTED)
                } else {
                    param.to_string()
                }
            })
            .collect();
        Some(redacted.join("&"))
    }
}

impl Default for SecretMatcher {
    fn default() -> SecretMatcher {
        SecretMatcher {
            kind: MatcherKind::ContainsIgnoreCase,
            list: vec!["key".into(), "pass".into(), "secret".into()],
            patterns: Patterns::Plain(vec!["key".into(), "pass".into(), "secret".into()]),
        }
    }
}

/// Cuts a URL at the first `?`, `#` or `;`.
pub fn discard_url_parameters(url: &str) -> &str {
    let end = url.find(['?', '#', ';']).unwrap_or(url.len());
    &url[..end]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn matcher(kind: &str, list: &[&str]) -> SecretMatcher {
        SecretMatcher::new(
            kind.parse().unwrap(),
            list.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_policy() {
        let m = SecretMatcher::default();
        assert_eq!(m.kind(), MatcherKind::ContainsIgnoreCase);
        assert!(m.is_secret("API_KEY"));
        assert!(m.is_secret("password"));
        assert!(!m.is_secret("user"));
    }

    #[test]
    fn test_matcher_kinds() {
        assert!(matcher("equals", &["token"]).is_secret("token"));
        assert!(!matcher("equals", &["token"]).is_secret("Token"));
        assert!(matcher("equals-ignore-case", &["token"]).is_secret("TOKEN"));
        assert!(matcher("contains", &["tok"]).is_secret("my_token"));
        assert!(!matcher("contains", &["tok"]).is_secret("MY_TOKEN"));
        assert!(matcher("contains-ignore-case", &["tok"]).is_secret("MY_TOKEN"));
        assert!(!matcher("none", &["token"]).is_secret("token"));
    }

    #[test]
    fn test_regex_is_anchored() {
        let m = matcher("regex", &["sess.*"]);
        assert!(m.is_secret("session"));
        assert!(!m.is_secret("my_session"));
    }

    #[test]
    fn test_unknown_kind() {
        assert!(matches!(
            "starts-with".parse::<MatcherKind>(),
            Err(SecretsError::UnsupportedMatcher(_))
        ));
        assert!("Equals".parse::<MatcherKind>().is_err());
    }

    #[test]
    fn test_from_agent_config() {
        let m = SecretMatcher::from_agent_config(&json!({
            "matcher": "equals",
            "list": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(m.kind(), MatcherKind::Equals);
        assert_eq!(m.list(), ["a", "b"]);

        assert!(matches!(
            SecretMatcher::from_agent_config(&json!({"matcher": 1, "list": []})),
            Err(SecretsError::MatcherNotString(_))
        ));
        assert!(matches!(
            SecretMatcher::from_agent_config(&json!({"matcher": "equals", "list": "a"})),
            Err(SecretsError::ListNotArray(_))
        ));
        assert!(matches!(
            SecretMatcher::from_agent_config(&json!({"matcher": "equals", "list": ["a", 2]})),
            Err(SecretsError::ListEntryNotString(_))
        ));
        assert!(matches!(
            SecretMatcher::from_agent_config(&json!({"matcher": "regex", "list": ["("]})),
            Err(SecretsError::InvalidRegex(..))
        ));
    }

    #[test]
    fn test_redact_query() {
        let m = SecretMatcher::default();
        assert_eq!(m.redact_query(""), None);
        assert_eq!(
            m.redact_query("user=joe&password=hunter2&apiKey").as_deref(),
            Some("user=joe&password=<redacted>&apiKey=<redacted>")
        );
    }

    #[test]
    fn test_discard_url_parameters() {
        assert_eq!(discard_url_parameters("/a/b?c=d"), "/a/b");
        assert_eq!(discard_url_parameters("/a;jsessionid=1?x"), "/a");
        assert_eq!(discard_url_parameters("/a#frag"), "/a");
        assert_eq!(discard_url_parameters("/plain"), "/plain");
    }
}
