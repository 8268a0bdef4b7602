//! Token entries as stored in the token file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Bearer token string → policy entry.
pub type TokenMap = HashMap<String, TokenEntry>;

/// Policy record for one bearer token.
///
/// Every field is optional in the stored document. A missing `active` means
/// the token is active; only an explicit `false` revokes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEntry {
    /// Human-readable label, used in audit events.
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the token may be used.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Principals this token may request certificates for.
    #[serde(default)]
    pub principals: Vec<String>,
    /// Longest validity (seconds) this token may request.
    #[serde(default)]
    pub max_ttl: Option<u64>,
    /// Tunnel port allocated to this token. Passed through untouched.
    #[serde(default)]
    pub port: Option<serde_json::Value>,
}

fn default_active() -> bool {
    true
}

impl Default for TokenEntry {
    fn default() -> Self {
        Self {
            name: None,
            active: true,
            principals: Vec::new(),
            max_ttl: None,
            port: None,
        }
    }
}

impl TokenEntry {
    /// Check whether `principal` is on this token's allow-list.
    #[must_use]
    pub fn allows_principal(&self, principal: &str) -> bool {
        self.principals.iter().any(|p| p == principal)
    }

    /// Label for logs; `"<unnamed>"` when the entry has no name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn missing_active_defaults_to_true() {
        let entry: TokenEntry =
            serde_json::from_value(json!({"name": "laptop", "principals": ["alice"]})).unwrap();
        assert!(entry.active);
        assert_eq!(entry.max_ttl, None);
    }

    #[test]
    fn explicit_inactive_is_kept() {
        let entry: TokenEntry = serde_json::from_value(json!({"active": false})).unwrap();
        assert!(!entry.active);
    }

    #[test]
    fn port_is_passed_through_as_any_json() {
        let entry: TokenEntry = serde_json::from_value(json!({"port": "22001"})).unwrap();
        assert_eq!(entry.port, Some(json!("22001")));

        let entry: TokenEntry = serde_json::from_value(json!({"port": 22001})).unwrap();
        assert_eq!(entry.port, Some(json!(22001)));
    }

    #[test]
    fn negative_max_ttl_does_not_parse() {
        let parsed: Result<TokenEntry, _> = serde_json::from_value(json!({"max_ttl": -5}));
        assert!(parsed.is_err());
    }

    #[test]
    fn allows_principal_is_exact_match() {
        let entry = TokenEntry {
            principals: vec!["alice".to_string()],
            ..TokenEntry::default()
        };
        assert!(entry.allows_principal("alice"));
        assert!(!entry.allows_principal("alice,root"));
        assert!(!entry.allows_principal("Alice"));
    }

    #[test]
    fn display_name_falls_back() {
        assert_eq!(TokenEntry::default().display_name(), "<unnamed>");
    }
}
