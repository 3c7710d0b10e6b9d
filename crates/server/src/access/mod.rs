//! Access Policy Store
//!
//! Loads the slug-to-token-set authorization mapping from a JSON file and
//! answers access-check queries. A slug absent from the mapping is public.
//! The rules are reloaded on every access decision so edits to the file take
//! effect immediately; no cache, no staleness.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::warn;

/// Per-document authorization rules.
///
/// Loading never fails: an unreadable or malformed rules file yields the
/// empty mapping (everything public) by default, or a deny-everything set
/// when `fail_closed` was requested.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    rules: HashMap<String, HashSet<String>>,
    closed: bool,
}

impl AccessRules {
    /// Read and parse the rules file.
    ///
    /// Any read or parse failure is logged and converted per the fail mode;
    /// the caller never sees an error.
    pub async fn load(path: &Path, fail_closed: bool) -> AccessRules {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!("[Access] Could not read rules file {:?}: {}", path, e);
                return Self::on_load_failure(fail_closed);
            }
        };

        match serde_json::from_str::<HashMap<String, HashSet<String>>>(&text) {
            Ok(rules) => AccessRules {
                rules,
                closed: false,
            },
            Err(e) => {
                warn!("[Access] Malformed rules file {:?}: {}", path, e);
                Self::on_load_failure(fail_closed)
            }
        }
    }

    fn on_load_failure(fail_closed: bool) -> AccessRules {
        AccessRules {
            rules: HashMap::new(),
            closed: fail_closed,
        }
    }

    /// Build rules from an in-memory mapping.
    pub fn from_map(rules: HashMap<String, HashSet<String>>) -> AccessRules {
        AccessRules {
            rules,
            closed: false,
        }
    }

    /// Exact-match membership check. Absent slug means public; a gated slug
    /// requires the supplied token to be a member of its token set.
    pub fn can_access(&self, slug: &str, token: Option<&str>) -> bool {
        if self.closed {
            return false;
        }
        match self.rules.get(slug) {
            None => true,
            Some(tokens) => match token {
                Some(token) => tokens.contains(token),
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rules_from_json(json: &str) -> AccessRules {
        AccessRules::from_map(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn absent_slug_is_public_regardless_of_token() {
        let rules = rules_from_json(r#"{"private":["t1"]}"#);
        assert!(rules.can_access("public-notes", None));
        assert!(rules.can_access("public-notes", Some("anything")));
    }

    #[test]
    fn gated_slug_requires_exact_member_token() {
        let rules = rules_from_json(r#"{"private":["t1","t2"]}"#);
        assert!(rules.can_access("private", Some("t1")));
        assert!(rules.can_access("private", Some("t2")));
        assert!(!rules.can_access("private", Some("t3")));
        assert!(!rules.can_access("private", None));
        // Prefix or substring of a valid token must not pass.
        assert!(!rules.can_access("private", Some("t")));
        assert!(!rules.can_access("private", Some("t1x")));
    }

    #[tokio::test]
    async fn missing_file_fails_open_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let rules = AccessRules::load(&dir.path().join("absent.json"), false).await;
        assert!(rules.can_access("anything", None));
    }

    #[tokio::test]
    async fn missing_file_denies_everything_when_fail_closed() {
        let dir = tempfile::tempdir().unwrap();
        let rules = AccessRules::load(&dir.path().join("absent.json"), true).await;
        assert!(!rules.can_access("anything", None));
        assert!(!rules.can_access("anything", Some("token")));
    }

    #[tokio::test]
    async fn malformed_file_fails_open_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"{ not json").unwrap();

        let rules = AccessRules::load(&path, false).await;
        assert!(rules.can_access("anything", None));

        let rules = AccessRules::load(&path, true).await;
        assert!(!rules.can_access("anything", None));
    }

    #[tokio::test]
    async fn valid_file_loads_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.json");
        std::fs::write(&path, r#"{"secret-plans":["alpha"]}"#).unwrap();

        let rules = AccessRules::load(&path, false).await;
        assert!(rules.can_access("secret-plans", Some("alpha")));
        assert!(!rules.can_access("secret-plans", Some("beta")));
        assert!(rules.can_access("other", None));
    }
}
