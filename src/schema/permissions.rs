//! Record permissions
//!
//! ```json
//! "permissions": {
//!   "read":   [{ "allow": ["*"], "when": { "compare": { "op": "eq", "left": { "field": "status" }, "right": { "value": "published" } } } },
//!              { "allow": ["owner:author_id", "role:admin"] }],
//!   "delete": [{ "allow": ["role:admin"] }]
//! }
//! ```
//!
//! An action with no entry is open to everyone. An action with an entry is
//! allowed when any of its rules admits the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::expr::Expr;
use crate::auth::AuthContext;

/// Record actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Action::Read),
            "create" => Some(Action::Create),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a rule admits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// `*` or `public`
    Anyone,
    /// `authenticated`
    Authenticated,
    /// `owner:<field>`: the record's field equals the caller's subject
    Owner(String),
    /// `role:<name>` or a bare role name
    Role(String),
}

impl Principal {
    /// Whether the caller is admitted. Without a record, owner principals
    /// admit any authenticated caller; ownership is decided per record.
    pub fn admits(&self, auth: Option<&AuthContext>, record: Option<&Map<String, Value>>) -> bool {
        match self {
            Principal::Anyone => true,
            Principal::Authenticated => auth.is_some(),
            Principal::Role(role) => auth.map_or(false, |a| a.has_role(role)),
            Principal::Owner(field) => match (auth, record) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(a), Some(record)) => {
                    record.get(field).and_then(Value::as_str) == Some(a.subject.as_str())
                }
            },
        }
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        match s {
            "*" | "public" => Principal::Anyone,
            "authenticated" => Principal::Authenticated,
            _ => {
                if let Some(field) = s.strip_prefix("owner:") {
                    Principal::Owner(field.to_string())
                } else if let Some(role) = s.strip_prefix("role:") {
                    Principal::Role(role.to_string())
                } else {
                    Principal::Role(s.to_string())
                }
            }
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Anyone => f.write_str("*"),
            Principal::Authenticated => f.write_str("authenticated"),
            Principal::Owner(field) => write!(f, "owner:{}", field),
            Principal::Role(role) => write!(f, "role:{}", role),
        }
    }
}

impl Serialize for Principal {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Principal {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Principal::from(s.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionRule {
    pub allow: Vec<Principal>,
    /// Record predicate gating this rule
    #[serde(default)]
    pub when: Option<Expr>,
}

impl PermissionRule {
    fn admits_record(&self, auth: Option<&AuthContext>, record: &Map<String, Value>) -> bool {
        self.when.as_ref().map_or(true, |w| w.eval_bool(record))
            && self.allow.iter().any(|p| p.admits(auth, Some(record)))
    }
}

/// Permission map of a schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub BTreeMap<Action, Vec<PermissionRule>>);

impl Permissions {
    pub fn set(&mut self, action: Action, rules: Vec<PermissionRule>) {
        self.0.insert(action, rules);
    }

    /// Principal check before any record is known. Record predicates are
    /// ignored; a rule gated by one may still admit a record later.
    pub fn allows_action(&self, action: Action, auth: Option<&AuthContext>) -> bool {
        match self.0.get(&action) {
            None => true,
            Some(rules) => rules
                .iter()
                .any(|rule| rule.allow.iter().any(|p| p.admits(auth, None))),
        }
    }

    /// Full check against a concrete record.
    pub fn allows_record(
        &self,
        action: Action,
        auth: Option<&AuthContext>,
        record: &Map<String, Value>,
    ) -> bool {
        match self.0.get(&action) {
            None => true,
            Some(rules) => rules.iter().any(|rule| rule.admits_record(auth, record)),
        }
    }

    /// Record fields read by owner principals and rule predicates
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for rule in self.0.values().flatten() {
            if let Some(when) = &rule.when {
                out.extend(when.referenced_fields());
            }
            for principal in &rule.allow {
                if let Principal::Owner(field) = principal {
                    out.insert(field.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn permissions() -> Permissions {
        serde_json::from_value(json!({
            "read": [
                { "allow": ["*"], "when": { "compare": { "op": "eq", "left": { "field": "status" }, "right": { "value": "published" } } } },
                { "allow": ["owner:author_id", "role:admin"] }
            ],
            "delete": [{ "allow": ["admin"] }]
        }))
        .unwrap()
    }

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_principal_parsing() {
        assert_eq!(Principal::from("*"), Principal::Anyone);
        assert_eq!(Principal::from("public"), Principal::Anyone);
        assert_eq!(Principal::from("authenticated"), Principal::Authenticated);
        assert_eq!(Principal::from("owner:author_id"), Principal::Owner("author_id".into()));
        assert_eq!(Principal::from("role:admin"), Principal::Role("admin".into()));
        assert_eq!(Principal::from("editor"), Principal::Role("editor".into()));
    }

    #[test]
    fn test_missing_action_is_open() {
        assert!(permissions().allows_action(Action::Create, None));
    }

    #[test]
    fn test_status_based_read() {
        let perms = permissions();
        let published = record(json!({ "status": "published", "author_id": "u1" }));
        let draft = record(json!({ "status": "draft", "author_id": "u1" }));

        assert!(perms.allows_record(Action::Read, None, &published));
        assert!(!perms.allows_record(Action::Read, None, &draft));

        let owner = AuthContext::new("u1");
        let stranger = AuthContext::new("u2");
        let admin = AuthContext::new("u3").with_role("admin");
        assert!(perms.allows_record(Action::Read, Some(&owner), &draft));
        assert!(!perms.allows_record(Action::Read, Some(&stranger), &draft));
        assert!(perms.allows_record(Action::Read, Some(&admin), &draft));
    }

    #[test]
    fn test_action_level_role_check() {
        let perms = permissions();
        assert!(!perms.allows_action(Action::Delete, None));
        assert!(!perms.allows_action(Action::Delete, Some(&AuthContext::new("u1"))));
        assert!(perms.allows_action(
            Action::Delete,
            Some(&AuthContext::new("u1").with_role("admin"))
        ));
    }

    #[test]
    fn test_referenced_fields() {
        let fields: Vec<_> = permissions().referenced_fields().into_iter().collect();
        assert_eq!(fields, vec!["author_id", "status"]);
    }
}
