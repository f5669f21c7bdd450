//! Core permission engine types

use crate::error::{AuthzError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Monotonic invalidation counter value
pub type Epoch = u64;

/// Per-entity optimistic concurrency version (0 = never written)
pub type Version = u64;

/// Unique user identifier, supplied by the calling application
pub type UserId = String;

/// Wildcard segment
pub const WILDCARD: &str = "*";

/// Maximum number of `:`-separated segments (`category:action:resource`)
pub const MAX_SEGMENTS: usize = 3;

fn segment_regex() -> &'static Regex {
    static SEGMENT: OnceLock<Regex> = OnceLock::new();
    SEGMENT.get_or_init(|| {
        Regex::new(r"^(\*|[a-z0-9][a-z0-9_.\-]*)$").expect("segment pattern is a valid regex")
    })
}

/// Validated permission identifier of the form `category[:action[:resource]]`
///
/// Each segment is lowercase alphanumeric (plus `_`, `.`, `-`) or the wildcard
/// `*`. A wildcard may only appear as the final segment.
///
/// # Examples
///
/// ```
/// use cretoai_permissions::PermissionName;
///
/// let name = PermissionName::parse("inspection:read").unwrap();
/// assert_eq!(name.category(), "inspection");
/// assert!(PermissionName::parse("inspection:*").unwrap().covers(&name));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionName(String);

impl PermissionName {
    /// Parse and validate an identifier
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        if raw.is_empty() {
            return Err(AuthzError::InvalidArgument(
                "permission name cannot be empty".to_string(),
            ));
        }

        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() > MAX_SEGMENTS {
            return Err(AuthzError::InvalidArgument(format!(
                "permission '{}' has {} segments, at most {} allowed",
                raw,
                segments.len(),
                MAX_SEGMENTS
            )));
        }

        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if !segment_regex().is_match(segment) {
                return Err(AuthzError::InvalidArgument(format!(
                    "permission '{}' has invalid segment '{}'",
                    raw, segment
                )));
            }
            if *segment == WILDCARD && i != last {
                return Err(AuthzError::InvalidArgument(format!(
                    "permission '{}' uses a wildcard before the final segment",
                    raw
                )));
            }
        }

        Ok(Self(raw.to_string()))
    }

    /// Parse a batch of identifiers, failing on the first malformed one
    pub fn parse_all<I, S>(raw: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter().map(Self::parse).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(':')
    }

    /// First segment
    pub fn category(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD || self.0.ends_with(":*")
    }

    /// Whether holding `self` implies holding `other`.
    ///
    /// Exact names cover only themselves. `*` covers everything; `a:*` covers
    /// any name with at least one more segment under `a` (but not `a` itself).
    pub fn covers(&self, other: &PermissionName) -> bool {
        if self == other {
            return true;
        }
        if self.0 == WILDCARD {
            return true;
        }
        match self.0.strip_suffix('*') {
            Some(prefix) if self.is_wildcard() => {
                other.0.starts_with(prefix) && other.0.len() > prefix.len()
            }
            _ => false,
        }
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PermissionName {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PermissionName {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<PermissionName> for String {
    fn from(name: PermissionName) -> Self {
        name.0
    }
}

impl AsRef<str> for PermissionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Catalog entry describing a single capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Identifier (e.g., "inspection:read")
    pub name: PermissionName,

    /// Human-readable description
    pub description: String,

    /// Category tag used for listing
    pub category: String,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,

    /// Permissions are immutable; this stays at 1 once registered
    #[serde(default)]
    pub version: Version,
}

impl Permission {
    pub fn new(
        name: PermissionName,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name,
            description: description.into(),
            category: category.into(),
            created_at: Utc::now(),
            version: 0,
        }
    }
}

/// Named, priority-ordered collection of permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique role name
    pub name: String,

    pub description: String,

    /// Granted permissions (order irrelevant)
    pub permissions: HashSet<PermissionName>,

    /// System roles cannot be deleted or renamed
    #[serde(default)]
    pub is_system: bool,

    /// Higher = listed first and preferred as primary role
    #[serde(default)]
    pub priority: i32,

    /// Inactive roles contribute no permissions
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Optimistic concurrency version
    #[serde(default)]
    pub version: Version,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Role {
    /// Create a new, active, non-system role
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        permissions: impl IntoIterator<Item = PermissionName>,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            permissions: permissions.into_iter().collect(),
            is_system: false,
            priority,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the role as a protected system role
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    /// Apply a permission update in the given mode
    pub fn apply(&mut self, permissions: Vec<PermissionName>, mode: UpdateMode) {
        match mode {
            UpdateMode::Replace => {
                self.permissions = permissions.into_iter().collect();
            }
            UpdateMode::Add => {
                self.permissions.extend(permissions);
            }
            UpdateMode::Remove => {
                for permission in &permissions {
                    self.permissions.remove(permission);
                }
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn has_permission(&self, name: &PermissionName) -> bool {
        self.permissions.contains(name)
    }
}

/// How `updatePermissions` combines the supplied list with the current set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Replace,
    Add,
    Remove,
}

impl FromStr for UpdateMode {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            other => Err(AuthzError::InvalidArgument(format!(
                "invalid update mode '{}', expected replace|add|remove",
                other
            ))),
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// Which half of a user override a call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    Granted,
    Denied,
}

impl FromStr for OverrideKind {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(AuthzError::InvalidArgument(format!(
                "invalid override kind '{}', expected granted|denied",
                other
            ))),
        }
    }
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Per-user exceptions to role-derived permissions
///
/// `granted` and `denied` are kept disjoint on every write; a denial always
/// removes the same identifier from `granted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOverride {
    pub user_id: UserId,

    #[serde(default)]
    pub granted: HashSet<PermissionName>,

    #[serde(default)]
    pub denied: HashSet<PermissionName>,

    /// Optimistic concurrency version (0 = nothing recorded)
    #[serde(default)]
    pub version: Version,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserOverride {
    /// Empty override for a user with nothing recorded
    pub fn empty(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            granted: HashSet::new(),
            denied: HashSet::new(),
            version: 0,
            updated_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.denied.is_empty()
    }

    /// Union `permissions` into `granted`.
    ///
    /// Identifiers currently denied are not granted. Returns the skipped ones.
    pub fn grant(&mut self, permissions: Vec<PermissionName>) -> Vec<PermissionName> {
        let mut skipped = Vec::new();
        for permission in permissions {
            if self.denied.contains(&permission) {
                skipped.push(permission);
            } else {
                self.granted.insert(permission);
            }
        }
        self.updated_at = Some(Utc::now());
        skipped
    }

    /// Union `permissions` into `denied`, removing each from `granted`
    pub fn deny(&mut self, permissions: Vec<PermissionName>) {
        for permission in permissions {
            self.granted.remove(&permission);
            self.denied.insert(permission);
        }
        self.updated_at = Some(Utc::now());
    }

    /// Drop all entries of `kind`, or both sets when `None`
    pub fn clear(&mut self, kind: Option<OverrideKind>) {
        match kind {
            Some(OverrideKind::Granted) => self.granted.clear(),
            Some(OverrideKind::Denied) => self.denied.clear(),
            None => {
                self.granted.clear();
                self.denied.clear();
            }
        }
        self.updated_at = Some(Utc::now());
    }

    /// Identifiers present in both sets (should always be empty)
    pub fn overlap(&self) -> Vec<PermissionName> {
        let mut overlap: Vec<_> = self.granted.intersection(&self.denied).cloned().collect();
        overlap.sort();
        overlap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PermissionName {
        PermissionName::parse(s).unwrap()
    }

    #[test]
    fn test_permission_name_grammar() {
        assert!(PermissionName::parse("supplier").is_ok());
        assert!(PermissionName::parse("inspection:read").is_ok());
        assert!(PermissionName::parse("payment:approve:invoice-2024").is_ok());
        assert!(PermissionName::parse("*").is_ok());
        assert!(PermissionName::parse("inspection:*").is_ok());

        assert!(PermissionName::parse("").is_err());
        assert!(PermissionName::parse("a:b:c:d").is_err());
        assert!(PermissionName::parse("Inspection:read").is_err());
        assert!(PermissionName::parse("inspection::read").is_err());
        assert!(PermissionName::parse("inspection:read ").is_err());
        assert!(PermissionName::parse("*:read").is_err());
        assert!(PermissionName::parse("inspection:*:x").is_err());
    }

    #[test]
    fn test_category() {
        assert_eq!(name("inspection:read:report").category(), "inspection");
        assert_eq!(name("supplier").category(), "supplier");
    }

    #[test]
    fn test_wildcard_coverage() {
        let all = name("*");
        let inspection_all = name("inspection:*");
        let read = name("inspection:read");

        assert!(all.covers(&read));
        assert!(inspection_all.covers(&read));
        assert!(inspection_all.covers(&name("inspection:read:report")));
        assert!(!inspection_all.covers(&name("inspection")));
        assert!(!inspection_all.covers(&name("inspections:read")));
        assert!(read.covers(&read));
        assert!(!read.covers(&name("inspection:write")));
    }

    #[test]
    fn test_serde_validates() {
        let ok: std::result::Result<PermissionName, _> =
            serde_json::from_str("\"supplier:manage\"");
        assert!(ok.is_ok());

        let bad: std::result::Result<PermissionName, _> = serde_json::from_str("\"Bad Name\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_update_mode_parse() {
        assert_eq!("replace".parse::<UpdateMode>().unwrap(), UpdateMode::Replace);
        assert_eq!("ADD".parse::<UpdateMode>().unwrap(), UpdateMode::Add);
        assert!(matches!(
            "merge".parse::<UpdateMode>(),
            Err(AuthzError::InvalidArgument(_))
        ));
        assert!(matches!(
            "revoked".parse::<OverrideKind>(),
            Err(AuthzError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_role_apply_modes() {
        let mut role = Role::new("inspector", "", vec![name("inspection:read")], 10);

        role.apply(vec![name("inspection:write")], UpdateMode::Add);
        assert_eq!(role.permissions.len(), 2);

        role.apply(vec![name("inspection:read")], UpdateMode::Remove);
        assert!(!role.has_permission(&name("inspection:read")));

        role.apply(vec![name("supplier:read")], UpdateMode::Replace);
        assert_eq!(role.permissions.len(), 1);
        assert!(role.has_permission(&name("supplier:read")));
    }

    #[test]
    fn test_deny_removes_grant() {
        let mut ov = UserOverride::empty("u-1");
        ov.grant(vec![name("inspection:write"), name("supplier:manage")]);
        ov.deny(vec![name("inspection:write")]);

        assert!(!ov.granted.contains(&name("inspection:write")));
        assert!(ov.denied.contains(&name("inspection:write")));
        assert!(ov.overlap().is_empty());
    }

    #[test]
    fn test_grant_does_not_lift_denial() {
        let mut ov = UserOverride::empty("u-1");
        ov.deny(vec![name("payment:approve")]);
        let skipped = ov.grant(vec![name("payment:approve"), name("payment:read")]);

        assert_eq!(skipped, vec![name("payment:approve")]);
        assert!(ov.granted.contains(&name("payment:read")));
        assert!(ov.overlap().is_empty());
    }

    #[test]
    fn test_clear_kinds() {
        let mut ov = UserOverride::empty("u-1");
        ov.grant(vec![name("a:b")]);
        ov.deny(vec![name("c:d")]);

        ov.clear(Some(OverrideKind::Granted));
        assert!(ov.granted.is_empty());
        assert!(!ov.denied.is_empty());

        ov.clear(None);
        assert!(ov.is_empty());
    }
}
