//! Feature flag contract types.

use serde::{Deserialize, Serialize};

/// A named capability with a server-wide state. A locked flag forces its
/// state regardless of any actor-level override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureFlag {
    pub key: String,
    pub enabled: bool,
    pub locked: bool,
    pub description: Option<String>,
}

/// Appended on every successful flag toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureAuditEntry {
    pub flag_key: String,
    pub enabled: bool,
    pub admin_id: String,
    pub created_at: u64,
}
