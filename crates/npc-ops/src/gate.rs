//! Feature gate: layered capability resolution with a read-through TTL
//! cache over the server-wide flag table.
//!
//! Resolution short-circuits in order: unknown key, locked flag, disabled
//! server-wide, no actor, actor-disabled, NPC override, default-on. A
//! locked flag dominates every actor-level layer.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use contracts::{ErrorCode, FeatureAuditEntry, FeatureFlag, PlayerKind};

use crate::store::{RegistryStore, StoreError};

/// How long a fetched flag (or its absence) stays cached.
pub const FLAG_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub enum GateError {
    /// The flag is admin-locked; its state cannot be toggled.
    LockedFlag(String),
    Store(StoreError),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockedFlag(key) => write!(f, "feature flag '{key}' is locked"),
            Self::Store(err) => write!(f, "flag store: {err}"),
        }
    }
}

impl std::error::Error for GateError {}

impl From<StoreError> for GateError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl GateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LockedFlag(_) => ErrorCode::LockedFlag,
            Self::Store(_) => ErrorCode::StoreFailure,
        }
    }
}

#[derive(Debug)]
struct CachedFlag {
    flag: Option<FeatureFlag>,
    fetched_at: Instant,
}

/// Owned gate state: one instance per process, passed by handle. The cache
/// also remembers misses so a hot unknown key does not hammer the store.
#[derive(Debug)]
pub struct FeatureGate {
    cache: BTreeMap<String, CachedFlag>,
    ttl: Duration,
}

impl Default for FeatureGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureGate {
    pub fn new() -> Self {
        Self::with_ttl(FLAG_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: BTreeMap::new(),
            ttl,
        }
    }

    /// Resolve whether `key` is active for the given actor.
    pub fn is_enabled(
        &mut self,
        registry: &RegistryStore,
        key: &str,
        actor_id: Option<i64>,
        actor_kind: PlayerKind,
    ) -> Result<bool, StoreError> {
        let Some(flag) = self.cached_flag(registry, key)? else {
            // Unknown capability: closed by default.
            return Ok(false);
        };
        if flag.locked {
            return Ok(flag.enabled);
        }
        if !flag.enabled {
            return Ok(false);
        }
        let Some(actor_id) = actor_id else {
            return Ok(true);
        };
        if let Some(settings) = registry.player_settings(actor_id)? {
            if settings.disabled_features.iter().any(|f| f == key) {
                return Ok(false);
            }
        }
        if actor_kind == PlayerKind::Npc {
            if let Some(config) = registry.npc_config(actor_id)? {
                if let Some(&biased) = config.feature_overrides.get(key) {
                    return Ok(biased);
                }
            }
        }
        Ok(true)
    }

    /// Toggle a flag's server-wide state. Locked flags reject the mutation;
    /// successful toggles append an audit entry and drop the cached value.
    pub fn toggle(
        &mut self,
        registry: &RegistryStore,
        key: &str,
        enabled: bool,
        admin_id: &str,
        now: u64,
    ) -> Result<FeatureFlag, GateError> {
        let existing = registry.flag(key)?;
        match existing {
            Some(flag) if flag.locked => return Err(GateError::LockedFlag(key.to_string())),
            Some(_) => registry.set_flag_enabled(key, enabled, now)?,
            None => registry.upsert_flag(
                &FeatureFlag {
                    key: key.to_string(),
                    enabled,
                    locked: false,
                    description: None,
                },
                now,
            )?,
        }
        registry.append_flag_audit(&FeatureAuditEntry {
            flag_key: key.to_string(),
            enabled,
            admin_id: admin_id.to_string(),
            created_at: now,
        })?;
        self.invalidate(key);
        registry
            .flag(key)?
            .ok_or_else(|| GateError::Store(StoreError::Missing(format!("feature_flags.{key}"))))
    }

    pub fn invalidate(&mut self, key: &str) {
        self.cache.remove(key);
    }

    fn cached_flag(
        &mut self,
        registry: &RegistryStore,
        key: &str,
    ) -> Result<Option<FeatureFlag>, StoreError> {
        if let Some(cached) = self.cache.get(key) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.flag.clone());
            }
        }
        let flag = registry.flag(key)?;
        self.cache.insert(
            key.to_string(),
            CachedFlag {
                flag: flag.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(flag)
    }
}
