//! Admin key roles and audit log (supplemental, spec.md §6's admin
//! surface). The HTTP transport for `/admin/keys` and `/admin/audit` is
//! out of scope; this module is the pure-logic core those endpoints would
//! call, grounded in
//! `original_source/tests/test_admin_auth.py` (key format `"k1:read,k2:read+write"`,
//! role-gated 401/403 semantics) and `test_admin_audit.py`
//! (`key.add`/`key.remove` audit events, hashed key identity).

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Read,
    Write,
}

fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parses the `ROUTER_ADMIN_KEYS` format: comma-separated
/// `key:role[+role...]` entries, e.g. `"k1:read,k2:read+write"`.
pub fn parse_admin_keys(spec: &str) -> HashMap<String, HashSet<Role>> {
    let mut out = HashMap::new();
    for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((key, roles)) = entry.split_once(':') else {
            continue;
        };
        let role_set: HashSet<Role> = roles
            .split('+')
            .filter_map(|r| match r.trim() {
                "read" => Some(Role::Read),
                "write" => Some(Role::Write),
                _ => None,
            })
            .collect();
        out.insert(key.to_string(), role_set);
    }
    out
}

#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub event: &'static str,
    pub key_hash: String,
    pub at_ms: u64,
}

/// A bounded ring of the most recent audit events. Older entries are
/// dropped once `capacity` is reached rather than growing without bound,
/// since the admin surface only ever needs recent history.
pub struct AuditLog {
    capacity: usize,
    entries: VecDeque<AuditEntry>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    fn push(&mut self, event: &'static str, key_hash: String, at_ms: u64) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(AuditEntry { event, key_hash, at_ms });
    }

    pub fn items(&self) -> Vec<AuditEntry> {
        self.entries.iter().cloned().collect()
    }
}

pub struct AdminKeyStore {
    keys: HashMap<String, HashSet<Role>>,
    audit: AuditLog,
}

impl AdminKeyStore {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            audit: AuditLog::new(500),
        }
    }

    pub fn from_spec(spec: &str) -> Self {
        Self {
            keys: parse_admin_keys(spec),
            audit: AuditLog::new(500),
        }
    }

    /// `true` if no admin keys are configured at all: spec.md treats this
    /// as an open admin surface (every request is implicitly authorized),
    /// matching `test_admin_auth.py`'s "open when no keys configured" case.
    pub fn is_open(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn has_role(&self, raw_key: &str, role: Role) -> bool {
        if self.is_open() {
            return true;
        }
        self.keys
            .get(raw_key)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }

    pub fn add(&mut self, raw_key: &str, roles: HashSet<Role>, now_ms: u64) -> String {
        self.keys.insert(raw_key.to_string(), roles);
        let hash = hash_key(raw_key);
        self.audit.push("key.add", hash.clone(), now_ms);
        hash
    }

    pub fn remove(&mut self, raw_key: &str, now_ms: u64) -> bool {
        let removed = self.keys.remove(raw_key).is_some();
        if removed {
            self.audit.push("key.remove", hash_key(raw_key), now_ms);
        }
        removed
    }

    pub fn audit_items(&self) -> Vec<AuditEntry> {
        self.audit.items()
    }

    #[cfg(test)]
    pub fn reset_for_tests(&mut self) {
        self.keys.clear();
        self.audit = AuditLog::new(500);
    }
}

impl Default for AdminKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_role_keys() {
        let parsed = parse_admin_keys("k1:read,k2:read+write");
        assert_eq!(parsed["k1"], HashSet::from([Role::Read]));
        assert_eq!(parsed["k2"], HashSet::from([Role::Read, Role::Write]));
    }

    #[test]
    fn open_store_authorizes_everything() {
        let store = AdminKeyStore::new();
        assert!(store.has_role("anything", Role::Write));
    }

    #[test]
    fn configured_store_requires_matching_role() {
        let store = AdminKeyStore::from_spec("k1:read");
        assert!(store.has_role("k1", Role::Read));
        assert!(!store.has_role("k1", Role::Write));
        assert!(!store.has_role("unknown", Role::Read));
    }

    #[test]
    fn add_and_remove_emit_audit_events() {
        let mut store = AdminKeyStore::new();
        store.add("k1", HashSet::from([Role::Read]), 100);
        store.remove("k1", 200);

        let items = store.audit_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].event, "key.add");
        assert_eq!(items[1].event, "key.remove");
        assert_eq!(items[0].key_hash, items[1].key_hash, "same raw key hashes identically");
    }

    #[test]
    fn audit_log_is_bounded() {
        let mut log = AuditLog::new(2);
        log.push("key.add", "a".into(), 0);
        log.push("key.add", "b".into(), 1);
        log.push("key.add", "c".into(), 2);
        let items = log.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key_hash, "b");
    }
}
