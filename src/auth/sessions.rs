use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngExt;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "TinyOPDS_Session";
/// Cookie and session lifetime: 30 days.
pub const SESSION_MAX_AGE_SECS: i64 = 2_592_000;
/// Expired sessions are swept after this many inserts.
const SWEEP_EVERY: u64 = 100;

/// One remembered login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub ip: IpAddr,
    pub username: String,
    pub created: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl Session {
    fn valid_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_access < Duration::seconds(SESSION_MAX_AGE_SECS)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    sessions: Vec<Session>,
    authorized_clients: Vec<String>,
}

/// Sessions plus the persistent remember-me fingerprint list.
///
/// Both survive restart through a JSON state file; writes happen on
/// mutation, reads once at startup.
pub struct AuthStore {
    sessions: DashMap<String, Session>,
    authorized: DashMap<String, ()>,
    insert_count: AtomicU64,
    state_path: Option<PathBuf>,
}

impl AuthStore {
    pub fn new(state_path: Option<PathBuf>) -> Self {
        let store = Self {
            sessions: DashMap::new(),
            authorized: DashMap::new(),
            insert_count: AtomicU64::new(0),
            state_path,
        };
        store.load();
        store
    }

    /// Seed the remember-me list from the configured `authorized_clients`
    /// setting (comma-joined fingerprints).
    pub fn seed_authorized(&self, joined: &str) {
        for fp in joined.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            self.authorized.insert(fp.to_string(), ());
        }
    }

    fn load(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        match serde_json::from_str::<PersistedState>(&content) {
            Ok(state) => {
                let now = Utc::now();
                for session in state.sessions {
                    if session.valid_at(now) {
                        self.sessions.insert(session.token.clone(), session);
                    }
                }
                for fp in state.authorized_clients {
                    self.authorized.insert(fp, ());
                }
            }
            Err(e) => tracing::warn!("Ignoring unreadable auth state file: {e}"),
        }
    }

    fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = PersistedState {
            sessions: self.sessions.iter().map(|e| e.value().clone()).collect(),
            authorized_clients: self.authorized.iter().map(|e| e.key().clone()).collect(),
        };
        match serde_json::to_string(&state) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!("Failed to persist auth state to {}: {e}", path.display());
                }
            }
            Err(e) => tracing::warn!("Failed to serialize auth state: {e}"),
        }
    }

    /// Create a session for a successful login and return its token.
    pub fn create_session(&self, ip: IpAddr, username: &str) -> String {
        let token: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let now = Utc::now();
        self.sessions.insert(
            token.clone(),
            Session {
                token: token.clone(),
                ip,
                username: username.to_string(),
                created: now,
                last_access: now,
            },
        );

        let inserts = self.insert_count.fetch_add(1, Ordering::Relaxed) + 1;
        if inserts % SWEEP_EVERY == 0 {
            self.sweep_expired();
        }
        self.persist();
        token
    }

    /// Validate a session token against the connection peer; a hit
    /// refreshes `last_access`.
    pub fn validate(&self, token: &str, ip: IpAddr) -> Option<String> {
        self.validate_at(token, ip, Utc::now())
    }

    fn validate_at(&self, token: &str, ip: IpAddr, now: DateTime<Utc>) -> Option<String> {
        let mut entry = self.sessions.get_mut(token)?;
        if entry.ip != ip || !entry.valid_at(now) {
            return None;
        }
        entry.last_access = now;
        Some(entry.username.clone())
    }

    pub fn sweep_expired(&self) {
        let now = Utc::now();
        self.sessions.retain(|_, session| session.valid_at(now));
    }

    /// Add a client fingerprint to the persistent remember-me list.
    pub fn remember(&self, fingerprint: &str) {
        if self.authorized.insert(fingerprint.to_string(), ()).is_none() {
            self.persist();
        }
    }

    pub fn is_remembered(&self, fingerprint: &str) -> bool {
        self.authorized.contains_key(fingerprint)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn age_session(&self, token: &str, secs: i64) {
        if let Some(mut entry) = self.sessions.get_mut(token) {
            entry.last_access -= Duration::seconds(secs);
        }
    }
}

/// Per-IP failed-login counters with a ban threshold.
pub struct BanList {
    counters: DashMap<IpAddr, u32>,
    threshold: u32,
}

impl BanList {
    pub fn new(threshold: u32) -> Self {
        Self {
            counters: DashMap::new(),
            threshold: threshold.max(1),
        }
    }

    /// Record one failed attempt; returns the new count.
    pub fn register_failure(&self, ip: IpAddr) -> u32 {
        let mut entry = self.counters.entry(ip).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.counters
            .get(&ip)
            .map(|count| *count >= self.threshold)
            .unwrap_or(false)
    }

    pub fn count(&self, ip: IpAddr) -> u32 {
        self.counters.get(&ip).map(|c| *c).unwrap_or(0)
    }

    /// Administrative reset for one address.
    pub fn reset(&self, ip: IpAddr) {
        self.counters.remove(&ip);
    }
}

/// Deterministic UUID-shaped client key from the peer address.
///
/// Only the IP participates; mobile readers rotate User-Agent strings,
/// so mixing the UA in made the key unstable.
pub fn fingerprint(ip: IpAddr) -> String {
    let digest = Sha256::digest(ip.to_string().as_bytes());
    let h = hex::encode(&digest[..16]);
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_session_roundtrip_and_ip_pinning() {
        let store = AuthStore::new(None);
        let token = store.create_session(ip("10.0.0.1"), "user");
        assert_eq!(
            store.validate(&token, ip("10.0.0.1")).as_deref(),
            Some("user")
        );
        // Same token from a different peer is rejected.
        assert!(store.validate(&token, ip("10.0.0.2")).is_none());
        assert!(store.validate("bogus", ip("10.0.0.1")).is_none());
    }

    #[test]
    fn test_session_expiry() {
        let store = AuthStore::new(None);
        let token = store.create_session(ip("10.0.0.1"), "user");
        store.age_session(&token, SESSION_MAX_AGE_SECS + 1);
        assert!(store.validate(&token, ip("10.0.0.1")).is_none());
        store.sweep_expired();
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_validate_refreshes_last_access() {
        let store = AuthStore::new(None);
        let token = store.create_session(ip("10.0.0.1"), "user");
        store.age_session(&token, SESSION_MAX_AGE_SECS - 10);
        assert!(store.validate(&token, ip("10.0.0.1")).is_some());
        // The refresh pushed expiry out again.
        store.age_session(&token, 20);
        assert!(store.validate(&token, ip("10.0.0.1")).is_some());
    }

    #[test]
    fn test_persistence_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let store = AuthStore::new(Some(path.clone()));
        let token = store.create_session(ip("10.0.0.1"), "user");
        store.remember("fp-abc");
        drop(store);

        let reloaded = AuthStore::new(Some(path));
        assert!(reloaded.validate(&token, ip("10.0.0.1")).is_some());
        assert!(reloaded.is_remembered("fp-abc"));
        assert!(!reloaded.is_remembered("fp-other"));
    }

    #[test]
    fn test_seed_authorized() {
        let store = AuthStore::new(None);
        store.seed_authorized("fp-1, fp-2,,  ");
        assert!(store.is_remembered("fp-1"));
        assert!(store.is_remembered("fp-2"));
    }

    #[test]
    fn test_ban_threshold() {
        let bans = BanList::new(3);
        let addr = ip("10.0.0.1");
        assert!(!bans.is_banned(addr));
        assert_eq!(bans.register_failure(addr), 1);
        assert_eq!(bans.register_failure(addr), 2);
        assert!(!bans.is_banned(addr));
        assert_eq!(bans.register_failure(addr), 3);
        assert!(bans.is_banned(addr));
        // Other addresses are unaffected.
        assert!(!bans.is_banned(ip("10.0.0.2")));
        bans.reset(addr);
        assert!(!bans.is_banned(addr));
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_uuid_shaped() {
        let a = fingerprint(ip("192.168.1.10"));
        let b = fingerprint(ip("192.168.1.10"));
        let c = fingerprint(ip("192.168.1.11"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        let parts: Vec<&str> = a.split('-').collect();
        assert_eq!(
            parts.iter().map(|p| p.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
    }
}
