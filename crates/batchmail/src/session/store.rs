//! In-memory session store with idle expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use log::debug;
use tokio::task::JoinHandle;

use super::model::SessionState;

/// Default idle lifetime of a session (120 minutes).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(120 * 60);

/// Shared handle to one session's state.
pub type SharedSession = Arc<Mutex<SessionState>>;

/// When stale sessions are evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PurgePolicy {
    /// Scan every entry on each `get`. Any access purges every stale session.
    #[default]
    EveryAccess,
    /// Only the requested entry is checked on `get`; everything else waits
    /// for [`SessionStore::purge_expired`] (see [`SessionStore::spawn_sweeper`]).
    Lazy,
}

struct Entry {
    touched: Instant,
    state: SharedSession,
}

/// Session id -> workflow state, guarded by a single mutex.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone)]
pub struct SessionStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
    policy: PurgePolicy,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_policy(ttl, PurgePolicy::default())
    }

    pub fn with_policy(ttl: Duration, policy: PurgePolicy) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            policy,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the session's state, creating an empty one on first access.
    ///
    /// Every call refreshes the entry's last-touch time.
    pub fn get(&self, session_id: &str) -> SharedSession {
        self.get_at(session_id, Instant::now())
    }

    fn get_at(&self, session_id: &str, now: Instant) -> SharedSession {
        let mut entries = self.lock();

        match self.policy {
            PurgePolicy::EveryAccess => {
                purge(&mut entries, now, self.ttl);
            }
            PurgePolicy::Lazy => {
                if entries
                    .get(session_id)
                    .is_some_and(|e| is_stale(e, now, self.ttl))
                {
                    entries.remove(session_id);
                }
            }
        }

        let entry = entries
            .entry(session_id.to_string())
            .or_insert_with(|| Entry {
                touched: now,
                state: Arc::new(Mutex::new(SessionState::default())),
            });
        entry.touched = now;
        Arc::clone(&entry.state)
    }

    /// Removes the session. No-op when absent.
    pub fn clear(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    /// Evicts every stale entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&mut self.lock(), Instant::now(), self.ttl)
    }

    /// Number of registered sessions, stale ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `session_id` is registered. Neither purges nor touches.
    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Periodically calls [`SessionStore::purge_expired`] on the tokio runtime.
    ///
    /// The task ends on its own once every clone of the store is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let entries: Weak<Mutex<HashMap<String, Entry>>> = Arc::downgrade(&self.entries);
        let ttl = self.ttl;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let mut guard = entries.lock().unwrap_or_else(PoisonError::into_inner);
                let removed = purge(&mut guard, Instant::now(), ttl);
                if removed > 0 {
                    debug!("Session sweeper evicted {} idle sessions", removed);
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // Map operations cannot leave it half-updated, so poisoning is ignorable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

fn is_stale(entry: &Entry, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(entry.touched) >= ttl
}

fn purge(entries: &mut HashMap<String, Entry>, now: Instant, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !is_stale(entry, now, ttl));
    before - entries.len()
}

/// Locks a session's state, recovering from a poisoned lock.
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, SessionState> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::Recipient;

    fn ada() -> Recipient {
        Recipient::new("Dr.", "Ada", "Lovelace", "ada@example.com").unwrap()
    }

    #[test]
    fn test_get_creates_and_reuses_state() {
        let store = SessionStore::default();
        let first = store.get("s1");
        lock_session(&first).replace_recipients(vec![ada()]);

        let second = store.get("s1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lock_session(&second).recipients.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_is_idempotent_and_touches() {
        let ttl = Duration::from_secs(60);
        let store = SessionStore::new(ttl);
        let start = Instant::now();
        let before = lock_session(&store.get_at("s1", start)).clone();

        let again = lock_session(&store.get_at("s1", start + ttl / 2)).clone();
        assert_eq!(before, again);

        // Past the TTL since creation, but only half a TTL since the last touch
        store.get_at("other", start + ttl + ttl / 4);
        assert!(store.contains("s1"));

        store.get_at("other", start + ttl * 2);
        assert!(!store.contains("s1"));
    }

    #[test]
    fn test_zero_ttl_purges_other_sessions_on_access() {
        let store = SessionStore::new(Duration::ZERO);
        store.get("stale");
        assert!(store.contains("stale"));

        store.get("fresh");
        assert!(!store.contains("stale"));
        assert!(store.contains("fresh"));
    }

    #[test]
    fn test_expired_session_comes_back_empty() {
        let store = SessionStore::new(Duration::ZERO);
        lock_session(&store.get("s1")).replace_recipients(vec![ada()]);
        assert!(lock_session(&store.get("s1")).recipients.is_empty());
    }

    #[test]
    fn test_clear() {
        let store = SessionStore::default();
        lock_session(&store.get("s1")).oauth_authorized = true;
        store.clear("s1");
        store.clear("never-existed");
        assert!(!store.contains("s1"));
        assert!(!lock_session(&store.get("s1")).oauth_authorized);
    }

    #[test]
    fn test_lazy_policy_only_checks_requested_entry() {
        let store = SessionStore::with_policy(Duration::ZERO, PurgePolicy::Lazy);
        store.get("a");
        store.get("b");
        assert!(store.contains("a"));
        assert_eq!(store.purge_expired(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_evicts_idle_sessions() {
        let store = SessionStore::with_policy(Duration::from_millis(10), PurgePolicy::Lazy);
        store.get("idle");
        let handle = store.spawn_sweeper(Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.contains("idle"));

        handle.abort();
    }
}
