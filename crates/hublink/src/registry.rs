//! Per-client liveness registry, owned by the hub's receive and sweep paths.

use chrono::{DateTime, Utc};
use hublink_types::Identity;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Liveness state for one observed client identity.
#[derive(Debug, Clone)]
struct ServiceRecord {
    /// When traffic from this client was last seen.
    last_ping: Instant,
    /// Remaining failure budget.
    liveness: i64,
    /// Whether a ping has been seen since the record was (re)created or
    /// since the last dead transition.
    alive: bool,
    /// Instance id from the latest ping; `None` until the first valid ping.
    instance: Option<Uuid>,
    /// When this identity was first observed (observability only).
    first_seen: DateTime<Utc>,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub identity: Identity,
    pub alive: bool,
    pub liveness: i64,
    pub instance: Option<Uuid>,
    pub first_seen: DateTime<Utc>,
    /// How long the client has been silent.
    pub silent_for: Duration,
}

/// Outcome of recording a ping, used to drive the connection callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PingTransition {
    /// The record flipped from not-alive to alive.
    pub became_alive: bool,
    /// The instance id changed (including the very first ping).
    pub instance_changed: bool,
}

/// Registry of per-client liveness records.
///
/// Mutated only from the hub's receive and sweep paths; the lock serializes
/// them when those run on different threads.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<RwLock<HashMap<Identity, ServiceRecord>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record inbound traffic from `identity`: refresh its timestamp and
    /// reset its liveness budget, creating the record on first contact.
    /// Any traffic counts, not just pings.
    pub(crate) fn observe(&self, identity: &Identity, max_liveness: u32) {
        self.observe_at(identity, max_liveness, Instant::now());
    }

    fn observe_at(&self, identity: &Identity, max_liveness: u32, now: Instant) {
        let mut records = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match records.get_mut(identity) {
            Some(record) => {
                record.last_ping = now;
                record.liveness = i64::from(max_liveness);
            }
            None => {
                records.insert(
                    identity.clone(),
                    ServiceRecord {
                        last_ping: now,
                        liveness: i64::from(max_liveness),
                        alive: false,
                        instance: None,
                        first_seen: Utc::now(),
                    },
                );
            }
        }
    }

    /// Record a ping carrying `instance`, returning which transitions it
    /// caused. Must follow an [`observe`](Self::observe) for the same
    /// message; a missing record is recreated defensively.
    pub(crate) fn note_ping(&self, identity: &Identity, instance: Uuid) -> PingTransition {
        let mut records = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(identity.clone())
            .or_insert_with(|| ServiceRecord {
                last_ping: Instant::now(),
                liveness: 0,
                alive: false,
                instance: None,
                first_seen: Utc::now(),
            });

        let became_alive = !record.alive;
        record.alive = true;

        let instance_changed = record.instance != Some(instance);
        if instance_changed {
            record.instance = Some(instance);
        }

        PingTransition {
            became_alive,
            instance_changed,
        }
    }

    /// Age all records by one sweep pass and return the identities that made
    /// a dead transition this pass.
    ///
    /// A record is stale when more than one ping interval has passed since
    /// its last traffic. Stale records lose one liveness point per pass;
    /// hitting exactly zero while alive is the (one-shot) dead transition,
    /// and dropping below zero deletes the record so a later message starts
    /// it fresh.
    pub(crate) fn sweep(&self, ping_interval: Duration, max_liveness: u32) -> Vec<Identity> {
        self.sweep_at(ping_interval, max_liveness, Instant::now())
    }

    fn sweep_at(
        &self,
        ping_interval: Duration,
        max_liveness: u32,
        now: Instant,
    ) -> Vec<Identity> {
        let mut timed_out = Vec::new();
        let mut records = self.inner.write().unwrap_or_else(|e| e.into_inner());

        // Snapshot the keys first: entries are deleted mid-pass.
        let identities: Vec<Identity> = records.keys().cloned().collect();

        for identity in identities {
            let Some(record) = records.get_mut(&identity) else {
                continue;
            };
            if now.saturating_duration_since(record.last_ping) <= ping_interval {
                continue;
            }

            record.liveness -= 1;
            let liveness = record.liveness;

            if liveness == 0 {
                if record.alive {
                    record.alive = false;
                    debug!(service = %identity, "Service seems unavailable now");
                    timed_out.push(identity);
                }
            } else if liveness < 0 {
                records.remove(&identity);
                debug!(service = %identity, "Service record expired");
            } else {
                debug!(
                    service = %identity,
                    liveness,
                    from_max = liveness + 1 == i64::from(max_liveness),
                    "Service liveness decremented"
                );
            }
        }

        timed_out
    }

    /// Snapshot of all current records.
    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        let now = Instant::now();
        let records = self.inner.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .map(|(identity, record)| ServiceStatus {
                identity: identity.clone(),
                alive: record.alive,
                liveness: record.liveness,
                instance: record.instance,
                first_seen: record.first_seen,
                silent_for: now.saturating_duration_since(record.last_ping),
            })
            .collect()
    }

    /// Snapshot of one record.
    pub fn status_of(&self, identity: &Identity) -> Option<ServiceStatus> {
        let now = Instant::now();
        let records = self.inner.read().unwrap_or_else(|e| e.into_inner());
        records.get(identity).map(|record| ServiceStatus {
            identity: identity.clone(),
            alive: record.alive,
            liveness: record.liveness,
            instance: record.instance,
            first_seen: record.first_seen,
            silent_for: now.saturating_duration_since(record.last_ping),
        })
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);
    const MAX: u32 = 3;

    /// One instant strictly past the staleness threshold per elapsed sweep.
    fn stale(start: Instant, sweeps: u32) -> Instant {
        start + (INTERVAL + Duration::from_millis(1)) * sweeps
    }

    #[test]
    fn test_first_contact_creates_not_alive_record() {
        let registry = ServiceRegistry::new();
        let id = Identity::from("svc-1");
        registry.observe(&id, MAX);

        let status = registry.status_of(&id).unwrap();
        assert!(!status.alive);
        assert_eq!(status.liveness, 3);
        assert_eq!(status.instance, None);
    }

    #[test]
    fn test_any_traffic_resets_liveness() {
        let registry = ServiceRegistry::new();
        let id = Identity::from("svc-1");
        let start = Instant::now();

        registry.observe_at(&id, MAX, start);
        assert_eq!(registry.sweep_at(INTERVAL, MAX, stale(start, 1)), vec![]);
        assert_eq!(registry.status_of(&id).unwrap().liveness, 2);

        // A non-ping message re-arms the budget.
        registry.observe_at(&id, MAX, stale(start, 1));
        assert_eq!(registry.status_of(&id).unwrap().liveness, 3);
    }

    #[test]
    fn test_ping_transitions() {
        let registry = ServiceRegistry::new();
        let id = Identity::from("svc-1");
        let instance_a = Uuid::new_v4();

        registry.observe(&id, MAX);
        let t = registry.note_ping(&id, instance_a);
        assert!(t.became_alive);
        assert!(t.instance_changed);

        // Same instance again: no transition at all.
        registry.observe(&id, MAX);
        let t = registry.note_ping(&id, instance_a);
        assert!(!t.became_alive);
        assert!(!t.instance_changed);

        // New instance behind the same identity: reconnection.
        let instance_b = Uuid::new_v4();
        let t = registry.note_ping(&id, instance_b);
        assert!(!t.became_alive);
        assert!(t.instance_changed);
        assert_eq!(registry.status_of(&id).unwrap().instance, Some(instance_b));
    }

    #[test]
    fn test_silence_times_out_exactly_once_then_expires() {
        let registry = ServiceRegistry::new();
        let id = Identity::from("svc-1");
        let start = Instant::now();

        registry.observe_at(&id, MAX, start);
        registry.note_ping(&id, Uuid::new_v4());

        // Silent sweeps: 3 -> 2 -> 1 -> 0 (dead transition on the third).
        assert!(registry.sweep_at(INTERVAL, MAX, stale(start, 1)).is_empty());
        assert!(registry.sweep_at(INTERVAL, MAX, stale(start, 2)).is_empty());
        assert_eq!(
            registry.sweep_at(INTERVAL, MAX, stale(start, 3)),
            vec![id.clone()]
        );
        assert!(!registry.status_of(&id).unwrap().alive);

        // Fourth silent sweep deletes the record, with no second callback.
        assert!(registry.sweep_at(INTERVAL, MAX, stale(start, 4)).is_empty());
        assert!(registry.status_of(&id).is_none());
    }

    #[test]
    fn test_fresh_record_after_expiry_is_not_alive() {
        let registry = ServiceRegistry::new();
        let id = Identity::from("svc-1");
        let start = Instant::now();

        registry.observe_at(&id, MAX, start);
        registry.note_ping(&id, Uuid::new_v4());
        for sweeps in 1..=4 {
            registry.sweep_at(INTERVAL, MAX, stale(start, sweeps));
        }
        assert!(registry.is_empty());

        // A later message recreates the identity from scratch.
        registry.observe_at(&id, MAX, stale(start, 5));
        let status = registry.status_of(&id).unwrap();
        assert!(!status.alive);
        assert_eq!(status.instance, None);
    }

    #[test]
    fn test_never_alive_record_expires_silently() {
        let registry = ServiceRegistry::new();
        let id = Identity::from("svc-1");
        let start = Instant::now();

        // Traffic but never a ping: no dead transition may fire.
        registry.observe_at(&id, MAX, start);
        for sweeps in 1..=4 {
            assert!(registry.sweep_at(INTERVAL, MAX, stale(start, sweeps)).is_empty());
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_recent_traffic_is_not_aged() {
        let registry = ServiceRegistry::new();
        let id = Identity::from("svc-1");
        let start = Instant::now();

        registry.observe_at(&id, MAX, start);
        // Within the interval nothing changes.
        assert!(registry
            .sweep_at(INTERVAL, MAX, start + INTERVAL / 2)
            .is_empty());
        assert_eq!(registry.status_of(&id).unwrap().liveness, 3);
    }

    #[test]
    fn test_sweep_handles_mixed_population() {
        let registry = ServiceRegistry::new();
        let quiet = Identity::from("quiet");
        let chatty = Identity::from("chatty");
        let start = Instant::now();

        registry.observe_at(&quiet, MAX, start);
        registry.note_ping(&quiet, Uuid::new_v4());
        registry.observe_at(&chatty, MAX, start);
        registry.note_ping(&chatty, Uuid::new_v4());

        for sweeps in 1..=3 {
            // Chatty keeps talking, quiet does not.
            registry.observe_at(&chatty, MAX, stale(start, sweeps));
            let timed_out = registry.sweep_at(INTERVAL, MAX, stale(start, sweeps));
            if sweeps == 3 {
                assert_eq!(timed_out, vec![quiet.clone()]);
            } else {
                assert!(timed_out.is_empty());
            }
        }

        assert!(registry.status_of(&chatty).unwrap().alive);
    }
}
