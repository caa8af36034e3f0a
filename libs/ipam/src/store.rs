use crate::error::{Error, Result};
use crate::ipconfig::{IpConfigState, IpConfigurationStatus};
use crate::pod::PodInfo;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

/// Hook invoked for every state transition, while the store lock is held.
/// Implementations must be non-blocking; metric increments are the intended
/// use.
pub trait TransitionHook: Send + Sync {
    fn on_transition(
        &self,
        record: &IpConfigurationStatus,
        prev: IpConfigState,
        next: IpConfigState,
    );
}

/// Point-in-time counts by state, taken under a single lock acquisition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: i64,
    pub assigned: i64,
    pub available: i64,
    pub pending_programming: i64,
    pub pending_release: i64,
}

#[derive(Default)]
struct StoreInner {
    configs: HashMap<String, IpConfigurationStatus>,
    /// pod key -> IP configuration ID, maintained for Assigned records only.
    pod_index: HashMap<String, String>,
    /// LIFO stack of Available IDs. Reclamation pops from the top so a scale
    /// down undoes the most recent scale up.
    available: Vec<String>,
}

/// Concurrency-safe store of per-IP lifecycle records, keyed by the
/// orchestrator-assigned UUID, with a secondary pod-key index.
///
/// One read-write lock guards records, pod index and the Available stack
/// together; all critical sections are short and never span I/O.
pub struct IpStateStore {
    inner: RwLock<StoreInner>,
    hooks: Vec<Arc<dyn TransitionHook>>,
}

impl IpStateStore {
    pub fn new() -> Self {
        Self::with_hooks(Vec::new())
    }

    /// Hooks are fixed at construction; they observe every state transition.
    pub fn with_hooks(hooks: Vec<Arc<dyn TransitionHook>>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            hooks,
        }
    }

    fn set_state(&self, record: &mut IpConfigurationStatus, next: IpConfigState) {
        let prev = record.state;
        record.state = next;
        record.last_state_transition = Utc::now();
        for hook in &self.hooks {
            hook.on_transition(record, prev, next);
        }
    }

    /// Bulk upsert driven by the reconciler.
    ///
    /// New records are inserted with the state the caller derived from the NC
    /// version (PendingProgramming or Available). Existing records in
    /// PendingProgramming move to Available once the incoming state says the
    /// dataplane caught up. Assigned and PendingRelease records survive NC
    /// updates untouched.
    pub fn add_or_update(&self, configs: impl IntoIterator<Item = IpConfigurationStatus>) {
        let mut inner = self.inner.write();
        for config in configs {
            let prior = inner.configs.get(&config.id).map(|c| c.state);
            match prior {
                None => {
                    trace!(
                        msg = "inserting IP configuration",
                        id = %config.id,
                        state = %config.state,
                    );
                    if config.state == IpConfigState::Available {
                        inner.available.push(config.id.clone());
                    }
                    inner.configs.insert(config.id.clone(), config);
                }
                Some(IpConfigState::PendingProgramming)
                    if config.state == IpConfigState::Available =>
                {
                    let id = config.id.clone();
                    let record = inner
                        .configs
                        .get_mut(&id)
                        .expect("record was just looked up");
                    self.set_state(record, IpConfigState::Available);
                    inner.available.push(id);
                }
                Some(_) => {}
            }
        }
    }

    /// Reserve an IP for a pod. With `desired_ip` set, binds that specific
    /// record iff it is Available; otherwise takes the top of the Available
    /// stack. A pod that already holds an IP gets the same record back, so
    /// CNI ADD retries converge.
    pub fn reserve(
        &self,
        pod: &PodInfo,
        desired_ip: Option<&str>,
    ) -> Result<IpConfigurationStatus> {
        let key = pod.key();
        let mut inner = self.inner.write();

        if let Some(id) = inner.pod_index.get(&key).cloned() {
            debug!(msg = "pod already holds an IP configuration", pod = %key, id = %id);
            return Ok(inner.configs[&id].clone());
        }

        let id = match desired_ip {
            Some(ip) => {
                let id = inner
                    .configs
                    .values()
                    .find(|c| c.ip_address == ip && c.state == IpConfigState::Available)
                    .map(|c| c.id.clone())
                    .ok_or_else(|| Error::IpNotAvailable(ip.to_string()))?;
                // keep the stack consistent with the record states
                if let Some(pos) = inner.available.iter().position(|a| *a == id) {
                    inner.available.remove(pos);
                }
                id
            }
            None => inner.available.pop().ok_or(Error::NoAvailableIps)?,
        };

        inner.pod_index.insert(key, id.clone());
        let record = inner
            .configs
            .get_mut(&id)
            .expect("available stack only holds IDs present in the store");
        record.pod_info = Some(pod.clone());
        self.set_state(record, IpConfigState::Assigned);
        Ok(record.clone())
    }

    /// Release the IP held by a pod. Unknown pod keys are a success no-op so
    /// CNI DEL retries converge; the released record is returned when there
    /// was one.
    pub fn release_by_pod(&self, pod_key: &str) -> Option<IpConfigurationStatus> {
        let mut inner = self.inner.write();
        let id = match inner.pod_index.remove(pod_key) {
            Some(id) => id,
            None => {
                debug!(msg = "no IP configuration held by pod, ignoring release", pod = %pod_key);
                return None;
            }
        };
        Some(self.release_locked(&mut inner, &id))
    }

    /// Release by IP configuration ID. Releasing an Available record is a
    /// success no-op; unknown IDs are NotFound; other states are invalid.
    pub fn release_by_id(&self, id: &str) -> Result<IpConfigurationStatus> {
        let mut inner = self.inner.write();
        let state = inner
            .configs
            .get(id)
            .map(|c| c.state)
            .ok_or_else(|| Error::NotFound(format!("IP configuration {id}")))?;
        match state {
            IpConfigState::Available => Ok(inner.configs[id].clone()),
            IpConfigState::Assigned => {
                let pod_key = inner.configs[id].pod_info.as_ref().map(|p| p.key());
                if let Some(key) = pod_key {
                    inner.pod_index.remove(&key);
                }
                Ok(self.release_locked(&mut inner, id))
            }
            from => Err(Error::InvalidStateTransition {
                id: id.to_string(),
                from,
                to: IpConfigState::Available,
            }),
        }
    }

    fn release_locked(&self, inner: &mut StoreInner, id: &str) -> IpConfigurationStatus {
        let record = inner
            .configs
            .get_mut(id)
            .expect("pod index only holds IDs present in the store");
        record.pod_info = None;
        self.set_state(record, IpConfigState::Available);
        let snapshot = record.clone();
        inner.available.push(id.to_string());
        snapshot
    }

    /// Move `n` Available records to PendingRelease, youngest first.
    ///
    /// All-or-nothing: when fewer than `n` are Available every partial
    /// transition is rolled back, the stack is restored, and
    /// [`Error::InsufficientAvailable`] is returned.
    pub fn mark_n_pending_release(
        &self,
        n: usize,
    ) -> Result<HashMap<String, IpConfigurationStatus>> {
        let mut inner = self.inner.write();
        let mut marked = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(id) = inner.available.pop() else {
                break;
            };
            let record = inner
                .configs
                .get_mut(&id)
                .expect("available stack only holds IDs present in the store");
            self.set_state(record, IpConfigState::PendingRelease);
            marked.push(id);
        }

        if marked.len() < n {
            // roll back in reverse pop order so the stack keeps its shape
            for id in marked.iter().rev() {
                let record = inner
                    .configs
                    .get_mut(id)
                    .expect("record was marked just above");
                self.set_state(record, IpConfigState::Available);
            }
            for id in marked.iter().rev() {
                inner.available.push(id.clone());
            }
            return Err(Error::InsufficientAvailable {
                requested: n,
                marked: marked.len(),
            });
        }

        Ok(marked
            .into_iter()
            .map(|id| (id.clone(), inner.configs[&id].clone()))
            .collect())
    }

    /// Delete PendingRelease records by ID. Driven by the NNC diff, which may
    /// race with a reclassification, so absent records and records in any
    /// other state are left alone.
    pub fn remove_pending_release<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let mut inner = self.inner.write();
        for id in ids {
            match inner.configs.get(id).map(|c| c.state) {
                Some(IpConfigState::PendingRelease) => {
                    debug!(msg = "deleting reclaimed IP configuration", id = %id);
                    inner.configs.remove(id);
                }
                Some(state) => {
                    warn!(
                        msg = "IP configuration no longer assigned by orchestrator but not pending release, keeping it",
                        id = %id,
                        state = %state,
                    );
                }
                None => {}
            }
        }
    }

    /// Copies of the record map and the pod index, taken under one lock
    /// acquisition.
    pub fn snapshot(
        &self,
    ) -> (
        HashMap<String, IpConfigurationStatus>,
        HashMap<String, String>,
    ) {
        let inner = self.inner.read();
        (inner.configs.clone(), inner.pod_index.clone())
    }

    /// Records currently in any of the given states.
    pub fn filter(&self, states: &[IpConfigState]) -> Vec<IpConfigurationStatus> {
        let inner = self.inner.read();
        inner
            .configs
            .values()
            .filter(|c| states.contains(&c.state))
            .cloned()
            .collect()
    }

    /// IDs of all PendingRelease records, sorted for deterministic spec
    /// contents.
    pub fn pending_release_ids(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner
            .configs
            .values()
            .filter(|c| c.state == IpConfigState::PendingRelease)
            .map(|c| c.id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn pool_counts(&self) -> PoolCounts {
        let inner = self.inner.read();
        let mut counts = PoolCounts {
            total: inner.configs.len() as i64,
            ..PoolCounts::default()
        };
        for config in inner.configs.values() {
            match config.state {
                IpConfigState::Assigned => counts.assigned += 1,
                IpConfigState::Available => counts.available += 1,
                IpConfigState::PendingProgramming => counts.pending_programming += 1,
                IpConfigState::PendingRelease => counts.pending_release += 1,
            }
        }
        counts
    }
}

impl Default for IpStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pod::{PodIdentifiers, PodInfo, PodKeyScheme};

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(id: &str, ip: &str, state: IpConfigState) -> IpConfigurationStatus {
        IpConfigurationStatus::new(id, "nc-1", ip, state)
    }

    fn pod(name: &str) -> PodInfo {
        PodInfo::new(
            PodKeyScheme::Kubernetes,
            PodIdentifiers {
                name: name.to_string(),
                namespace: "default".to_string(),
                infra_container_id: format!("infra-{name}"),
                interface_id: format!("eth0-{name}"),
            },
        )
    }

    fn seeded(n: usize) -> IpStateStore {
        let store = IpStateStore::new();
        store.add_or_update(
            (0..n).map(|i| config(&format!("id-{i}"), &format!("10.0.0.{i}"), IpConfigState::Available)),
        );
        store
    }

    #[test]
    fn test_reserve_and_release_round_trip() {
        let store = seeded(2);
        let p = pod("a");
        let got = store.reserve(&p, None).unwrap();
        assert_eq!(got.state, IpConfigState::Assigned);
        assert_eq!(got.pod_info.as_ref().unwrap().key(), p.key());

        let released = store.release_by_pod(&p.key()).unwrap();
        assert_eq!(released.id, got.id);
        assert_eq!(released.state, IpConfigState::Available);
        assert!(released.pod_info.is_none());

        // idempotent: second release is a no-op
        assert!(store.release_by_pod(&p.key()).is_none());
    }

    #[test]
    fn test_reserve_is_idempotent_per_pod() {
        let store = seeded(3);
        let p = pod("a");
        let first = store.reserve(&p, None).unwrap();
        let second = store.reserve(&p, None).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.pool_counts().assigned, 1);
    }

    #[test]
    fn test_reserve_desired_ip() {
        let store = seeded(3);
        let got = store.reserve(&pod("a"), Some("10.0.0.1")).unwrap();
        assert_eq!(got.ip_address, "10.0.0.1");

        // the specific record is gone now
        let err = store.reserve(&pod("b"), Some("10.0.0.1")).unwrap_err();
        assert!(matches!(err, Error::IpNotAvailable(_)));

        // unknown address
        let err = store.reserve(&pod("c"), Some("10.9.9.9")).unwrap_err();
        assert!(matches!(err, Error::IpNotAvailable(_)));
    }

    #[test]
    fn test_reserve_exhausted() {
        let store = seeded(1);
        store.reserve(&pod("a"), None).unwrap();
        let err = store.reserve(&pod("b"), None).unwrap_err();
        assert!(matches!(err, Error::NoAvailableIps));
    }

    #[test]
    fn test_assigned_count_matches_pod_index() {
        let store = seeded(8);
        for i in 0..5 {
            store.reserve(&pod(&format!("p{i}")), None).unwrap();
        }
        store.release_by_pod(&pod("p1").key());
        store.release_by_pod(&pod("p3").key());
        let (configs, index) = store.snapshot();
        let assigned = configs
            .values()
            .filter(|c| c.state == IpConfigState::Assigned)
            .count();
        assert_eq!(assigned, index.len());
        assert_eq!(assigned, 3);
        for c in configs.values() {
            assert_eq!(c.state == IpConfigState::Assigned, c.pod_info.is_some());
        }
    }

    #[test]
    fn test_release_by_id() {
        let store = seeded(2);
        let got = store.reserve(&pod("a"), None).unwrap();
        let released = store.release_by_id(&got.id).unwrap();
        assert_eq!(released.state, IpConfigState::Available);
        // pod index entry is gone too
        assert_eq!(store.pool_counts().assigned, 0);
        assert!(store.release_by_pod(&pod("a").key()).is_none());

        // releasing an Available record succeeds without change
        let again = store.release_by_id(&got.id).unwrap();
        assert_eq!(again.state, IpConfigState::Available);

        let err = store.release_by_id("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_mark_n_pending_release_is_lifo() {
        let store = seeded(4);
        let marked = store.mark_n_pending_release(2).unwrap();
        // youngest first: the last two inserted
        assert!(marked.contains_key("id-3"));
        assert!(marked.contains_key("id-2"));
        assert!(
            marked
                .values()
                .all(|c| c.state == IpConfigState::PendingRelease)
        );
        assert_eq!(store.pool_counts().available, 2);
    }

    #[test]
    fn test_mark_n_pending_release_rolls_back_on_insufficiency() {
        let store = seeded(3);
        store.reserve(&pod("a"), None).unwrap();

        let err = store.mark_n_pending_release(3).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientAvailable {
                requested: 3,
                marked: 2
            }
        ));

        // nothing stranded in PendingRelease
        let counts = store.pool_counts();
        assert_eq!(counts.pending_release, 0);
        assert_eq!(counts.available, 2);

        // the stack survived the rollback intact
        let marked = store.mark_n_pending_release(2).unwrap();
        assert_eq!(marked.len(), 2);
    }

    #[test]
    fn test_remove_pending_release_only_deletes_pending() {
        let store = seeded(3);
        store.reserve(&pod("a"), None).unwrap();
        let marked = store.mark_n_pending_release(1).unwrap();
        let pending_id = marked.keys().next().unwrap().clone();
        let (configs, _) = store.snapshot();
        let assigned_id = configs
            .values()
            .find(|c| c.state == IpConfigState::Assigned)
            .unwrap()
            .id
            .clone();

        store.remove_pending_release(
            [pending_id.as_str(), assigned_id.as_str(), "missing"].into_iter(),
        );

        let (configs, _) = store.snapshot();
        assert!(!configs.contains_key(&pending_id));
        // the Assigned record survived the orchestrator shrinking the NC
        assert!(configs.contains_key(&assigned_id));
    }

    #[test]
    fn test_add_or_update_programs_pending_records() {
        let store = IpStateStore::new();
        store.add_or_update([config("id-0", "10.0.0.0", IpConfigState::PendingProgramming)]);
        let err = store.reserve(&pod("a"), None).unwrap_err();
        assert!(matches!(err, Error::NoAvailableIps));

        // the NC version caught up: record becomes reservable
        store.add_or_update([config("id-0", "10.0.0.0", IpConfigState::Available)]);
        let got = store.reserve(&pod("a"), None).unwrap();
        assert_eq!(got.id, "id-0");
    }

    #[test]
    fn test_add_or_update_leaves_assigned_and_pending_release_alone() {
        let store = seeded(2);
        let got = store.reserve(&pod("a"), None).unwrap();
        store.mark_n_pending_release(1).unwrap();

        store.add_or_update([
            config(&got.id, &got.ip_address, IpConfigState::Available),
            config("id-1", "10.0.0.1", IpConfigState::Available),
            config("id-0", "10.0.0.0", IpConfigState::Available),
        ]);

        let counts = store.pool_counts();
        assert_eq!(counts.assigned, 1);
        assert_eq!(counts.pending_release, 1);
        assert_eq!(counts.available, 0);
    }

    #[test]
    fn test_filter() {
        let store = seeded(3);
        store.reserve(&pod("a"), None).unwrap();
        let available = store.filter(&[IpConfigState::Available]);
        assert_eq!(available.len(), 2);
        let both = store.filter(&[IpConfigState::Available, IpConfigState::Assigned]);
        assert_eq!(both.len(), 3);
    }

    struct CountingHook(AtomicUsize);

    impl TransitionHook for CountingHook {
        fn on_transition(
            &self,
            _record: &IpConfigurationStatus,
            _prev: IpConfigState,
            _next: IpConfigState,
        ) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_hooks_observe_transitions() {
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let store = IpStateStore::with_hooks(vec![hook.clone()]);
        store.add_or_update([config("id-0", "10.0.0.0", IpConfigState::Available)]);
        // insertion is not a transition
        assert_eq!(hook.0.load(Ordering::Relaxed), 0);

        store.reserve(&pod("a"), None).unwrap();
        store.release_by_pod(&pod("a").key());
        assert_eq!(hook.0.load(Ordering::Relaxed), 2);
    }
}
