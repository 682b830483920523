//! Schedule manager: reconciles desired schedules against registered
//! triggers, one workload at a time.
//!
//! The manager owns a table `workload → identity → TriggerHandle`. All
//! mutation happens under a single async mutex, so concurrent replace calls
//! for the same workload never interleave their add/remove steps.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use warpcron_core::{ScheduleIdentity, ScheduleSpec, WorkloadId};
use warpcron_trigger::{Job, TriggerHandle, TriggerPrimitive};

use crate::error::{RegistrationFailure, SchedulerError, SchedulerResult};

/// Invoked each time a registered schedule comes due.
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn fire(&self, workload: &WorkloadId, identity: &ScheduleIdentity, schedule: &ScheduleSpec);
}

/// What a replace call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl ReplaceOutcome {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

type WorkloadEntries = HashMap<ScheduleIdentity, TriggerHandle>;

pub struct ScheduleManager {
    trigger: Arc<dyn TriggerPrimitive>,
    handler: Arc<dyn FireHandler>,
    /// Registered triggers: workload → identity → handle.
    entries: Mutex<HashMap<WorkloadId, WorkloadEntries>>,
}

impl ScheduleManager {
    pub fn new(trigger: Arc<dyn TriggerPrimitive>, handler: Arc<dyn FireHandler>) -> Self {
        Self {
            trigger,
            handler,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Make the registered triggers for `workload` match `schedules` exactly.
    ///
    /// Duplicate schedules collapse to one trigger. An empty list removes
    /// every trigger for the workload. Schedules that fail to register are
    /// reported in [`SchedulerError::Registration`]; the rest are applied.
    pub async fn replace_workload_schedules(
        &self,
        workload: &WorkloadId,
        schedules: &[ScheduleSpec],
    ) -> SchedulerResult<ReplaceOutcome> {
        let mut failures = Vec::new();
        let mut desired: BTreeMap<ScheduleIdentity, &ScheduleSpec> = BTreeMap::new();
        for spec in schedules {
            match ScheduleIdentity::of(spec) {
                Ok(identity) => {
                    desired.entry(identity).or_insert(spec);
                }
                Err(e) => failures.push(RegistrationFailure {
                    cron: spec.cron.clone(),
                    identity: None,
                    reason: e.to_string(),
                }),
            }
        }

        let mut table = self.entries.lock().await;

        if schedules.is_empty() {
            let removed = match table.remove(workload) {
                Some(entries) => self.remove_triggers(entries),
                None => 0,
            };
            if removed > 0 {
                info!(%workload, removed, "workload schedules cleared");
            }
            return Ok(ReplaceOutcome {
                removed,
                ..ReplaceOutcome::default()
            });
        }

        let mut outcome = ReplaceOutcome::default();
        let registered = table.entry(workload.clone()).or_default();

        for (identity, spec) in &desired {
            if registered.contains_key(identity) {
                outcome.unchanged += 1;
                continue;
            }
            let job = self.job_for(workload, identity, spec);
            match self.trigger.add(&spec.trigger_spec(), job) {
                Ok(handle) => {
                    debug!(%workload, %identity, %handle, "schedule registered");
                    registered.insert(identity.clone(), handle);
                    outcome.added += 1;
                }
                Err(e) => {
                    warn!(%workload, %identity, cron = %spec.cron, error = %e, "schedule registration failed");
                    failures.push(RegistrationFailure {
                        cron: spec.cron.clone(),
                        identity: Some(identity.clone()),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let stale: Vec<ScheduleIdentity> = registered
            .keys()
            .filter(|identity| !desired.contains_key(*identity))
            .cloned()
            .collect();
        for identity in stale {
            if let Some(handle) = registered.remove(&identity) {
                self.trigger.remove(handle);
                debug!(%workload, %identity, %handle, "schedule removed");
                outcome.removed += 1;
            }
        }

        if registered.is_empty() {
            table.remove(workload);
        }

        if !outcome.is_noop() {
            info!(
                %workload,
                added = outcome.added,
                removed = outcome.removed,
                unchanged = outcome.unchanged,
                "workload schedules replaced"
            );
        }

        if failures.is_empty() {
            Ok(outcome)
        } else {
            Err(SchedulerError::Registration {
                workload: workload.clone(),
                failures,
                applied: outcome,
            })
        }
    }

    /// Remove every trigger for a workload. Returns how many were removed.
    pub async fn remove_workload(&self, workload: &WorkloadId) -> usize {
        let entries = self.entries.lock().await.remove(workload);
        entries.map(|e| self.remove_triggers(e)).unwrap_or(0)
    }

    /// Identities currently registered for a workload, sorted.
    pub async fn registered(&self, workload: &WorkloadId) -> Vec<ScheduleIdentity> {
        let table = self.entries.lock().await;
        let mut ids: Vec<_> = table
            .get(workload)
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Handle registered for one schedule of a workload.
    pub async fn handle_of(
        &self,
        workload: &WorkloadId,
        identity: &ScheduleIdentity,
    ) -> Option<TriggerHandle> {
        let table = self.entries.lock().await;
        table.get(workload).and_then(|e| e.get(identity)).copied()
    }

    /// Workloads with at least one registered trigger.
    pub async fn workloads(&self) -> Vec<WorkloadId> {
        let table = self.entries.lock().await;
        let mut ids: Vec<_> = table.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Total registered triggers across all workloads.
    pub async fn trigger_count(&self) -> usize {
        self.entries.lock().await.values().map(HashMap::len).sum()
    }

    /// Remove every trigger and stop the trigger primitive.
    pub async fn shutdown(&self) {
        let mut table = self.entries.lock().await;
        let removed: usize = table.drain().map(|(_, e)| self.remove_triggers(e)).sum();
        self.trigger.stop();
        info!(removed, "schedule manager stopped");
    }

    fn remove_triggers(&self, entries: WorkloadEntries) -> usize {
        let count = entries.len();
        for handle in entries.into_values() {
            self.trigger.remove(handle);
        }
        count
    }

    fn job_for(&self, workload: &WorkloadId, identity: &ScheduleIdentity, spec: &ScheduleSpec) -> Job {
        let handler = self.handler.clone();
        let workload = workload.clone();
        let identity = identity.clone();
        let spec = spec.clone();
        Arc::new(move || {
            let handler = handler.clone();
            let workload = workload.clone();
            let identity = identity.clone();
            let spec = spec.clone();
            Box::pin(async move {
                handler.fire(&workload, &identity, &spec).await;
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use warpcron_trigger::{TriggerError, TriggerResult, parse_spec};

    /// Validates specs like the real engine but never fires on its own.
    #[derive(Default)]
    struct RecordingTrigger {
        next: AtomicU64,
        live: StdMutex<HashMap<TriggerHandle, (String, Job)>>,
        adds: AtomicUsize,
        removes: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl RecordingTrigger {
        fn live_specs(&self) -> Vec<String> {
            let mut specs: Vec<_> = self.live.lock().unwrap().values().map(|(s, _)| s.clone()).collect();
            specs.sort();
            specs
        }

        async fn fire_all(&self) {
            let jobs: Vec<Job> = self.live.lock().unwrap().values().map(|(_, j)| j.clone()).collect();
            for job in jobs {
                job().await;
            }
        }
    }

    impl TriggerPrimitive for RecordingTrigger {
        fn add(&self, spec: &str, job: Job) -> TriggerResult<TriggerHandle> {
            parse_spec(spec)?;
            let handle = TriggerHandle::new(self.next.fetch_add(1, Ordering::SeqCst));
            self.live.lock().unwrap().insert(handle, (spec.to_string(), job));
            self.adds.fetch_add(1, Ordering::SeqCst);
            Ok(handle)
        }

        fn remove(&self, handle: TriggerHandle) -> bool {
            self.removes.fetch_add(1, Ordering::SeqCst);
            self.live.lock().unwrap().remove(&handle).is_some()
        }

        fn stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        fired: StdMutex<Vec<(WorkloadId, ScheduleIdentity, String)>>,
    }

    #[async_trait]
    impl FireHandler for RecordingHandler {
        async fn fire(&self, workload: &WorkloadId, identity: &ScheduleIdentity, schedule: &ScheduleSpec) {
            self.fired
                .lock()
                .unwrap()
                .push((workload.clone(), identity.clone(), schedule.cron.clone()));
        }
    }

    fn setup() -> (ScheduleManager, Arc<RecordingTrigger>, Arc<RecordingHandler>) {
        let trigger = Arc::new(RecordingTrigger::default());
        let handler = Arc::new(RecordingHandler::default());
        let manager = ScheduleManager::new(trigger.clone(), handler.clone());
        (manager, trigger, handler)
    }

    fn workload(name: &str) -> WorkloadId {
        WorkloadId::new(name, "env-1")
    }

    #[tokio::test]
    async fn test_update_then_delete_lifecycle() {
        let (manager, trigger, _) = setup();
        let w = workload("nightly");

        let first = manager
            .replace_workload_schedules(&w, &[ScheduleSpec::new("* * * * *")])
            .await
            .unwrap();
        assert_eq!(first.added, 1);
        let old_id = ScheduleIdentity::of(&ScheduleSpec::new("* * * * *")).unwrap();
        let old_handle = manager.handle_of(&w, &old_id).await.unwrap();

        let second = manager
            .replace_workload_schedules(&w, &[ScheduleSpec::new("0 * * * *")])
            .await
            .unwrap();
        assert_eq!((second.added, second.removed), (1, 1));
        let new_id = ScheduleIdentity::of(&ScheduleSpec::new("0 * * * *")).unwrap();
        assert_ne!(manager.handle_of(&w, &new_id).await.unwrap(), old_handle);
        assert_eq!(trigger.live_specs(), vec!["0 * * * *".to_string()]);

        let cleared = manager.replace_workload_schedules(&w, &[]).await.unwrap();
        assert_eq!(cleared.removed, 1);
        assert_eq!(manager.trigger_count().await, 0);
        assert!(manager.workloads().await.is_empty());
        assert!(trigger.live_specs().is_empty());
    }

    #[tokio::test]
    async fn test_config_value_distinguishes_schedules() {
        let (manager, trigger, _) = setup();
        let w = workload("matrix");
        let schedules = vec![
            ScheduleSpec::new("*/10 * * * *").with_config("env", "staging"),
            ScheduleSpec::new("*/10 * * * *").with_config("env", "prod"),
        ];

        let outcome = manager.replace_workload_schedules(&w, &schedules).await.unwrap();
        assert_eq!(outcome.added, 2);
        assert_eq!(manager.registered(&w).await.len(), 2);
        assert_eq!(trigger.live.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_schedules_collapse() {
        let (manager, _, _) = setup();
        let w = workload("dup");
        let spec = ScheduleSpec::new("0 7 * * *").with_config("a", "1");

        let outcome = manager
            .replace_workload_schedules(&w, &[spec.clone(), spec])
            .await
            .unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(manager.trigger_count().await, 1);
    }

    #[tokio::test]
    async fn test_repeat_replace_is_noop() {
        let (manager, trigger, _) = setup();
        let w = workload("steady");
        let schedules = vec![
            ScheduleSpec::new("0 * * * *"),
            ScheduleSpec::new("30 6 * * 1-5").with_timezone("Europe/Warsaw"),
        ];

        manager.replace_workload_schedules(&w, &schedules).await.unwrap();
        let adds = trigger.adds.load(Ordering::SeqCst);

        let outcome = manager.replace_workload_schedules(&w, &schedules).await.unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.unchanged, 2);
        assert_eq!(trigger.adds.load(Ordering::SeqCst), adds);
        assert_eq!(trigger.removes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_cron_is_isolated() {
        let (manager, _, _) = setup();
        let w = workload("partial");
        let schedules = vec![ScheduleSpec::new("bad cron"), ScheduleSpec::new("0 * * * *")];

        let err = manager.replace_workload_schedules(&w, &schedules).await.unwrap_err();
        let SchedulerError::Registration {
            workload: failed,
            failures,
            applied,
        } = err;
        assert_eq!(failed, w);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].cron, "bad cron");
        assert!(failures[0].identity.is_some());
        assert_eq!(applied.added, 1);

        let valid = ScheduleIdentity::of(&ScheduleSpec::new("0 * * * *")).unwrap();
        assert_eq!(manager.registered(&w).await, vec![valid]);
    }

    #[tokio::test]
    async fn test_unknown_timezone_is_isolated() {
        let (manager, _, _) = setup();
        let w = workload("zoned");
        let schedules = vec![
            ScheduleSpec::new("0 7 * * *").with_timezone("Nowhere/Special"),
            ScheduleSpec::new("0 8 * * *").with_timezone("Asia/Tokyo"),
        ];
        let err = manager.replace_workload_schedules(&w, &schedules).await.unwrap_err();
        assert!(err.to_string().contains("1 schedule(s)"));
        assert_eq!(manager.trigger_count().await, 1);
    }

    #[tokio::test]
    async fn test_sequence_converges_to_last_list() {
        let (manager, trigger, _) = setup();
        let w = workload("converge");
        let rounds: Vec<Vec<ScheduleSpec>> = vec![
            vec![ScheduleSpec::new("* * * * *"), ScheduleSpec::new("0 * * * *")],
            vec![],
            vec![ScheduleSpec::new("5 4 * * *")],
            vec![
                ScheduleSpec::new("5 4 * * *"),
                ScheduleSpec::new("0 0 * * 0").with_config("k", "v"),
                ScheduleSpec::new("0 * * * *"),
            ],
            vec![ScheduleSpec::new("0 * * * *"), ScheduleSpec::new("0 0 * * 0").with_config("k", "v")],
        ];
        for round in &rounds {
            manager.replace_workload_schedules(&w, round).await.unwrap();
        }

        let last = rounds.last().unwrap();
        let mut expected: Vec<_> = last.iter().map(|s| ScheduleIdentity::of(s).unwrap()).collect();
        expected.sort();
        assert_eq!(manager.registered(&w).await, expected);
        assert_eq!(trigger.live.lock().unwrap().len(), last.len());
    }

    #[tokio::test]
    async fn test_workloads_are_independent() {
        let (manager, _, _) = setup();
        let a = workload("a");
        let b = workload("b");
        let spec = ScheduleSpec::new("0 * * * *");

        manager.replace_workload_schedules(&a, &[spec.clone()]).await.unwrap();
        manager.replace_workload_schedules(&b, &[spec]).await.unwrap();
        assert_eq!(manager.trigger_count().await, 2);

        assert_eq!(manager.remove_workload(&a).await, 1);
        assert_eq!(manager.workloads().await, vec![b]);
    }

    #[tokio::test]
    async fn test_fire_reaches_handler() {
        let (manager, trigger, handler) = setup();
        let w = workload("fires");
        let spec = ScheduleSpec::new("*/5 * * * *").with_config("browser", "chrome");
        manager.replace_workload_schedules(&w, &[spec.clone()]).await.unwrap();

        trigger.fire_all().await;

        let fired = handler.fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, w);
        assert_eq!(fired[0].1, ScheduleIdentity::of(&spec).unwrap());
        assert_eq!(fired[0].2, "*/5 * * * *");
    }

    #[tokio::test]
    async fn test_shutdown_removes_everything_and_stops() {
        let (manager, trigger, _) = setup();
        manager
            .replace_workload_schedules(&workload("x"), &[ScheduleSpec::new("0 * * * *")])
            .await
            .unwrap();
        manager
            .replace_workload_schedules(&workload("y"), &[ScheduleSpec::new("1 * * * *")])
            .await
            .unwrap();

        manager.shutdown().await;
        assert_eq!(manager.trigger_count().await, 0);
        assert!(trigger.live_specs().is_empty());
        assert_eq!(trigger.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stopped_trigger_reports_failures() {
        let trigger = Arc::new(warpcron_trigger::CronEngine::new());
        let manager = ScheduleManager::new(trigger.clone(), Arc::new(RecordingHandler::default()));
        trigger.stop();

        let err = manager
            .replace_workload_schedules(&workload("late"), &[ScheduleSpec::new("0 * * * *")])
            .await
            .unwrap_err();
        let SchedulerError::Registration { failures, .. } = err;
        assert_eq!(failures[0].reason, TriggerError::Stopped.to_string());
    }

    fn identities(schedules: &[ScheduleSpec]) -> Vec<ScheduleIdentity> {
        let mut ids: Vec<_> = schedules
            .iter()
            .map(|s| ScheduleIdentity::of(s).unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replaces_leave_one_submitted_set() {
        let (manager, trigger, _) = setup();
        let manager = Arc::new(manager);
        let w = workload("contended");
        let lists: Vec<Vec<ScheduleSpec>> = (0..16)
            .map(|i| {
                (0..=i % 4)
                    .map(|m| ScheduleSpec::new(format!("{m} {i} * * *")))
                    .collect()
            })
            .collect();

        let mut tasks = tokio::task::JoinSet::new();
        for list in lists.clone() {
            let manager = manager.clone();
            let w = w.clone();
            tasks.spawn(async move {
                manager.replace_workload_schedules(&w, &list).await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let registered = manager.registered(&w).await;
        let winner = lists
            .iter()
            .find(|list| identities(list) == registered)
            .expect("registered set must equal one submitted list");

        let mut expected: Vec<String> = winner.iter().map(|s| s.cron.clone()).collect();
        expected.sort();
        assert_eq!(trigger.live_specs(), expected);
        assert_eq!(manager.trigger_count().await, registered.len());
        assert_eq!(
            trigger.adds.load(Ordering::SeqCst) - trigger.removes.load(Ordering::SeqCst),
            registered.len()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fire_races_replace_without_blocking() {
        let (manager, trigger, handler) = setup();
        let manager = Arc::new(manager);
        let w = workload("racing");
        let a = vec![ScheduleSpec::new("* * * * *")];
        let b = vec![ScheduleSpec::new("0 * * * *"), ScheduleSpec::new("30 * * * *")];
        manager.replace_workload_schedules(&w, &a).await.unwrap();

        let replacing = tokio::spawn({
            let (manager, w, a, b) = (manager.clone(), w.clone(), a.clone(), b.clone());
            async move {
                for i in 0..50 {
                    let list = if i % 2 == 0 { &b } else { &a };
                    manager.replace_workload_schedules(&w, list).await.unwrap();
                    tokio::task::yield_now().await;
                }
            }
        });
        let firing = tokio::spawn({
            let trigger = trigger.clone();
            async move {
                for _ in 0..50 {
                    trigger.fire_all().await;
                    tokio::task::yield_now().await;
                }
            }
        });
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            replacing.await.unwrap();
            firing.await.unwrap();
        })
        .await
        .expect("fire and replace blocked each other");

        // The last replace (i = 49) applied `a`.
        assert_eq!(trigger.live_specs(), vec!["* * * * *".to_string()]);
        assert_eq!(manager.registered(&w).await, identities(&a));

        let known = ["* * * * *", "0 * * * *", "30 * * * *"];
        let fired = handler.fired.lock().unwrap();
        assert!(!fired.is_empty());
        for (fired_for, _, cron) in fired.iter() {
            assert_eq!(fired_for, &w);
            assert!(known.contains(&cron.as_str()), "unexpected fire for {cron}");
        }
    }
}
