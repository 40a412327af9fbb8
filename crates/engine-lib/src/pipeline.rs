//! Per-workload remediation pipeline
//!
//! Incidents for the same workload are serialized through a dedicated
//! worker task so the policy engine always observes a consistent history
//! and the executor never races itself on one spec. Workers are created
//! lazily per workload key and torn down after an idle period; incidents
//! for distinct workloads proceed fully in parallel.
//!
//! Each worker runs classify -> policy -> guard -> execute and writes
//! exactly one history record per incident.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::classify::{classify, Classification};
use crate::error::EngineError;
use crate::executor::{ActionExecutor, Execution};
use crate::guard::{self, Verdict};
use crate::history::HistoryStore;
use crate::models::{
    reason, ActionResult, HistoryRecord, Incident, Outcome, RemediationAction,
};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::policy::PolicyEngine;

/// Configuration for the pipeline's worker model
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long an idle worker lingers before exiting
    pub worker_idle_timeout: Duration,
    /// Queue depth per workload worker
    pub queue_depth: usize,
    /// How long completed results stay available for polling
    pub result_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_idle_timeout: Duration::from_secs(60),
            queue_depth: 64,
            result_retention: Duration::from_secs(3600),
        }
    }
}

/// Status of a submitted incident, for id-correlated polling
#[derive(Debug, Clone)]
pub enum IncidentStatus {
    Pending,
    Completed(ActionResult),
}

/// One queued unit of work for a workload worker
struct Job {
    incident: Incident,
    reply: oneshot::Sender<Result<ActionResult, EngineError>>,
}

/// Pipeline statistics
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub active_workers: usize,
    pub cached_results: usize,
}

/// The incident processing pipeline
pub struct RemediationPipeline {
    policy_engine: PolicyEngine,
    executor: ActionExecutor,
    history: Arc<HistoryStore>,
    workers: DashMap<String, mpsc::Sender<Job>>,
    results: DashMap<String, (IncidentStatus, Instant)>,
    config: PipelineConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl RemediationPipeline {
    pub fn new(
        policy_engine: PolicyEngine,
        executor: ActionExecutor,
        history: Arc<HistoryStore>,
        config: PipelineConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            policy_engine,
            executor,
            history,
            workers: DashMap::new(),
            results: DashMap::new(),
            config,
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    /// Submit an incident and await its terminal result
    pub async fn submit(self: &Arc<Self>, incident: Incident) -> Result<ActionResult, EngineError> {
        let incident_id = incident.id.clone();
        let workload_key = incident.workload.key();

        self.metrics.inc_incidents_received();
        self.logger.log_incident_received(
            &incident_id,
            &workload_key,
            &incident.incident_type.to_string(),
        );
        self.results
            .insert(incident_id.clone(), (IncidentStatus::Pending, Instant::now()));
        self.prune_results();

        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(Job {
            incident,
            reply: reply_tx,
        })
        .await;

        match reply_rx.await {
            Ok(result) => {
                match &result {
                    Ok(action_result) => {
                        self.results.insert(
                            incident_id,
                            (
                                IncidentStatus::Completed(action_result.clone()),
                                Instant::now(),
                            ),
                        );
                    }
                    Err(_) => {
                        self.results.remove(&incident_id);
                    }
                }
                result
            }
            Err(_) => {
                self.results.remove(&incident_id);
                Err(EngineError::WorkerTerminated {
                    workload: workload_key,
                })
            }
        }
    }

    /// Look up the status of a previously submitted incident
    pub fn status(&self, incident_id: &str) -> Option<IncidentStatus> {
        self.results.get(incident_id).map(|r| r.value().0.clone())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            active_workers: self.workers.len(),
            cached_results: self.results.len(),
        }
    }

    /// Route a job to its workload's worker, spawning one if needed
    ///
    /// A worker may close its queue while tearing down; the send result
    /// tells us to drop the stale entry and spawn a fresh one.
    fn dispatch<'a>(
        self: &'a Arc<Self>,
        mut job: Job,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let key = job.incident.workload.key();

        loop {
            let sender = match self.workers.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    let (tx, rx) = mpsc::channel(self.config.queue_depth);
                    entry.insert(tx.clone());
                    let pipeline = Arc::clone(self);
                    let worker_key = key.clone();
                    tokio::spawn(async move {
                        pipeline.worker_loop(worker_key, rx).await;
                    });
                    self.metrics.set_active_workers(self.workers.len() as i64);
                    tx
                }
            };

            match sender.send(job).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    job = returned;
                    self.workers.remove_if(&key, |_, s| s.is_closed());
                }
            }
        }
        })
    }

    /// Sequential processing loop for one workload
    async fn worker_loop(self: Arc<Self>, key: String, mut rx: mpsc::Receiver<Job>) {
        debug!(workload = %key, "Workload worker started");

        loop {
            match tokio::time::timeout(self.config.worker_idle_timeout, rx.recv()).await {
                Ok(Some(job)) => {
                    let result = self.process(job.incident).await;
                    let _ = job.reply.send(result);
                }
                Ok(None) => break,
                Err(_) => {
                    // Idle: stop accepting first, then deregister. A job
                    // that raced into the queue is re-routed to a fresh
                    // worker so no two workers ever process one workload.
                    rx.close();
                    self.workers.remove_if(&key, |_, sender| sender.is_closed());
                    while let Some(job) = rx.recv().await {
                        self.dispatch(job).await;
                    }
                    break;
                }
            }
        }

        self.metrics.set_active_workers(self.workers.len() as i64);
        debug!(workload = %key, "Workload worker stopped");
    }

    /// Process one incident to its terminal outcome
    async fn process(&self, incident: Incident) -> Result<ActionResult, EngineError> {
        let started = Instant::now();
        let now = Utc::now();

        let (action, rejected) = match classify(&incident) {
            Classification::Unclassified { reason: why } => {
                info!(
                    incident_id = %incident.id,
                    workload = %incident.workload,
                    reason = %why,
                    "Incident unclassified"
                );
                (
                    RemediationAction::noop(incident.workload.clone(), reason::UNCLASSIFIED),
                    None,
                )
            }
            Classification::Classified(classified) => {
                let action = self
                    .policy_engine
                    .evaluate(&incident.workload, &classified);

                let rejected = if action.is_mutating() {
                    match self
                        .policy_engine
                        .policies()
                        .lookup(classified.incident_type)
                    {
                        Some(policy) => {
                            let history = self.history.all_for(&incident.workload).await;
                            match guard::check(
                                classified.incident_type,
                                &action,
                                policy,
                                &history,
                                now,
                            ) {
                                Verdict::Approved => None,
                                Verdict::Rejected { reason_code } => Some(reason_code),
                            }
                        }
                        None => None,
                    }
                } else {
                    None
                };

                (action, rejected)
            }
        };

        let execution = match rejected {
            Some(reason_code) => {
                warn!(
                    incident_id = %incident.id,
                    workload = %incident.workload,
                    reason_code = %reason_code,
                    "Candidate rejected by safety guard"
                );
                Execution {
                    outcome: Outcome::Rejected,
                    reason_code: reason_code.to_string(),
                }
            }
            None => {
                if action.is_mutating() {
                    let apply_started = Instant::now();
                    let execution = self.executor.execute(&action).await;
                    self.metrics
                        .observe_apply_latency(apply_started.elapsed().as_secs_f64());
                    execution
                } else {
                    self.executor.execute(&action).await
                }
            }
        };

        let record = HistoryRecord {
            incident_id: incident.id.clone(),
            workload: incident.workload.clone(),
            incident_type: incident.incident_type,
            action_kind: action.kind,
            field_path: action.field_path.clone(),
            old_value: action.old_value.clone(),
            new_value: action.new_value.clone(),
            applied_at: now,
            outcome: execution.outcome,
            reason_code: execution.reason_code.clone(),
        };

        self.history
            .append(record.clone())
            .await
            .map_err(|cause| EngineError::HistoryAppend { cause })?;
        self.metrics
            .set_history_records(self.history.stats().await.records as i64);

        self.metrics
            .inc_outcome(&record.outcome.to_string(), &record.reason_code);
        self.metrics
            .observe_processing_latency(started.elapsed().as_secs_f64());

        self.logger.log_outcome(
            &record.incident_id,
            &record.workload.to_string(),
            &record.incident_type.to_string(),
            &record.action_kind.to_string(),
            &record.outcome.to_string(),
            &record.reason_code,
        );
        if record.outcome == Outcome::Applied {
            if let (Some(path), Some(old), Some(new)) = (
                record.field_path.as_deref(),
                record.old_value.as_ref().and_then(|v| v.as_f64()),
                record.new_value.as_ref().and_then(|v| v.as_f64()),
            ) {
                self.logger
                    .log_patch_applied(&record.workload.to_string(), path, old, new);
            }
        }

        Ok(ActionResult::from_record(&record))
    }

    /// Drop cached results older than the retention period
    fn prune_results(&self) {
        let retention = self.config.result_retention;
        self.results
            .retain(|_, (_, inserted)| inserted.elapsed() < retention);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::executor::{
        async_trait, ClusterClient, ExecutorConfig, FieldPatch, VersionToken, WorkloadSpec,
    };
    use crate::history::{HistoryConfig, HistoryStore};
    use crate::models::{ActionKind, IncidentType, ParamValue, WorkloadRef};
    use crate::policy::PolicySet;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// In-memory cluster tracking concurrent access per workload
    struct TestCluster {
        specs: Mutex<HashMap<String, (serde_json::Value, u32)>>,
        reads: AtomicU32,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
        read_delay: Duration,
    }

    impl TestCluster {
        fn new() -> Self {
            Self {
                specs: Mutex::new(HashMap::new()),
                reads: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
                read_delay: Duration::from_millis(0),
            }
        }

        fn with_read_delay(mut self, delay: Duration) -> Self {
            self.read_delay = delay;
            self
        }

        fn put_workload(&self, workload: &WorkloadRef, memory_limit_mi: f64) {
            self.specs.lock().unwrap().insert(
                workload.key(),
                (
                    serde_json::json!({
                        "spec": { "resources": { "limits": { "memoryMi": memory_limit_mi } } }
                    }),
                    1,
                ),
            );
        }

        fn memory_of(&self, workload: &WorkloadRef) -> f64 {
            self.specs.lock().unwrap()[&workload.key()].0["spec"]["resources"]["limits"]
                ["memoryMi"]
                .as_f64()
                .unwrap()
        }
    }

    #[async_trait]
    impl ClusterClient for TestCluster {
        async fn read(
            &self,
            workload: &WorkloadRef,
        ) -> Result<(WorkloadSpec, VersionToken), ClusterError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.read_delay).await;

            let result = {
                let specs = self.specs.lock().unwrap();
                match specs.get(&workload.key()) {
                    Some((spec, version)) => {
                        Ok((WorkloadSpec(spec.clone()), VersionToken(version.to_string())))
                    }
                    None => Err(ClusterError::NotFound),
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn write_if_version(
            &self,
            workload: &WorkloadRef,
            version: &VersionToken,
            patch: &FieldPatch,
        ) -> Result<(), ClusterError> {
            let mut specs = self.specs.lock().unwrap();
            let (spec, current_version) = specs
                .get_mut(&workload.key())
                .ok_or(ClusterError::NotFound)?;

            if version.0 != current_version.to_string() {
                return Err(ClusterError::Conflict);
            }

            let parts: Vec<&str> = patch.path.split('.').collect();
            let mut node = spec;
            for part in &parts[..parts.len() - 1] {
                node = node.get_mut(part).ok_or(ClusterError::NotFound)?;
            }
            if let ParamValue::Number(n) = &patch.value {
                node[parts[parts.len() - 1]] = serde_json::json!(n);
            }
            *current_version += 1;
            Ok(())
        }

        async fn terminate(
            &self,
            _workload: &WorkloadRef,
            _instance: &str,
        ) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    fn workload(name: &str) -> WorkloadRef {
        WorkloadRef::new("Deployment", "default", name)
    }

    fn oom_incident(name: &str, limit_mi: f64) -> Incident {
        let mut parameters = HashMap::new();
        parameters.insert(
            "currentMemoryLimitMi".to_string(),
            ParamValue::Number(limit_mi),
        );
        Incident {
            id: uuid::Uuid::new_v4().to_string(),
            incident_type: IncidentType::OomKilled,
            detected_at: Utc::now(),
            workload: workload(name),
            instances: Vec::new(),
            parameters,
        }
    }

    fn build_pipeline(
        cluster: Arc<TestCluster>,
        policies: PolicySet,
        config: PipelineConfig,
    ) -> Arc<RemediationPipeline> {
        let policy_engine = PolicyEngine::new(Arc::new(policies));
        let executor = ActionExecutor::new(
            cluster,
            ExecutorConfig {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
                ..Default::default()
            },
        );
        let history = Arc::new(HistoryStore::new(HistoryConfig::default()));

        Arc::new(RemediationPipeline::new(
            policy_engine,
            executor,
            history,
            config,
            StructuredLogger::new("test"),
        ))
    }

    fn default_pipeline(cluster: Arc<TestCluster>) -> Arc<RemediationPipeline> {
        build_pipeline(cluster, PolicySet::defaults(), PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_oom_incident_applied_end_to_end() {
        let cluster = Arc::new(TestCluster::new());
        cluster.put_workload(&workload("api"), 96.0);
        let pipeline = default_pipeline(cluster.clone());

        let result = pipeline.submit(oom_incident("api", 96.0)).await.unwrap();

        assert_eq!(result.outcome, Outcome::Applied);
        assert_eq!(result.action_kind, ActionKind::PatchResourceSpec);
        assert_eq!(result.new_value, Some(ParamValue::Number(240.0)));
        assert_eq!(cluster.memory_of(&workload("api")), 240.0);
    }

    #[tokio::test]
    async fn test_repeat_within_cooldown_rejected() {
        let cluster = Arc::new(TestCluster::new());
        cluster.put_workload(&workload("api"), 96.0);
        let pipeline = default_pipeline(cluster.clone());

        let first = pipeline.submit(oom_incident("api", 96.0)).await.unwrap();
        assert_eq!(first.outcome, Outcome::Applied);

        // Replaying within the cooldown window never mutates again
        let second = pipeline.submit(oom_incident("api", 96.0)).await.unwrap();
        assert_eq!(second.outcome, Outcome::Rejected);
        assert_eq!(second.reason_code, reason::COOLDOWN_ACTIVE);
        assert_eq!(cluster.memory_of(&workload("api")), 240.0);
    }

    #[tokio::test]
    async fn test_no_policy_yields_noop_record() {
        let cluster = Arc::new(TestCluster::new());
        cluster.put_workload(&workload("api"), 96.0);
        let pipeline = build_pipeline(
            cluster.clone(),
            PolicySet::default(),
            PipelineConfig::default(),
        );

        let result = pipeline.submit(oom_incident("api", 96.0)).await.unwrap();

        assert_eq!(result.outcome, Outcome::Applied);
        assert_eq!(result.action_kind, ActionKind::NoOp);
        assert_eq!(result.reason_code, reason::NO_POLICY);
        assert_eq!(cluster.memory_of(&workload("api")), 96.0);
    }

    #[tokio::test]
    async fn test_unclassified_yields_noop_record() {
        let cluster = Arc::new(TestCluster::new());
        let pipeline = default_pipeline(cluster);

        // OOM incident without the required limit parameter
        let mut incident = oom_incident("api", 96.0);
        incident.parameters.clear();

        let result = pipeline.submit(incident).await.unwrap();

        assert_eq!(result.outcome, Outcome::Applied);
        assert_eq!(result.action_kind, ActionKind::NoOp);
        assert_eq!(result.reason_code, reason::UNCLASSIFIED);
    }

    #[tokio::test]
    async fn test_exactly_one_record_per_incident() {
        let cluster = Arc::new(TestCluster::new());
        cluster.put_workload(&workload("api"), 96.0);
        let pipeline = default_pipeline(cluster);

        for _ in 0..4 {
            pipeline.submit(oom_incident("api", 96.0)).await.unwrap();
        }

        let records = pipeline.history.all_for(&workload("api")).await;
        assert_eq!(records.len(), 4);
        // One Applied, three cooldown rejections
        let applied = records
            .iter()
            .filter(|r| r.outcome == Outcome::Applied)
            .count();
        assert_eq!(applied, 1);
    }

    /// Policy set without cooldown or rate limiting, so every
    /// submission reaches the executor
    fn permissive_policies() -> PolicySet {
        let json = r#"{
            "oom_killed": {
                "action": "patch_resource_spec",
                "field_path": "spec.resources.limits.memoryMi",
                "multiplier": 2.5,
                "max_value": 1024,
                "cooldown_secs": 0,
                "max_actions_per_window": 1000,
                "window_secs": 3600
            }
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_same_workload_submissions_are_serialized() {
        let cluster = Arc::new(TestCluster::new().with_read_delay(Duration::from_millis(20)));
        cluster.put_workload(&workload("api"), 96.0);
        let pipeline = build_pipeline(
            cluster.clone(),
            permissive_policies(),
            PipelineConfig::default(),
        );

        let mut handles = Vec::new();
        for _ in 0..5 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline.submit(oom_incident("api", 96.0)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every submission reached the executor, and the executor never
        // overlapped with itself on this workload
        assert!(cluster.reads.load(Ordering::SeqCst) >= 5);
        assert_eq!(cluster.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.history.all_for(&workload("api")).await.len(), 5);
    }

    #[tokio::test]
    async fn test_distinct_workloads_run_in_parallel() {
        let cluster = Arc::new(TestCluster::new().with_read_delay(Duration::from_millis(100)));
        for i in 0..4 {
            cluster.put_workload(&workload(&format!("api-{}", i)), 96.0);
        }
        let pipeline = default_pipeline(cluster.clone());

        let started = Instant::now();
        let mut handles = Vec::new();
        for i in 0..4 {
            let pipeline = pipeline.clone();
            let name = format!("api-{}", i);
            handles.push(tokio::spawn(async move {
                pipeline.submit(oom_incident(&name, 96.0)).await.unwrap()
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.outcome, Outcome::Applied);
        }

        // Serial execution would need at least 4 x 100ms
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_workload_gone_surfaces_failed() {
        let cluster = Arc::new(TestCluster::new());
        let pipeline = default_pipeline(cluster);

        // Workload never registered with the cluster
        let result = pipeline.submit(oom_incident("ghost", 96.0)).await.unwrap();

        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.reason_code, reason::WORKLOAD_GONE);
    }

    #[tokio::test]
    async fn test_result_polling() {
        let cluster = Arc::new(TestCluster::new());
        cluster.put_workload(&workload("api"), 96.0);
        let pipeline = default_pipeline(cluster);

        let result = pipeline.submit(oom_incident("api", 96.0)).await.unwrap();

        match pipeline.status(&result.incident_id) {
            Some(IncidentStatus::Completed(cached)) => {
                assert_eq!(cached.outcome, Outcome::Applied);
            }
            other => panic!("unexpected status: {:?}", other),
        }

        assert!(pipeline.status("unknown-id").is_none());
    }

    #[tokio::test]
    async fn test_idle_worker_teardown_and_respawn() {
        let cluster = Arc::new(TestCluster::new());
        cluster.put_workload(&workload("api"), 96.0);
        let config = PipelineConfig {
            worker_idle_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let pipeline = build_pipeline(cluster, PolicySet::defaults(), config);

        pipeline.submit(oom_incident("api", 96.0)).await.unwrap();
        assert_eq!(pipeline.stats().active_workers, 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(pipeline.stats().active_workers, 0);

        // A fresh worker is spawned for the next submission
        let result = pipeline.submit(oom_incident("api", 96.0)).await.unwrap();
        assert_eq!(result.outcome, Outcome::Rejected);
    }
}
