//! The provisioning loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleetgrid_bias::{BiasSource, Biaser};
use fleetgrid_manager::{CapacityBucket, ResourceManager};
use fleetgrid_policy::{create_launch_spec, determine_capacity_change, determine_spot_bids};
use fleetgrid_types::{Bid, Observation, WorkerTypePolicy};

use crate::config::ProvisionerConfig;
use crate::error::{ProvisionerError, ProvisionerResult};
use crate::stores::{PolicyStore, Queue, SecretRecord, SecretStore};
use crate::watchdog::Watchdog;

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Length of the single-use security token baked into worker user data.
const TOKEN_LEN: usize = 22;

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// The controller tying the reconciled cloud view, the pure capacity
/// logic, and the external stores together.
pub struct Provisioner {
    manager: ResourceManager,
    policy_store: Arc<dyn PolicyStore>,
    queue: Arc<dyn Queue>,
    secret_store: Arc<dyn SecretStore>,
    bias_source: Option<Arc<dyn BiasSource>>,
    biaser: Biaser,
    config: ProvisionerConfig,
    provisioner_id: String,
    consecutive_failures: u32,
}

impl Provisioner {
    pub fn new(
        manager: ResourceManager,
        policy_store: Arc<dyn PolicyStore>,
        queue: Arc<dyn Queue>,
        secret_store: Arc<dyn SecretStore>,
        config: ProvisionerConfig,
    ) -> Self {
        let biaser = Biaser::new(config.max_bias_age, config.kill_rate_multiplier);
        let provisioner_id = manager.config().provisioner_id.clone();
        Self {
            manager,
            policy_store,
            queue,
            secret_store,
            bias_source: None,
            biaser,
            config,
            provisioner_id,
            consecutive_failures: 0,
        }
    }

    /// Attach an external kill/fulfillment counter source. Without one
    /// the biaser stays empty and every combination ranks neutrally.
    pub fn with_bias_source(mut self, source: Arc<dyn BiasSource>) -> Self {
        self.bias_source = Some(source);
        self
    }

    // ── The iteration ──────────────────────────────────────────────

    /// One full pass: reconcile, housekeep, size every worker type, then
    /// submit the accumulated bids.
    pub async fn run_iteration(&mut self, watchdog: Option<&Watchdog>) -> ProvisionerResult<()> {
        let now = epoch_secs();
        let policies = self.policy_store.list_policies().await?;
        let worker_types: Vec<String> =
            policies.iter().map(|p| p.worker_type.clone()).collect();
        info!(policies = policies.len(), "iteration started");

        let observations = self.manager.update().await?;
        for obs in &observations {
            log_observation(obs);
        }

        if let Some(source) = &self.bias_source {
            let zones = self.manager.zones_by_region().clone();
            self.biaser.refresh(source.as_ref(), &zones, now).await;
        }

        self.housekeep(&policies, &worker_types, now).await;

        // Sizing phase: collect bids across all policies first, shrink
        // synchronously. Submission happens afterwards so one slow policy
        // cannot starve the others of pricing-table freshness.
        let mut bid_queue: VecDeque<(usize, Bid)> = VecDeque::new();
        for (idx, policy) in policies.iter().enumerate() {
            let pending_tasks = match self.queue.pending_tasks(&policy.worker_type).await {
                Ok(n) => n,
                Err(e) => {
                    error!(
                        worker_type = %policy.worker_type,
                        error = %e,
                        "backlog query failed, skipping policy this iteration"
                    );
                    continue;
                }
            };

            let running = self
                .manager
                .capacity_for_type(policy, &[CapacityBucket::Running]);
            let pending = self.manager.capacity_for_type(
                policy,
                &[CapacityBucket::Pending, CapacityBucket::SpotReq],
            );
            let change = determine_capacity_change(policy, running, pending, pending_tasks);
            debug!(
                worker_type = %policy.worker_type,
                running,
                pending,
                backlog = pending_tasks,
                change,
                "capacity evaluated"
            );

            let observed = self.manager.observed_state(policy);
            if let Err(e) = self.policy_store.put_observed_state(&observed).await {
                warn!(worker_type = %policy.worker_type, error = %e, "observed state not persisted");
            }

            if change > 0 {
                match determine_spot_bids(
                    policy,
                    &self.config.allowed_regions,
                    self.manager.pricing(),
                    change,
                    &self.biaser,
                    &self.config.bid,
                    now,
                ) {
                    Ok(bids) => bid_queue.extend(bids.into_iter().map(|b| (idx, b))),
                    Err(e) => {
                        error!(worker_type = %policy.worker_type, error = %e, "bid selection failed");
                    }
                }
            } else if change < 0 {
                // Excess capacity burns money every minute it lingers, so
                // a failed shrink fails the whole iteration.
                self.manager
                    .kill_capacity_of_worker_type(policy, -change, &CapacityBucket::ALL)
                    .await?;
            }
        }

        if let Some(dog) = watchdog {
            dog.touch();
        }
        self.submit_bids(&policies, bid_queue).await;

        info!("iteration finished");
        Ok(())
    }

    /// Best-effort housekeeping. None of this blocks provisioning; every
    /// failure is logged and retried next iteration anyway.
    async fn housekeep(&mut self, policies: &[WorkerTypePolicy], worker_types: &[String], now: u64) {
        self.manager.ensure_tags().await;
        if let Err(e) = self.manager.rogue_killer(worker_types).await {
            warn!(error = %e, "rogue kill incomplete");
        }
        match self.manager.zombie_killer(now).await {
            Ok(killed) if !killed.is_empty() => {
                info!(count = killed.len(), "zombie instances terminated");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "zombie kill incomplete"),
        }
        for policy in policies {
            if let Err(e) = self.manager.create_key_pair(&policy.worker_type).await {
                warn!(worker_type = %policy.worker_type, error = %e, "key pair not ensured");
            }
        }
    }

    /// Serialized submission of the shuffled bid queue. Failed bids are
    /// requeued after a backoff; the attempt budget is twice the queue
    /// length so a persistently failing bid cannot spin forever.
    async fn submit_bids(
        &mut self,
        policies: &[WorkerTypePolicy],
        mut queue: VecDeque<(usize, Bid)>,
    ) {
        {
            let slice = queue.make_contiguous();
            slice.shuffle(&mut rand::thread_rng());
        }

        let mut submitted = 0usize;
        let mut attempts_left = queue.len() * 2;
        while let Some((idx, bid)) = queue.pop_front() {
            if submitted >= self.config.max_bids_per_iteration || attempts_left == 0 {
                info!(
                    dropped = queue.len() + 1,
                    submitted, "bid budget exhausted, remaining bids dropped"
                );
                break;
            }
            attempts_left -= 1;
            let policy = &policies[idx];

            let token = generate_token();
            let key_name = self.manager.key_pair_name(&policy.worker_type);
            let launch_spec = match create_launch_spec(
                policy,
                &bid,
                &self.provisioner_id,
                &key_name,
                &token,
            ) {
                Ok(spec) => spec,
                Err(e) => {
                    // A policy that cannot materialize a launch spec will
                    // not fix itself by retrying within this iteration.
                    error!(worker_type = %policy.worker_type, error = %e, "launch spec rejected, bid dropped");
                    continue;
                }
            };

            match self.manager.request_spot_instance(policy, &bid, launch_spec).await {
                Ok(_request_id) => {
                    submitted += 1;
                    let record = SecretRecord {
                        token,
                        worker_type: policy.worker_type.clone(),
                        secrets: policy.secrets.clone(),
                        scopes: policy.scopes.clone(),
                        expires_at: epoch_secs() + self.config.secret_expiry.as_secs(),
                    };
                    // The bid is already in flight; a missing secret only
                    // strands that one worker, so log and move on.
                    if let Err(e) = self.secret_store.create_secret(&record).await {
                        error!(worker_type = %policy.worker_type, error = %e, "secret record not created");
                    }
                    tokio::time::sleep(self.config.bid_submit_delay).await;
                }
                Err(e) => {
                    warn!(
                        worker_type = %policy.worker_type,
                        region = %bid.region,
                        error = %e,
                        "bid submission failed, requeueing"
                    );
                    tokio::time::sleep(self.config.bid_failure_backoff).await;
                    queue.push_back((idx, bid));
                }
            }
        }
    }

    // ── The loop ───────────────────────────────────────────────────

    /// Record an iteration outcome against the circuit breaker. Returns
    /// true when the breaker trips.
    fn note_outcome(&mut self, ok: bool) -> bool {
        if ok {
            self.consecutive_failures = 0;
            return false;
        }
        self.consecutive_failures += 1;
        self.consecutive_failures >= self.config.max_consecutive_failures
    }

    /// Run iterations until shutdown is signalled or the breaker trips.
    ///
    /// Shutdown is honored between iterations only; an in-flight
    /// iteration always completes.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> ProvisionerResult<()> {
        let watchdog = Watchdog::spawn(
            self.config.watchdog_timeout,
            Box::new(|| {
                // The supervisor restarts us; a hung process it cannot see
                // is worse than a dead one it can.
                std::process::exit(70);
            }),
        );

        loop {
            let outcome = self.run_iteration(Some(&watchdog)).await;
            let failed = if let Err(e) = &outcome {
                error!(error = %e, failures = self.consecutive_failures + 1, "iteration failed");
                true
            } else {
                false
            };
            if self.note_outcome(!failed) {
                watchdog.stop();
                return Err(ProvisionerError::TooManyFailures(self.consecutive_failures));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.iteration_interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown requested, stopping provisioning loop");
                        watchdog.stop();
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn log_observation(obs: &Observation) {
    match obs {
        Observation::BidFulfilled {
            request_id,
            worker_type,
            region,
            zone,
            instance_type,
        } => info!(
            %request_id, %worker_type, %region, %zone, %instance_type,
            "bid fulfilled"
        ),
        Observation::BidFailed {
            request_id,
            worker_type,
            region,
            status_code,
            status_message,
        } => info!(
            %request_id, %worker_type, %region, %status_code, %status_message,
            "bid failed"
        ),
        Observation::InstanceTerminated {
            instance_id,
            worker_type,
            region,
            reason_code,
            spot_kill,
            bid_price,
            ..
        } => info!(
            %instance_id, %worker_type, %region, %reason_code, spot_kill,
            bid_price = ?bid_price,
            "instance terminated"
        ),
        Observation::RequestNeverAppeared {
            request_id,
            worker_type,
            region,
        } => warn!(
            %request_id, %worker_type, %region,
            "tracked bid never appeared in the cloud API"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use fleetgrid_cloud::{InMemoryCloud, Instance, InstanceState, PricePoint};
    use fleetgrid_manager::ManagerConfig;
    use fleetgrid_types::{InstanceTypeSpec, JsonObject, ObservedState, RegionSpec};

    use crate::stores::{StoreError, StoreResult};

    const PREFIX: &str = "fleetgrid:test:";

    // ── Stub collaborators ─────────────────────────────────────────

    struct StubQueue {
        backlog: Mutex<HashMap<String, i64>>,
        fail: AtomicBool,
    }

    impl StubQueue {
        fn with_backlog(worker_type: &str, tasks: i64) -> Arc<Self> {
            Arc::new(Self {
                backlog: Mutex::new(HashMap::from([(worker_type.to_string(), tasks)])),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Queue for StubQueue {
        async fn pending_tasks(&self, worker_type: &str) -> StoreResult<i64> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError("queue unreachable".to_string()));
            }
            Ok(*self.backlog.lock().unwrap().get(worker_type).unwrap_or(&0))
        }
    }

    struct StubPolicyStore {
        policies: Vec<WorkerTypePolicy>,
        observed: Mutex<Vec<ObservedState>>,
        fail_list: AtomicBool,
        fail_observed: AtomicBool,
    }

    impl StubPolicyStore {
        fn with_policies(policies: Vec<WorkerTypePolicy>) -> Arc<Self> {
            Arc::new(Self {
                policies,
                observed: Mutex::new(Vec::new()),
                fail_list: AtomicBool::new(false),
                fail_observed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl PolicyStore for StubPolicyStore {
        async fn list_policies(&self) -> StoreResult<Vec<WorkerTypePolicy>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(StoreError("policy store unreachable".to_string()));
            }
            Ok(self.policies.clone())
        }

        async fn put_observed_state(&self, state: &ObservedState) -> StoreResult<()> {
            if self.fail_observed.load(Ordering::SeqCst) {
                return Err(StoreError("policy store unreachable".to_string()));
            }
            self.observed.lock().unwrap().push(state.clone());
            Ok(())
        }
    }

    struct StubSecretStore {
        records: Mutex<Vec<SecretRecord>>,
        fail: AtomicBool,
    }

    impl StubSecretStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl SecretStore for StubSecretStore {
        async fn create_secret(&self, record: &SecretRecord) -> StoreResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError("secret store unreachable".to_string()));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    // ── Fixtures ───────────────────────────────────────────────────

    fn obj(v: serde_json::Value) -> JsonObject {
        v.as_object().expect("object literal").clone()
    }

    fn test_policy(worker_type: &str, max_capacity: i64) -> WorkerTypePolicy {
        WorkerTypePolicy {
            worker_type: worker_type.to_string(),
            min_capacity: 0,
            max_capacity,
            scaling_ratio: 0.0,
            min_price: 0.0,
            max_price: 10.0,
            instance_types: vec![InstanceTypeSpec {
                instance_type: "m5.large".to_string(),
                capacity: 1,
                utility: 1.0,
                launch_spec: JsonObject::new(),
                user_data: JsonObject::new(),
            }],
            regions: vec![RegionSpec {
                region: "us-west-2".to_string(),
                launch_spec: obj(serde_json::json!({"image_id": "ami-123"})),
                user_data: JsonObject::new(),
            }],
            availability_zones: vec![],
            launch_spec: obj(serde_json::json!({"security_groups": ["workers"]})),
            user_data: JsonObject::new(),
            secrets: serde_json::json!({"ci_token": "hunter2"}),
            scopes: vec!["worker:run".to_string()],
            last_modified: 1,
        }
    }

    fn test_cloud(now: u64) -> Arc<InMemoryCloud> {
        let cloud = Arc::new(InMemoryCloud::new(&["us-west-2"]));
        cloud.set_clock(now);
        cloud.add_price(
            "us-west-2",
            PricePoint {
                instance_type: "m5.large".to_string(),
                availability_zone: "us-west-2a".to_string(),
                price: 0.10,
                timestamp: now,
            },
        );
        cloud
    }

    fn test_manager(cloud: Arc<InMemoryCloud>) -> ResourceManager {
        ResourceManager::new(
            cloud,
            ManagerConfig {
                provisioner_id: "test".to_string(),
                key_prefix: PREFIX.to_string(),
                public_key: "ssh-rsa AAAAB3Nza test".to_string(),
                regions: vec!["us-west-2".to_string()],
                ..ManagerConfig::default()
            },
        )
    }

    fn test_config() -> ProvisionerConfig {
        ProvisionerConfig {
            iteration_interval: Duration::ZERO,
            allowed_regions: vec!["us-west-2".to_string()],
            bid_submit_delay: Duration::ZERO,
            bid_failure_backoff: Duration::ZERO,
            ..ProvisionerConfig::default()
        }
    }

    fn running_instance(id: &str, worker_type: &str, launch_time: u64) -> Instance {
        Instance {
            instance_id: id.to_string(),
            key_name: format!("{PREFIX}{worker_type}:abcd1234"),
            instance_type: "m5.large".to_string(),
            region: "us-west-2".to_string(),
            availability_zone: "us-west-2a".to_string(),
            image_id: "ami-123".to_string(),
            state: InstanceState::Running,
            bid_request_id: None,
            launch_time: Some(launch_time),
            state_reason: None,
            tags: HashMap::new(),
        }
    }

    // ── Iteration behavior ─────────────────────────────────────────

    #[tokio::test]
    async fn backlog_turns_into_bids_and_secrets() {
        let now = epoch_secs();
        let cloud = test_cloud(now);
        let policy_store = StubPolicyStore::with_policies(vec![test_policy("builder", 10)]);
        let secrets = StubSecretStore::new();
        let mut prov = Provisioner::new(
            test_manager(cloud.clone()),
            policy_store.clone(),
            StubQueue::with_backlog("builder", 3),
            secrets.clone(),
            test_config(),
        );

        prov.run_iteration(None).await.unwrap();

        assert_eq!(cloud.live_request_ids("us-west-2").len(), 3);
        // 0.10 observed, 1.3 safety factor.
        let records = secrets.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        for record in records.iter() {
            assert_eq!(record.token.len(), TOKEN_LEN);
            assert_eq!(record.worker_type, "builder");
            assert_eq!(record.scopes, vec!["worker:run".to_string()]);
        }
        let mut tokens: Vec<&str> = records.iter().map(|r| r.token.as_str()).collect();
        tokens.sort();
        tokens.dedup();
        assert_eq!(tokens.len(), 3);

        // The observed state was persisted and the keypair ensured.
        assert_eq!(policy_store.observed.lock().unwrap().len(), 1);
        assert_eq!(cloud.key_pair_names("us-west-2").len(), 1);
    }

    #[tokio::test]
    async fn excess_capacity_is_shrunk_synchronously() {
        let now = epoch_secs();
        let cloud = test_cloud(now);
        for i in 0..3 {
            cloud.add_instance("us-west-2", running_instance(&format!("i-{i}"), "builder", now - 100));
        }
        let mut prov = Provisioner::new(
            test_manager(cloud.clone()),
            StubPolicyStore::with_policies(vec![test_policy("builder", 1)]),
            StubQueue::with_backlog("builder", 0),
            StubSecretStore::new(),
            test_config(),
        );

        prov.run_iteration(None).await.unwrap();

        assert_eq!(cloud.live_instance_ids("us-west-2").len(), 1);
    }

    #[tokio::test]
    async fn unreachable_queue_skips_the_policy() {
        let now = epoch_secs();
        let cloud = test_cloud(now);
        let queue = StubQueue::with_backlog("builder", 5);
        queue.fail.store(true, Ordering::SeqCst);
        let secrets = StubSecretStore::new();
        let mut prov = Provisioner::new(
            test_manager(cloud.clone()),
            StubPolicyStore::with_policies(vec![test_policy("builder", 10)]),
            queue,
            secrets.clone(),
            test_config(),
        );

        // The iteration itself still succeeds.
        prov.run_iteration(None).await.unwrap();
        assert!(cloud.live_request_ids("us-west-2").is_empty());
        assert!(secrets.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_capacity_policy_does_not_block_other_worker_types() {
        let now = epoch_secs();
        let cloud = test_cloud(now);
        let mut broken = test_policy("broken", 10);
        broken.instance_types[0].capacity = 0;
        let policy_store =
            StubPolicyStore::with_policies(vec![broken, test_policy("builder", 10)]);
        let queue = Arc::new(StubQueue {
            backlog: Mutex::new(HashMap::from([
                ("broken".to_string(), 2),
                ("builder".to_string(), 2),
            ])),
            fail: AtomicBool::new(false),
        });
        let mut prov = Provisioner::new(
            test_manager(cloud.clone()),
            policy_store,
            queue,
            StubSecretStore::new(),
            test_config(),
        );

        // Bid selection for the broken policy fails; the iteration still
        // succeeds and the healthy worker type gets its bids.
        prov.run_iteration(None).await.unwrap();
        assert_eq!(cloud.live_request_ids("us-west-2").len(), 2);
    }

    #[tokio::test]
    async fn submission_cap_limits_one_iteration() {
        let now = epoch_secs();
        let cloud = test_cloud(now);
        let mut config = test_config();
        config.max_bids_per_iteration = 2;
        let mut prov = Provisioner::new(
            test_manager(cloud.clone()),
            StubPolicyStore::with_policies(vec![test_policy("builder", 50)]),
            StubQueue::with_backlog("builder", 10),
            StubSecretStore::new(),
            config,
        );

        prov.run_iteration(None).await.unwrap();
        assert_eq!(cloud.live_request_ids("us-west-2").len(), 2);
    }

    #[tokio::test]
    async fn unbuildable_launch_spec_drops_the_bid() {
        let now = epoch_secs();
        let cloud = test_cloud(now);
        let mut policy = test_policy("builder", 10);
        // security_groups and subnet_id are mutually exclusive.
        policy.launch_spec =
            obj(serde_json::json!({"security_groups": ["workers"], "subnet_id": "subnet-1"}));
        let secrets = StubSecretStore::new();
        let mut prov = Provisioner::new(
            test_manager(cloud.clone()),
            StubPolicyStore::with_policies(vec![policy]),
            StubQueue::with_backlog("builder", 2),
            secrets.clone(),
            test_config(),
        );

        prov.run_iteration(None).await.unwrap();
        assert!(cloud.live_request_ids("us-west-2").is_empty());
        assert!(secrets.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lost_secret_store_does_not_block_bidding() {
        let now = epoch_secs();
        let cloud = test_cloud(now);
        let secrets = StubSecretStore::new();
        secrets.fail.store(true, Ordering::SeqCst);
        let mut prov = Provisioner::new(
            test_manager(cloud.clone()),
            StubPolicyStore::with_policies(vec![test_policy("builder", 10)]),
            StubQueue::with_backlog("builder", 2),
            secrets,
            test_config(),
        );

        prov.run_iteration(None).await.unwrap();
        // Bids are already in flight when the secret write fails.
        assert_eq!(cloud.live_request_ids("us-west-2").len(), 2);
    }

    #[tokio::test]
    async fn unreachable_policy_store_fails_the_iteration() {
        let now = epoch_secs();
        let cloud = test_cloud(now);
        let policy_store = StubPolicyStore::with_policies(vec![]);
        policy_store.fail_list.store(true, Ordering::SeqCst);
        let mut prov = Provisioner::new(
            test_manager(cloud),
            policy_store,
            StubQueue::with_backlog("builder", 0),
            StubSecretStore::new(),
            test_config(),
        );

        assert!(matches!(
            prov.run_iteration(None).await,
            Err(ProvisionerError::Store(_))
        ));
    }

    // ── Circuit breaker / loop ─────────────────────────────────────

    #[tokio::test]
    async fn breaker_trips_at_threshold_and_resets_on_success() {
        let cloud = test_cloud(epoch_secs());
        let mut prov = Provisioner::new(
            test_manager(cloud),
            StubPolicyStore::with_policies(vec![]),
            StubQueue::with_backlog("builder", 0),
            StubSecretStore::new(),
            test_config(),
        );

        for _ in 0..14 {
            assert!(!prov.note_outcome(false));
        }
        assert!(prov.note_outcome(false));

        // Success clears the count entirely.
        prov.consecutive_failures = 14;
        assert!(!prov.note_outcome(true));
        assert_eq!(prov.consecutive_failures, 0);
        assert!(!prov.note_outcome(false));
    }

    #[tokio::test]
    async fn run_gives_up_after_consecutive_failures() {
        let cloud = test_cloud(epoch_secs());
        let policy_store = StubPolicyStore::with_policies(vec![]);
        policy_store.fail_list.store(true, Ordering::SeqCst);
        let mut config = test_config();
        config.max_consecutive_failures = 3;
        let prov = Provisioner::new(
            test_manager(cloud),
            policy_store,
            StubQueue::with_backlog("builder", 0),
            StubSecretStore::new(),
            config,
        );

        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        assert!(matches!(
            prov.run(shutdown_rx).await,
            Err(ProvisionerError::TooManyFailures(3))
        ));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let cloud = test_cloud(epoch_secs());
        let prov = Provisioner::new(
            test_manager(cloud),
            StubPolicyStore::with_policies(vec![]),
            StubQueue::with_backlog("builder", 0),
            StubSecretStore::new(),
            test_config(),
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        shutdown_tx.send(true).unwrap();
        prov.run(shutdown_rx).await.unwrap();
    }
}
