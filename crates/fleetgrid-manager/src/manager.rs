//! The resource manager: reconciliation, capacity queries, housekeeping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::try_join_all;
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use fleetgrid_cloud::{
    BidRequest, BidRequestSpec, BidRequestState, CloudCompute, Instance, InstanceState,
};
use fleetgrid_types::{
    Bid, Observation, ObservedInstance, ObservedInternalRequest, ObservedRequest, ObservedState,
    PricingTable, WorkerTypePolicy,
};

use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::fetch::{RegionSnapshot, fetch_region};
use crate::state::{ApiState, AwaitingEntry, CapacityBucket, DeadState, TrackedRequest,
    worker_type_of};

/// Status codes of requests that look terminal but have not closed yet.
/// A live request showing one of these is stalled and gets cancelled.
pub const STALLED_STATUS_CODES: &[&str] = &[
    "capacity-not-available",
    "capacity-oversubscribed",
    "price-too-low",
    "not-scheduled-yet",
    "launch-group-constraint",
    "az-group-constraint",
    "placement-group-constraint",
    "constraint-not-fulfillable",
];

/// Owns the reconciled view of this provisioner's cloud resources.
pub struct ResourceManager {
    cloud: Arc<dyn CloudCompute>,
    config: ManagerConfig,
    api_state: ApiState,
    previous_api_state: Option<ApiState>,
    dead_state: DeadState,
    /// Bids issued by this process not yet visible in the API.
    internal_state: Vec<TrackedRequest>,
    awaiting_state_reason: Vec<AwaitingEntry>,
    awaiting_fulfilment: Vec<AwaitingEntry>,
    pricing: PricingTable,
    zones_by_region: HashMap<String, Vec<String>>,
    /// Key pairs known to exist, per (region, name). Instance-scoped so a
    /// process restart re-verifies against the provider.
    known_key_pairs: HashSet<(String, String)>,
}

impl ResourceManager {
    pub fn new(cloud: Arc<dyn CloudCompute>, config: ManagerConfig) -> Self {
        Self {
            cloud,
            config,
            api_state: ApiState::default(),
            previous_api_state: None,
            dead_state: DeadState::default(),
            internal_state: Vec::new(),
            awaiting_state_reason: Vec::new(),
            awaiting_fulfilment: Vec::new(),
            pricing: PricingTable::new(),
            zones_by_region: HashMap::new(),
            known_key_pairs: HashSet::new(),
        }
    }

    // ── Reconciliation ─────────────────────────────────────────────

    /// Poll the cloud, reconcile, and explain vanished resources.
    pub async fn update(&mut self) -> ManagerResult<Vec<Observation>> {
        self.update_at(epoch_secs()).await
    }

    /// `update()` with an explicit clock, for deterministic tests.
    pub async fn update_at(&mut self, now: u64) -> ManagerResult<Vec<Observation>> {
        let price_since = now.saturating_sub(self.config.pricing_window);
        let fetches = self.config.regions.iter().map(|region| {
            fetch_region(
                self.cloud.as_ref(),
                region,
                &self.config.key_prefix,
                price_since,
            )
        });
        let mut snapshots =
            tokio::time::timeout(self.config.fetch_timeout, try_join_all(fetches))
                .await
                .map_err(|_| ManagerError::FetchTimeout(self.config.fetch_timeout.as_secs()))??;

        // Cancel stalled requests before installing the snapshot, so the
        // new ApiState never contains them.
        for snap in &mut snapshots {
            let stalled: Vec<String> = snap
                .requests
                .iter()
                .filter(|q| is_stalled(q, now, self.config.stalled_request_age))
                .map(|q| q.request_id.clone())
                .collect();
            if stalled.is_empty() {
                continue;
            }
            info!(
                region = %snap.region,
                count = stalled.len(),
                "cancelling stalled bid requests"
            );
            self.cloud
                .cancel_bid_requests(&snap.region, &stalled)
                .await?;
            snap.requests.retain(|q| !stalled.contains(&q.request_id));
        }

        self.install_snapshot(snapshots);

        let mut observations = Vec::new();
        self.diff_previous(&mut observations);
        self.sweep_awaiting(&mut observations, now);
        self.reconcile_internal(&mut observations, now);

        for obs in &observations {
            debug!(observation = ?obs, "reconciliation observation");
        }
        Ok(observations)
    }

    /// Replace ApiState/DeadState/PricingTable/zones wholesale, retaining
    /// the previous ApiState for diffing.
    fn install_snapshot(&mut self, snapshots: Vec<RegionSnapshot>) {
        let mut new_state = ApiState::default();
        let mut dead = DeadState::default();
        let mut pricing = PricingTable::new();
        let mut zones = HashMap::new();

        for snap in snapshots {
            for point in &snap.prices {
                let slot = pricing
                    .entry(snap.region.clone())
                    .or_default()
                    .entry(point.instance_type.clone())
                    .or_default()
                    .entry(point.availability_zone.clone())
                    .or_insert(point.price);
                if point.price > *slot {
                    *slot = point.price;
                }
            }
            zones.insert(snap.region.clone(), snap.zones);
            new_state.instances.extend(snap.instances);
            new_state.requests.extend(snap.requests);
            dead.instances.extend(snap.dead_instances);
            dead.requests.extend(snap.dead_requests);
        }

        self.previous_api_state = Some(std::mem::replace(&mut self.api_state, new_state));
        self.dead_state = dead;
        self.pricing = pricing;
        self.zones_by_region = zones;
    }

    /// Explain resources present in the previous snapshot but absent from
    /// the new one, using the post-mortem DeadState records.
    fn diff_previous(&mut self, observations: &mut Vec<Observation>) {
        let Some(previous) = self.previous_api_state.take() else {
            return;
        };

        let live_requests: HashSet<&str> = self
            .api_state
            .requests
            .iter()
            .map(|q| q.request_id.as_str())
            .collect();
        let live_instances: HashSet<&str> = self
            .api_state
            .instances
            .iter()
            .map(|i| i.instance_id.as_str())
            .collect();

        for req in &previous.requests {
            if live_requests.contains(req.request_id.as_str()) {
                continue;
            }
            // Only the post-mortem record carries the closing status; the
            // stale pre-disappearance record must not be consulted.
            match self.resolve_request(&req.request_id) {
                Some(obs) => observations.push(obs),
                None => self.awaiting_fulfilment.push(AwaitingEntry {
                    resource_id: req.request_id.clone(),
                    first_seen_at: 0,
                    iterations: 0,
                }),
            }
        }

        for inst in &previous.instances {
            if live_instances.contains(inst.instance_id.as_str()) {
                continue;
            }
            match self.resolve_instance(&inst.instance_id) {
                Some(obs) => observations.push(obs),
                None => self.awaiting_state_reason.push(AwaitingEntry {
                    resource_id: inst.instance_id.clone(),
                    first_seen_at: 0,
                    iterations: 0,
                }),
            }
        }

        self.previous_api_state = Some(previous);
    }

    /// Look up a vanished request's fate in the new DeadState.
    fn resolve_request(&self, request_id: &str) -> Option<Observation> {
        let dead = self
            .dead_state
            .requests
            .iter()
            .find(|q| q.request_id == request_id)?;
        if dead.state == BidRequestState::Open {
            // Nominally still open; re-check next iteration.
            return None;
        }
        let worker_type = self.classify(&dead.key_name);
        if dead.is_fulfilled() {
            Some(Observation::BidFulfilled {
                request_id: dead.request_id.clone(),
                worker_type,
                region: dead.region.clone(),
                zone: dead.availability_zone.clone(),
                instance_type: dead.instance_type.clone(),
            })
        } else {
            Some(Observation::BidFailed {
                request_id: dead.request_id.clone(),
                worker_type,
                region: dead.region.clone(),
                status_code: dead.status.code.clone(),
                status_message: dead.status.message.clone(),
            })
        }
    }

    /// Look up a vanished instance's termination record in the new DeadState.
    fn resolve_instance(&self, instance_id: &str) -> Option<Observation> {
        let dead = self
            .dead_state
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)?;
        let reason = dead.state_reason.as_ref()?;
        let spot_kill = reason.is_spot_kill();
        // On a spot kill, report the price that was bid as a price floor.
        let bid_price = if spot_kill {
            dead.bid_request_id
                .as_deref()
                .and_then(|rid| self.lookup_bid_price(rid))
        } else {
            None
        };
        Some(Observation::InstanceTerminated {
            instance_id: dead.instance_id.clone(),
            worker_type: self.classify(&dead.key_name),
            region: dead.region.clone(),
            reason_code: reason.code.clone(),
            reason_message: reason.message.clone(),
            spot_kill,
            bid_price,
        })
    }

    /// Find the price bid for a request, in DeadState first, then ApiState.
    fn lookup_bid_price(&self, request_id: &str) -> Option<f64> {
        self.dead_state
            .requests
            .iter()
            .chain(self.api_state.requests.iter())
            .find(|q| q.request_id == request_id)
            .map(|q| q.bid_price)
    }

    /// Re-check unresolved vanished resources, evicting after the
    /// iteration cap.
    fn sweep_awaiting(&mut self, observations: &mut Vec<Observation>, now: u64) {
        let cap = self.config.max_resolution_iterations;

        let pending = std::mem::take(&mut self.awaiting_fulfilment);
        for mut entry in pending {
            if entry.first_seen_at == 0 {
                entry.first_seen_at = now;
            }
            match self.resolve_request(&entry.resource_id) {
                Some(obs) => observations.push(obs),
                None => {
                    entry.iterations += 1;
                    if entry.iterations >= cap {
                        warn!(
                            request_id = %entry.resource_id,
                            iterations = entry.iterations,
                            "giving up resolving vanished bid request"
                        );
                    } else {
                        self.awaiting_fulfilment.push(entry);
                    }
                }
            }
        }

        let pending = std::mem::take(&mut self.awaiting_state_reason);
        for mut entry in pending {
            if entry.first_seen_at == 0 {
                entry.first_seen_at = now;
            }
            match self.resolve_instance(&entry.resource_id) {
                Some(obs) => observations.push(obs),
                None => {
                    entry.iterations += 1;
                    if entry.iterations >= cap {
                        warn!(
                            instance_id = %entry.resource_id,
                            iterations = entry.iterations,
                            "giving up resolving vanished instance"
                        );
                    } else {
                        self.awaiting_state_reason.push(entry);
                    }
                }
            }
        }
    }

    /// Drop internally tracked bids that became visible, and report the
    /// ones that never did within the timeout.
    fn reconcile_internal(&mut self, observations: &mut Vec<Observation>, now: u64) {
        let visible: HashSet<&str> = self
            .api_state
            .requests
            .iter()
            .map(|q| q.request_id.as_str())
            .collect();
        let timeout = self.config.internal_state_timeout;

        self.internal_state.retain(|tracked| {
            if visible.contains(tracked.request_id.as_str()) {
                debug!(request_id = %tracked.request_id, "tracked bid became visible");
                return false;
            }
            if now.saturating_sub(tracked.submitted_at) > timeout {
                observations.push(Observation::RequestNeverAppeared {
                    request_id: tracked.request_id.clone(),
                    worker_type: tracked.worker_type.clone(),
                    region: tracked.region.clone(),
                });
                return false;
            }
            true
        });
    }

    fn classify(&self, key_name: &str) -> String {
        worker_type_of(&self.config.key_prefix, key_name)
            .unwrap_or_else(|| "unknown".to_string())
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Capacity units in the given buckets for one worker type.
    pub fn capacity_for_type(&self, policy: &WorkerTypePolicy, buckets: &[CapacityBucket]) -> i64 {
        let mut capacity = 0i64;
        for inst in self.instances_of_type(&policy.worker_type) {
            let wanted = match inst.state {
                InstanceState::Running => buckets.contains(&CapacityBucket::Running),
                InstanceState::Pending => buckets.contains(&CapacityBucket::Pending),
                _ => false,
            };
            if wanted {
                capacity += policy.capacity_of_type(&inst.instance_type) as i64;
            }
        }
        if buckets.contains(&CapacityBucket::SpotReq) {
            for req in self.requests_of_type(&policy.worker_type) {
                if req.state == BidRequestState::Open {
                    capacity += policy.capacity_of_type(&req.instance_type) as i64;
                }
            }
            for tracked in &self.internal_state {
                if tracked.worker_type == policy.worker_type {
                    capacity += policy.capacity_of_type(&tracked.instance_type) as i64;
                }
            }
        }
        capacity
    }

    /// Live instances belonging to one worker type.
    pub fn instances_of_type(&self, worker_type: &str) -> Vec<&Instance> {
        self.api_state
            .instances
            .iter()
            .filter(|i| self.classify(&i.key_name) == worker_type)
            .collect()
    }

    /// Live bid requests belonging to one worker type.
    pub fn requests_of_type(&self, worker_type: &str) -> Vec<&BidRequest> {
        self.api_state
            .requests
            .iter()
            .filter(|q| self.classify(&q.key_name) == worker_type)
            .collect()
    }

    /// Every worker type with live or internally tracked resources.
    pub fn known_worker_types(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        for inst in &self.api_state.instances {
            names.insert(self.classify(&inst.key_name));
        }
        for req in &self.api_state.requests {
            names.insert(self.classify(&req.key_name));
        }
        for tracked in &self.internal_state {
            names.insert(tracked.worker_type.clone());
        }
        names
    }

    /// Sizes of the two awaiting queues (state-reason, fulfilment), for
    /// logging and tests.
    pub fn awaiting_counts(&self) -> (usize, usize) {
        (
            self.awaiting_state_reason.len(),
            self.awaiting_fulfilment.len(),
        )
    }

    /// Zones available in a region, for bid validation.
    pub fn available_zones(&self, region: &str) -> &[String] {
        self.zones_by_region
            .get(region)
            .map(|z| z.as_slice())
            .unwrap_or(&[])
    }

    /// The pricing table from the last pass.
    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Zone lists per region from the last pass.
    pub fn zones_by_region(&self) -> &HashMap<String, Vec<String>> {
        &self.zones_by_region
    }

    pub fn regions(&self) -> &[String] {
        &self.config.regions
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Derived snapshot of what this provisioner believes it owns for one
    /// worker type, persisted by the controller each iteration.
    pub fn observed_state(&self, policy: &WorkerTypePolicy) -> ObservedState {
        ObservedState {
            worker_type: policy.worker_type.clone(),
            instances: self
                .instances_of_type(&policy.worker_type)
                .into_iter()
                .map(|i| ObservedInstance {
                    id: i.instance_id.clone(),
                    bid_request_id: i.bid_request_id.clone(),
                    image: i.image_id.clone(),
                    instance_type: i.instance_type.clone(),
                    region: i.region.clone(),
                    zone: i.availability_zone.clone(),
                    state: format!("{:?}", i.state).to_lowercase(),
                    launched_at: i.launch_time,
                })
                .collect(),
            requests: self
                .requests_of_type(&policy.worker_type)
                .into_iter()
                .map(|q| ObservedRequest {
                    id: q.request_id.clone(),
                    image: q.image_id.clone(),
                    instance_type: q.instance_type.clone(),
                    region: q.region.clone(),
                    zone: q.availability_zone.clone(),
                    submitted_at: q.create_time,
                    status: q.status.code.clone(),
                })
                .collect(),
            internal_tracked_requests: self
                .internal_state
                .iter()
                .filter(|t| t.worker_type == policy.worker_type)
                .map(|t| ObservedInternalRequest {
                    id: t.request_id.clone(),
                    region: t.region.clone(),
                    zone: t.zone.clone(),
                    instance_type: t.instance_type.clone(),
                    submitted_at: t.submitted_at,
                })
                .collect(),
        }
    }

    // ── Bid submission ─────────────────────────────────────────────

    /// Submit a spot bid and track it until the API shows it.
    pub async fn request_spot_instance(
        &mut self,
        policy: &WorkerTypePolicy,
        bid: &Bid,
        launch_spec: serde_json::Value,
    ) -> ManagerResult<String> {
        self.request_spot_instance_at(policy, bid, launch_spec, epoch_secs())
            .await
    }

    pub async fn request_spot_instance_at(
        &mut self,
        policy: &WorkerTypePolicy,
        bid: &Bid,
        launch_spec: serde_json::Value,
        now: u64,
    ) -> ManagerResult<String> {
        let spec = BidRequestSpec {
            availability_zone: bid.zone.clone(),
            instance_type: bid.instance_type.clone(),
            price: bid.submitted_price,
            launch_spec,
            key_name: self.key_pair_name(&policy.worker_type),
        };
        let request_id = self.cloud.submit_bid_request(&bid.region, &spec).await?;
        info!(
            worker_type = %policy.worker_type,
            region = %bid.region,
            zone = %bid.zone,
            instance_type = %bid.instance_type,
            price = bid.submitted_price,
            %request_id,
            "spot bid submitted"
        );
        self.internal_state.push(TrackedRequest {
            worker_type: policy.worker_type.clone(),
            request_id: request_id.clone(),
            region: bid.region.clone(),
            zone: bid.zone.clone(),
            instance_type: bid.instance_type.clone(),
            submitted_at: now,
        });
        Ok(request_id)
    }

    // ── Termination primitives ─────────────────────────────────────

    /// Terminate instances and cancel requests in one region. The only
    /// primitive that actually destroys capacity; failures are surfaced
    /// because leaving unwanted capacity running has direct cost.
    pub async fn kill_cancel(
        &mut self,
        region: &str,
        instance_ids: &[String],
        request_ids: &[String],
    ) -> ManagerResult<()> {
        if !instance_ids.is_empty() {
            self.cloud.terminate_instances(region, instance_ids).await?;
        }
        if !request_ids.is_empty() {
            self.cloud.cancel_bid_requests(region, request_ids).await?;
        }
        self.api_state
            .instances
            .retain(|i| !instance_ids.contains(&i.instance_id));
        self.api_state
            .requests
            .retain(|q| !request_ids.contains(&q.request_id));
        self.internal_state
            .retain(|t| !request_ids.contains(&t.request_id));
        info!(
            %region,
            instances = instance_ids.len(),
            requests = request_ids.len(),
            "terminated/cancelled resources"
        );
        Ok(())
    }

    /// Terminate everything belonging to one worker type in the given
    /// buckets, across all regions.
    pub async fn kill_by_name(
        &mut self,
        worker_type: &str,
        buckets: &[CapacityBucket],
    ) -> ManagerResult<()> {
        let mut per_region: HashMap<String, (Vec<String>, Vec<String>)> = HashMap::new();
        for inst in self.instances_of_type(worker_type) {
            let wanted = match inst.state {
                InstanceState::Running => buckets.contains(&CapacityBucket::Running),
                InstanceState::Pending => buckets.contains(&CapacityBucket::Pending),
                _ => false,
            };
            if wanted {
                per_region
                    .entry(inst.region.clone())
                    .or_default()
                    .0
                    .push(inst.instance_id.clone());
            }
        }
        if buckets.contains(&CapacityBucket::SpotReq) {
            for req in self.requests_of_type(worker_type) {
                per_region
                    .entry(req.region.clone())
                    .or_default()
                    .1
                    .push(req.request_id.clone());
            }
            for tracked in &self.internal_state {
                if tracked.worker_type == worker_type {
                    per_region
                        .entry(tracked.region.clone())
                        .or_default()
                        .1
                        .push(tracked.request_id.clone());
                }
            }
        }

        for (region, (instance_ids, request_ids)) in per_region {
            self.kill_cancel(&region, &instance_ids, &request_ids).await?;
        }
        Ok(())
    }

    /// Remove roughly `amount` capacity units from one worker type without
    /// going below its `min_capacity`. Candidates are shuffled so no
    /// particular instance is systematically preferred for termination.
    pub async fn kill_capacity_of_worker_type(
        &mut self,
        policy: &WorkerTypePolicy,
        amount: i64,
        buckets: &[CapacityBucket],
    ) -> ManagerResult<()> {
        struct Candidate {
            region: String,
            id: String,
            capacity: i64,
            is_request: bool,
        }

        let mut candidates = Vec::new();
        for inst in self.instances_of_type(&policy.worker_type) {
            let wanted = match inst.state {
                InstanceState::Running => buckets.contains(&CapacityBucket::Running),
                InstanceState::Pending => buckets.contains(&CapacityBucket::Pending),
                _ => false,
            };
            if wanted {
                candidates.push(Candidate {
                    region: inst.region.clone(),
                    id: inst.instance_id.clone(),
                    capacity: policy.capacity_of_type(&inst.instance_type) as i64,
                    is_request: false,
                });
            }
        }
        if buckets.contains(&CapacityBucket::SpotReq) {
            for req in self.requests_of_type(&policy.worker_type) {
                if req.state == BidRequestState::Open {
                    candidates.push(Candidate {
                        region: req.region.clone(),
                        id: req.request_id.clone(),
                        capacity: policy.capacity_of_type(&req.instance_type) as i64,
                        is_request: true,
                    });
                }
            }
            for tracked in &self.internal_state {
                if tracked.worker_type == policy.worker_type {
                    candidates.push(Candidate {
                        region: tracked.region.clone(),
                        id: tracked.request_id.clone(),
                        capacity: policy.capacity_of_type(&tracked.instance_type) as i64,
                        is_request: true,
                    });
                }
            }
        }

        candidates.shuffle(&mut rand::thread_rng());

        let current = self.capacity_for_type(policy, buckets);
        let removable = (current - policy.min_capacity).max(0);
        let target = amount.min(removable);

        let mut removed = 0i64;
        let mut per_region: HashMap<String, (Vec<String>, Vec<String>)> = HashMap::new();
        for cand in candidates {
            if removed >= target {
                break;
            }
            if removed + cand.capacity > removable {
                continue;
            }
            removed += cand.capacity;
            let entry = per_region.entry(cand.region).or_default();
            if cand.is_request {
                entry.1.push(cand.id);
            } else {
                entry.0.push(cand.id);
            }
        }

        info!(
            worker_type = %policy.worker_type,
            requested = amount,
            removed,
            "reducing capacity"
        );
        for (region, (instance_ids, request_ids)) in per_region {
            self.kill_cancel(&region, &instance_ids, &request_ids).await?;
        }
        Ok(())
    }

    /// Terminate instances past the absolute lifetime limit, regardless of
    /// worker type. Instances with an unknown launch time are skipped.
    pub async fn zombie_killer(&mut self, now: u64) -> ManagerResult<Vec<String>> {
        let cutoff = self.config.max_instance_life;
        let mut per_region: HashMap<String, Vec<String>> = HashMap::new();
        for inst in &self.api_state.instances {
            if let Some(launched) = inst.launch_time
                && now.saturating_sub(launched) > cutoff
            {
                per_region
                    .entry(inst.region.clone())
                    .or_default()
                    .push(inst.instance_id.clone());
            }
        }

        let mut killed = Vec::new();
        for (region, ids) in per_region {
            warn!(%region, count = ids.len(), "terminating zombie instances");
            self.kill_cancel(&region, &ids, &[]).await?;
            killed.extend(ids);
        }
        Ok(killed)
    }

    /// Terminate everything belonging to worker types that are no longer
    /// configured. An empty configured set kills everything this
    /// provisioner manages.
    pub async fn rogue_killer(&mut self, configured: &[String]) -> ManagerResult<()> {
        let rogues: Vec<String> = self
            .known_worker_types()
            .into_iter()
            .filter(|wt| !configured.contains(wt))
            .collect();
        for worker_type in rogues {
            warn!(%worker_type, "terminating rogue worker type");
            self.kill_by_name(&worker_type, &CapacityBucket::ALL).await?;
        }
        Ok(())
    }

    // ── Housekeeping ───────────────────────────────────────────────

    /// Tag any owned resource missing ownership tags. Best-effort:
    /// failures are logged, never propagated.
    pub async fn ensure_tags(&self) {
        let mut batches: HashMap<(String, String), Vec<String>> = HashMap::new();
        for inst in &self.api_state.instances {
            if !inst.tags.contains_key("WorkerType") {
                batches
                    .entry((inst.region.clone(), self.classify(&inst.key_name)))
                    .or_default()
                    .push(inst.instance_id.clone());
            }
        }
        for req in &self.api_state.requests {
            if !req.tags.contains_key("WorkerType") {
                batches
                    .entry((req.region.clone(), self.classify(&req.key_name)))
                    .or_default()
                    .push(req.request_id.clone());
            }
        }

        for ((region, worker_type), ids) in batches {
            let tags = HashMap::from([
                ("Name".to_string(), worker_type.clone()),
                ("WorkerType".to_string(), worker_type.clone()),
                ("Owner".to_string(), self.config.provisioner_id.clone()),
            ]);
            if let Err(e) = self.cloud.create_tags(&region, &ids, &tags).await {
                warn!(%region, %worker_type, error = %e, "tagging failed");
            }
        }
    }

    /// The keypair name for one worker type:
    /// `{prefix}{worker_type}:{pubkey_hash}`.
    pub fn key_pair_name(&self, worker_type: &str) -> String {
        let digest = Sha256::digest(self.config.public_key.as_bytes());
        format!(
            "{}{}:{}",
            self.config.key_prefix,
            worker_type,
            &hex::encode(digest)[..16]
        )
    }

    /// Ensure the worker type's keypair exists in every region. Idempotent;
    /// known names are cached for the life of this instance.
    pub async fn create_key_pair(&mut self, worker_type: &str) -> ManagerResult<String> {
        let name = self.key_pair_name(worker_type);
        for region in self.config.regions.clone() {
            let cache_key = (region.clone(), name.clone());
            if self.known_key_pairs.contains(&cache_key) {
                continue;
            }
            let existing = self.cloud.list_key_pairs(&region, &name).await?;
            if existing.is_empty() {
                self.cloud
                    .create_key_pair(&region, &name, &self.config.public_key)
                    .await?;
                debug!(%region, key_name = %name, "key pair created");
            }
            self.known_key_pairs.insert(cache_key);
        }
        Ok(name)
    }

    /// Delete every keypair belonging to one worker type, in every region.
    pub async fn delete_key_pair(&mut self, worker_type: &str) -> ManagerResult<()> {
        let prefix = format!("{}{}:", self.config.key_prefix, worker_type);
        for region in self.config.regions.clone() {
            let names = self.cloud.list_key_pairs(&region, &prefix).await?;
            for name in names {
                self.cloud.delete_key_pair(&region, &name).await?;
                self.known_key_pairs.remove(&(region.clone(), name));
            }
        }
        Ok(())
    }
}

/// A live request unlikely to succeed soon: too old without fulfillment,
/// or showing a terminal-looking status code.
fn is_stalled(request: &BidRequest, now: u64, max_age: u64) -> bool {
    if request.state != BidRequestState::Open {
        return false;
    }
    if now.saturating_sub(request.create_time) > max_age {
        return true;
    }
    STALLED_STATUS_CODES.contains(&request.status.code.as_str())
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
