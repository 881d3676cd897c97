//! In-memory fake cloud backend.
//!
//! `InMemoryCloud` implements `CloudCompute` over per-region maps and adds
//! driver methods that tests use to script provider behavior: fulfilling
//! and failing requests, killing instances with a reason, deferring
//! visibility of submitted requests to exercise eventual consistency.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{BidRequestSpec, CloudCompute, CloudError, CloudResult};
use crate::types::{
    BidRequest, BidRequestState, BidStatus, Instance, InstanceState, PricePoint, StateReason,
};

#[derive(Default)]
struct RegionState {
    instances: Vec<Instance>,
    dead_instances: Vec<Instance>,
    requests: Vec<BidRequest>,
    dead_requests: Vec<BidRequest>,
    /// Submitted but not yet visible in `requests` (eventual consistency).
    pending_requests: Vec<BidRequest>,
    zones: Vec<String>,
    prices: Vec<PricePoint>,
    key_pairs: HashMap<String, String>,
    /// When set, every call against this region fails.
    unavailable: bool,
}

#[derive(Default)]
struct Inner {
    regions: HashMap<String, RegionState>,
    next_id: u64,
    /// When true, submitted requests stay invisible until `publish_pending`.
    defer_visibility: bool,
    clock: u64,
}

/// An in-process `CloudCompute` backend.
#[derive(Default)]
pub struct InMemoryCloud {
    inner: Mutex<Inner>,
}

impl InMemoryCloud {
    pub fn new(regions: &[&str]) -> Self {
        let mut inner = Inner::default();
        for r in regions {
            inner.regions.insert(r.to_string(), RegionState::default());
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    // ── Test drivers ───────────────────────────────────────────────

    /// Set the timestamp stamped onto newly submitted requests.
    pub fn set_clock(&self, now: u64) {
        self.inner.lock().unwrap().clock = now;
    }

    /// Make submitted requests invisible until `publish_pending()`.
    pub fn defer_visibility(&self, defer: bool) {
        self.inner.lock().unwrap().defer_visibility = defer;
    }

    /// Move all deferred submissions into the visible live set.
    pub fn publish_pending(&self) {
        let mut inner = self.inner.lock().unwrap();
        for region in inner.regions.values_mut() {
            let pending = std::mem::take(&mut region.pending_requests);
            region.requests.extend(pending);
        }
    }

    /// Make every call against `region` fail until cleared.
    pub fn set_unavailable(&self, region: &str, unavailable: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(r) = inner.regions.get_mut(region) {
            r.unavailable = unavailable;
        }
    }

    pub fn add_zone(&self, region: &str, zone: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .regions
            .entry(region.to_string())
            .or_default()
            .zones
            .push(zone.to_string());
    }

    pub fn add_price(&self, region: &str, point: PricePoint) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .regions
            .entry(region.to_string())
            .or_default()
            .prices
            .push(point);
    }

    pub fn add_instance(&self, region: &str, instance: Instance) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .regions
            .entry(region.to_string())
            .or_default()
            .instances
            .push(instance);
    }

    pub fn add_request(&self, region: &str, request: BidRequest) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .regions
            .entry(region.to_string())
            .or_default()
            .requests
            .push(request);
    }

    pub fn add_dead_instance(&self, region: &str, instance: Instance) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .regions
            .entry(region.to_string())
            .or_default()
            .dead_instances
            .push(instance);
    }

    pub fn add_dead_request(&self, region: &str, request: BidRequest) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .regions
            .entry(region.to_string())
            .or_default()
            .dead_requests
            .push(request);
    }

    /// Move a live instance to the dead set with a termination reason.
    pub fn kill_instance(&self, region: &str, instance_id: &str, reason: Option<StateReason>) {
        let mut inner = self.inner.lock().unwrap();
        let Some(r) = inner.regions.get_mut(region) else {
            return;
        };
        if let Some(pos) = r.instances.iter().position(|i| i.instance_id == instance_id) {
            let mut inst = r.instances.remove(pos);
            inst.state = InstanceState::Terminated;
            inst.state_reason = reason;
            r.dead_instances.push(inst);
        }
    }

    /// Fulfill a live request: move it to the dead set as active+fulfilled
    /// and create the instance it produced.
    pub fn fulfill_request(&self, region: &str, request_id: &str, launch_time: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let instance_id = format!("i-{:08x}", inner.next_id);
        let Some(r) = inner.regions.get_mut(region) else {
            return;
        };
        if let Some(pos) = r.requests.iter().position(|q| q.request_id == request_id) {
            let mut req = r.requests.remove(pos);
            req.state = BidRequestState::Active;
            req.status = BidStatus {
                code: BidStatus::FULFILLED.to_string(),
                message: "request fulfilled".to_string(),
                update_time: launch_time,
            };
            req.instance_id = Some(instance_id.clone());
            r.instances.push(Instance {
                instance_id,
                key_name: req.key_name.clone(),
                instance_type: req.instance_type.clone(),
                region: region.to_string(),
                availability_zone: req.availability_zone.clone(),
                image_id: req.image_id.clone(),
                state: InstanceState::Running,
                bid_request_id: Some(req.request_id.clone()),
                launch_time: Some(launch_time),
                state_reason: None,
                tags: HashMap::new(),
            });
            r.dead_requests.push(req);
        }
    }

    /// Close a live request without fulfillment.
    pub fn close_request(
        &self,
        region: &str,
        request_id: &str,
        state: BidRequestState,
        code: &str,
        message: &str,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let Some(r) = inner.regions.get_mut(region) else {
            return;
        };
        if let Some(pos) = r.requests.iter().position(|q| q.request_id == request_id) {
            let mut req = r.requests.remove(pos);
            req.state = state;
            req.status = BidStatus {
                code: code.to_string(),
                message: message.to_string(),
                update_time: 0,
            };
            r.dead_requests.push(req);
        }
    }

    /// Drop a live request entirely, leaving no post-mortem record.
    pub fn vanish_request(&self, region: &str, request_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(r) = inner.regions.get_mut(region) {
            r.requests.retain(|q| q.request_id != request_id);
        }
    }

    /// Drop a live instance entirely, leaving no post-mortem record.
    pub fn vanish_instance(&self, region: &str, instance_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(r) = inner.regions.get_mut(region) {
            r.instances.retain(|i| i.instance_id != instance_id);
        }
    }

    /// Ids of live instances in a region, for assertions.
    pub fn live_instance_ids(&self, region: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .regions
            .get(region)
            .map(|r| r.instances.iter().map(|i| i.instance_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Ids of live (visible) requests in a region, for assertions.
    pub fn live_request_ids(&self, region: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .regions
            .get(region)
            .map(|r| r.requests.iter().map(|q| q.request_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Key pair names present in a region, for assertions.
    pub fn key_pair_names(&self, region: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .regions
            .get(region)
            .map(|r| r.key_pairs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn check_region<'a>(inner: &'a Inner, region: &str) -> CloudResult<&'a RegionState> {
    let r = inner
        .regions
        .get(region)
        .ok_or_else(|| CloudError::UnknownRegion(region.to_string()))?;
    if r.unavailable {
        return Err(CloudError::Unavailable(region.to_string()));
    }
    Ok(r)
}

#[async_trait]
impl CloudCompute for InMemoryCloud {
    async fn live_instances(&self, region: &str) -> CloudResult<Vec<Instance>> {
        let inner = self.inner.lock().unwrap();
        Ok(check_region(&inner, region)?.instances.clone())
    }

    async fn dead_instances(&self, region: &str) -> CloudResult<Vec<Instance>> {
        let inner = self.inner.lock().unwrap();
        Ok(check_region(&inner, region)?.dead_instances.clone())
    }

    async fn live_bid_requests(&self, region: &str) -> CloudResult<Vec<BidRequest>> {
        let inner = self.inner.lock().unwrap();
        Ok(check_region(&inner, region)?.requests.clone())
    }

    async fn dead_bid_requests(&self, region: &str) -> CloudResult<Vec<BidRequest>> {
        let inner = self.inner.lock().unwrap();
        Ok(check_region(&inner, region)?.dead_requests.clone())
    }

    async fn availability_zones(&self, region: &str) -> CloudResult<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(check_region(&inner, region)?.zones.clone())
    }

    async fn price_history(&self, region: &str, since: u64) -> CloudResult<Vec<PricePoint>> {
        let inner = self.inner.lock().unwrap();
        Ok(check_region(&inner, region)?
            .prices
            .iter()
            .filter(|p| p.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn submit_bid_request(
        &self,
        region: &str,
        spec: &BidRequestSpec,
    ) -> CloudResult<String> {
        let mut inner = self.inner.lock().unwrap();
        check_region(&inner, region)?;
        inner.next_id += 1;
        let request_id = format!("sir-{:08x}", inner.next_id);
        let now = inner.clock;
        let defer = inner.defer_visibility;

        let image_id = spec
            .launch_spec
            .get("image_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let request = BidRequest {
            request_id: request_id.clone(),
            key_name: spec.key_name.clone(),
            instance_type: spec.instance_type.clone(),
            region: region.to_string(),
            availability_zone: spec.availability_zone.clone(),
            image_id,
            bid_price: spec.price,
            state: BidRequestState::Open,
            status: BidStatus {
                code: "pending-evaluation".to_string(),
                message: "pending evaluation".to_string(),
                update_time: now,
            },
            create_time: now,
            instance_id: None,
            tags: HashMap::new(),
        };

        let r = inner.regions.get_mut(region).unwrap();
        if defer {
            r.pending_requests.push(request);
        } else {
            r.requests.push(request);
        }
        Ok(request_id)
    }

    async fn cancel_bid_requests(&self, region: &str, request_ids: &[String]) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        check_region(&inner, region)?;
        let r = inner.regions.get_mut(region).unwrap();
        for id in request_ids {
            if let Some(pos) = r.requests.iter().position(|q| &q.request_id == id) {
                let mut req = r.requests.remove(pos);
                req.state = BidRequestState::Cancelled;
                req.status.code = "canceled-before-fulfillment".to_string();
                r.dead_requests.push(req);
            }
        }
        Ok(())
    }

    async fn terminate_instances(&self, region: &str, instance_ids: &[String]) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        check_region(&inner, region)?;
        let r = inner.regions.get_mut(region).unwrap();
        for id in instance_ids {
            if let Some(pos) = r.instances.iter().position(|i| &i.instance_id == id) {
                let mut inst = r.instances.remove(pos);
                inst.state = InstanceState::Terminated;
                inst.state_reason = Some(StateReason {
                    code: "Client.UserInitiatedShutdown".to_string(),
                    message: "terminated by provisioner".to_string(),
                });
                r.dead_instances.push(inst);
            }
        }
        Ok(())
    }

    async fn create_tags(
        &self,
        region: &str,
        resource_ids: &[String],
        tags: &HashMap<String, String>,
    ) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        check_region(&inner, region)?;
        let r = inner.regions.get_mut(region).unwrap();
        for id in resource_ids {
            if let Some(inst) = r.instances.iter_mut().find(|i| &i.instance_id == id) {
                inst.tags
                    .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            } else if let Some(req) = r.requests.iter_mut().find(|q| &q.request_id == id) {
                req.tags
                    .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Ok(())
    }

    async fn list_key_pairs(&self, region: &str, prefix: &str) -> CloudResult<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(check_region(&inner, region)?
            .key_pairs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_key_pair(
        &self,
        region: &str,
        name: &str,
        public_key: &str,
    ) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        check_region(&inner, region)?;
        let r = inner.regions.get_mut(region).unwrap();
        if r.key_pairs.contains_key(name) {
            return Err(CloudError::Rejected(format!(
                "key pair already exists: {name}"
            )));
        }
        r.key_pairs.insert(name.to_string(), public_key.to_string());
        Ok(())
    }

    async fn delete_key_pair(&self, region: &str, name: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock().unwrap();
        check_region(&inner, region)?;
        inner.regions.get_mut(region).unwrap().key_pairs.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(zone: &str, instance_type: &str, price: f64) -> BidRequestSpec {
        BidRequestSpec {
            availability_zone: zone.to_string(),
            instance_type: instance_type.to_string(),
            price,
            launch_spec: serde_json::json!({"image_id": "ami-123"}),
            key_name: "fleetgrid:p1:builder:abcd".to_string(),
        }
    }

    #[tokio::test]
    async fn submit_then_cancel_round_trips() {
        let cloud = InMemoryCloud::new(&["us-west-2"]);
        let id = cloud
            .submit_bid_request("us-west-2", &spec("us-west-2a", "m5.large", 0.1))
            .await
            .unwrap();

        assert_eq!(cloud.live_request_ids("us-west-2"), vec![id.clone()]);

        cloud
            .cancel_bid_requests("us-west-2", &[id.clone()])
            .await
            .unwrap();
        assert!(cloud.live_request_ids("us-west-2").is_empty());

        let dead = cloud.dead_bid_requests("us-west-2").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].state, BidRequestState::Cancelled);
    }

    #[tokio::test]
    async fn fulfill_creates_instance_and_dead_record() {
        let cloud = InMemoryCloud::new(&["us-west-2"]);
        let id = cloud
            .submit_bid_request("us-west-2", &spec("us-west-2a", "m5.large", 0.1))
            .await
            .unwrap();

        cloud.fulfill_request("us-west-2", &id, 5000);

        let instances = cloud.live_instances("us-west-2").await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].bid_request_id, Some(id.clone()));

        let dead = cloud.dead_bid_requests("us-west-2").await.unwrap();
        assert!(dead[0].is_fulfilled());
    }

    #[tokio::test]
    async fn deferred_submissions_are_invisible_until_published() {
        let cloud = InMemoryCloud::new(&["us-west-2"]);
        cloud.defer_visibility(true);

        let id = cloud
            .submit_bid_request("us-west-2", &spec("us-west-2a", "m5.large", 0.1))
            .await
            .unwrap();
        assert!(cloud.live_request_ids("us-west-2").is_empty());

        cloud.publish_pending();
        assert_eq!(cloud.live_request_ids("us-west-2"), vec![id]);
    }

    #[tokio::test]
    async fn unavailable_region_fails_every_call() {
        let cloud = InMemoryCloud::new(&["us-west-2"]);
        cloud.set_unavailable("us-west-2", true);
        assert!(cloud.live_instances("us-west-2").await.is_err());
        assert!(cloud.availability_zones("us-west-2").await.is_err());
    }

    #[tokio::test]
    async fn price_history_filters_by_window() {
        let cloud = InMemoryCloud::new(&["us-west-2"]);
        cloud.add_price(
            "us-west-2",
            PricePoint {
                instance_type: "m5.large".to_string(),
                availability_zone: "us-west-2a".to_string(),
                price: 0.05,
                timestamp: 100,
            },
        );
        cloud.add_price(
            "us-west-2",
            PricePoint {
                instance_type: "m5.large".to_string(),
                availability_zone: "us-west-2a".to_string(),
                price: 0.07,
                timestamp: 900,
            },
        );

        let points = cloud.price_history("us-west-2", 500).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].price, 0.07);
    }

    #[tokio::test]
    async fn duplicate_key_pair_is_rejected() {
        let cloud = InMemoryCloud::new(&["us-west-2"]);
        cloud
            .create_key_pair("us-west-2", "fleetgrid:p1:builder:ab", "ssh-rsa AAAA")
            .await
            .unwrap();
        assert!(
            cloud
                .create_key_pair("us-west-2", "fleetgrid:p1:builder:ab", "ssh-rsa AAAA")
                .await
                .is_err()
        );
        // Delete is idempotent.
        cloud
            .delete_key_pair("us-west-2", "fleetgrid:p1:builder:ab")
            .await
            .unwrap();
        cloud
            .delete_key_pair("us-west-2", "fleetgrid:p1:builder:ab")
            .await
            .unwrap();
    }
}
