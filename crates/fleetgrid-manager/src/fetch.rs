//! Per-region cloud state fetch.
//!
//! Each region is fetched by a pure worker function taking all context as
//! explicit parameters and returning a value; the caller joins and merges
//! the results. No shared mutable state crosses the fan-out.

use fleetgrid_cloud::{BidRequest, CloudCompute, Instance, PricePoint};

use crate::error::ManagerResult;
use crate::state::worker_type_of;

/// Everything fetched from one region in one pass, already filtered down
/// to resources owned by this provisioner.
#[derive(Debug)]
pub struct RegionSnapshot {
    pub region: String,
    pub instances: Vec<Instance>,
    pub dead_instances: Vec<Instance>,
    pub requests: Vec<BidRequest>,
    pub dead_requests: Vec<BidRequest>,
    pub zones: Vec<String>,
    pub prices: Vec<PricePoint>,
}

/// Fetch one region's live/dead resources, zones, and price history.
///
/// `price_since` bounds the price-history query; ownership filtering uses
/// `key_prefix`. Any individual call failure fails the whole snapshot:
/// partial state is worse than stale state.
pub async fn fetch_region(
    cloud: &dyn CloudCompute,
    region: &str,
    key_prefix: &str,
    price_since: u64,
) -> ManagerResult<RegionSnapshot> {
    let (instances, dead_instances, requests, dead_requests, zones, prices) = tokio::try_join!(
        cloud.live_instances(region),
        cloud.dead_instances(region),
        cloud.live_bid_requests(region),
        cloud.dead_bid_requests(region),
        cloud.availability_zones(region),
        cloud.price_history(region, price_since),
    )?;

    let owned = |key_name: &str| worker_type_of(key_prefix, key_name).is_some();

    Ok(RegionSnapshot {
        region: region.to_string(),
        instances: instances.into_iter().filter(|i| owned(&i.key_name)).collect(),
        dead_instances: dead_instances
            .into_iter()
            .filter(|i| owned(&i.key_name))
            .collect(),
        requests: requests.into_iter().filter(|q| owned(&q.key_name)).collect(),
        dead_requests: dead_requests
            .into_iter()
            .filter(|q| owned(&q.key_name))
            .collect(),
        zones,
        prices,
    })
}
