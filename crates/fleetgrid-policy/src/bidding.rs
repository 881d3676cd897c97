//! Spot bid selection — greedy comparison-price minimization.

use fleetgrid_bias::Biaser;
use fleetgrid_types::{Bid, PricingTable, WorkerTypePolicy};
use tracing::debug;

use crate::error::{PolicyError, PolicyResult};

/// Tunables for bid pricing.
#[derive(Debug, Clone)]
pub struct BidConfig {
    /// Submitted price = observed price × this factor, to reduce premature
    /// preemption. A tuning parameter, not a semantic requirement.
    pub safety_factor: f64,
    /// Absolute ceiling on any submitted price, independent of per-policy
    /// `max_price`. Breaching it aborts bidding entirely.
    pub max_bid_price: f64,
}

impl Default for BidConfig {
    fn default() -> Self {
        Self {
            safety_factor: 1.3,
            max_bid_price: 100.0,
        }
    }
}

fn round_price(price: f64) -> f64 {
    (price * 10_000.0).round() / 10_000.0
}

/// Pick bids until `capacity_needed` is covered.
///
/// Each round enumerates every (region ∈ `allowed_regions` ∩ policy
/// regions) × (instance type) × (zone with a price entry, restricted to the
/// policy's zones when configured) combination and takes the minimum of
/// `observed_price / utility × bias`, first-seen order breaking ties.
///
/// - an instance type declaring zero capacity → `ZeroCapacityType` (a bid
///   on it could never cover demand)
/// - no priced combination at all → `NoPricingData` (hard failure)
/// - chosen comparison below `min_price` → the bid is raised to correspond
///   to `min_price`
/// - chosen comparison above `max_price` → stop, return the bids chosen so
///   far (refuse to overpay)
/// - submitted price above `config.max_bid_price` → `BidSanityCeiling`
pub fn determine_spot_bids(
    policy: &WorkerTypePolicy,
    allowed_regions: &[String],
    pricing: &PricingTable,
    capacity_needed: i64,
    biaser: &Biaser,
    config: &BidConfig,
    now: u64,
) -> PolicyResult<Vec<Bid>> {
    // The schema does not validate capacity, so guard here: a zero-capacity
    // type never reduces the remaining demand and the loop below would not
    // terminate.
    if let Some(itype) = policy.instance_types.iter().find(|t| t.capacity == 0) {
        return Err(PolicyError::ZeroCapacityType {
            worker_type: policy.worker_type.clone(),
            instance_type: itype.instance_type.clone(),
        });
    }

    let mut bids = Vec::new();
    let mut remaining = capacity_needed;

    while remaining > 0 {
        let mut best: Option<(String, String, String, f64, f64, f64)> = None;

        for region in allowed_regions {
            if !policy.allows_region(region) {
                continue;
            }
            let Some(types) = pricing.get(region) else {
                continue;
            };
            let zone_filter = policy.allowed_zones(region);

            for itype in &policy.instance_types {
                let Some(zones) = types.get(&itype.instance_type) else {
                    continue;
                };
                // Sorted so tie-breaking is deterministic.
                let mut zone_names: Vec<&String> = zones.keys().collect();
                zone_names.sort();
                for zone in zone_names {
                    let price = zones[zone];
                    if let Some(ref allowed) = zone_filter
                        && !allowed.contains(&zone.as_str())
                    {
                        continue;
                    }
                    let bias = biaser.bias(region, zone, &itype.instance_type, now);
                    let comparison = price / itype.utility * bias;
                    let better = match &best {
                        Some((_, _, _, _, best_comparison, _)) => comparison < *best_comparison,
                        None => true,
                    };
                    if better {
                        best = Some((
                            region.clone(),
                            zone.clone(),
                            itype.instance_type.clone(),
                            price,
                            comparison,
                            bias,
                        ));
                    }
                }
            }
        }

        let Some((region, zone, instance_type, observed, mut comparison, bias)) = best else {
            // Nothing priced at all: surfacing beats silently under-provisioning.
            return Err(PolicyError::NoPricingData {
                worker_type: policy.worker_type.clone(),
            });
        };

        if comparison > policy.max_price {
            debug!(
                worker_type = %policy.worker_type,
                comparison,
                max_price = policy.max_price,
                "cheapest combination exceeds max price, stopping"
            );
            break;
        }

        let utility = policy.utility_of_type(&instance_type);
        let mut submitted = round_price(observed * config.safety_factor);
        if comparison < policy.min_price {
            // Raise the bid to the observed-price equivalent of the floor.
            submitted = round_price(policy.min_price * utility);
            comparison = policy.min_price;
        }

        if submitted > config.max_bid_price {
            return Err(PolicyError::BidSanityCeiling {
                price: submitted,
                ceiling: config.max_bid_price,
            });
        }

        remaining -= policy.capacity_of_type(&instance_type) as i64;
        debug!(
            worker_type = %policy.worker_type,
            %region,
            %zone,
            %instance_type,
            submitted,
            comparison,
            remaining,
            "bid chosen"
        );
        bids.push(Bid {
            region,
            zone,
            instance_type,
            submitted_price: submitted,
            comparison_price: comparison,
            bias,
        });
    }

    Ok(bids)
}
