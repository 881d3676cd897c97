//! fleetgrid-bias — turns kill/fulfillment history into price-ranking
//! multipliers.
//!
//! The biaser holds a table of {kills, fulfillments} counters per
//! (region, zone, instance type), refreshed periodically from an external
//! observability query. `bias()` is a pure function of that table:
//!
//! ```text
//! stale table                     → 1.0 (neutral)
//! no kills, no fulfillments       → EXPLORE_BIAS (slightly below 1)
//! no kills, some fulfillments     → 1.0
//! kills but no fulfillments       → kills (avoid, but rankable)
//! otherwise                       → 1.0 + multiplier × kills / fulfillments
//! ```
//!
//! A refresh failure never blocks the control loop; the previous table
//! stays in effect and goes neutral once it ages out.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

/// Bias applied to combinations with no recorded history, encouraging a
/// small amount of exploration.
pub const EXPLORE_BIAS: f64 = 0.95;

/// Kill/fulfillment counters for one (region, zone, instance type).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiasCounters {
    pub kills: u64,
    pub fulfillments: u64,
}

/// region → zone → instance type → counters.
pub type BiasTable = HashMap<String, HashMap<String, HashMap<String, BiasCounters>>>;

/// External observability query producing a fresh bias table.
#[async_trait]
pub trait BiasSource: Send + Sync {
    /// Counters over the trailing window for every zone of every region.
    async fn kill_fulfillment_counts(
        &self,
        zones_by_region: &HashMap<String, Vec<String>>,
    ) -> Result<BiasTable, String>;
}

/// Stateless ranking function over a periodically refreshed table.
pub struct Biaser {
    table: BiasTable,
    /// Unix timestamp (seconds) of the last successful refresh. `None`
    /// until the first refresh completes.
    refreshed_at: Option<u64>,
    /// Table older than this (seconds) is treated as absent.
    max_bias_age: u64,
    /// Weight of the kill rate in the biased price.
    kill_rate_multiplier: f64,
}

impl Biaser {
    pub fn new(max_bias_age: u64, kill_rate_multiplier: f64) -> Self {
        Self {
            table: BiasTable::new(),
            refreshed_at: None,
            max_bias_age,
            kill_rate_multiplier,
        }
    }

    /// Install a table directly, stamped with its refresh time.
    pub fn with_table(mut self, table: BiasTable, refreshed_at: u64) -> Self {
        self.table = table;
        self.refreshed_at = Some(refreshed_at);
        self
    }

    /// Multiplier for ranking a (region, zone, instance type) combination.
    /// Always ≥ 0; 1.0 is neutral.
    pub fn bias(&self, region: &str, zone: &str, instance_type: &str, now: u64) -> f64 {
        let fresh = match self.refreshed_at {
            Some(t) => now.saturating_sub(t) <= self.max_bias_age,
            None => false,
        };
        if !fresh {
            return 1.0;
        }

        let counters = self
            .table
            .get(region)
            .and_then(|zones| zones.get(zone))
            .and_then(|types| types.get(instance_type))
            .copied()
            .unwrap_or_default();

        match (counters.kills, counters.fulfillments) {
            (0, 0) => EXPLORE_BIAS,
            (0, _) => 1.0,
            (kills, 0) => kills as f64,
            (kills, fulfillments) => {
                1.0 + self.kill_rate_multiplier * (kills as f64 / fulfillments as f64)
            }
        }
    }

    /// Refresh the table from the external source.
    ///
    /// On failure the previous table is kept; the caller's loop continues
    /// either way.
    pub async fn refresh(
        &mut self,
        source: &dyn BiasSource,
        zones_by_region: &HashMap<String, Vec<String>>,
        now: u64,
    ) {
        match source.kill_fulfillment_counts(zones_by_region).await {
            Ok(table) => {
                debug!(regions = table.len(), "bias table refreshed");
                self.table = table;
                self.refreshed_at = Some(now);
            }
            Err(e) => {
                warn!(error = %e, "bias refresh failed, keeping previous table");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(region: &str, zone: &str, itype: &str, counters: BiasCounters) -> BiasTable {
        let mut table = BiasTable::new();
        table
            .entry(region.to_string())
            .or_default()
            .entry(zone.to_string())
            .or_default()
            .insert(itype.to_string(), counters);
        table
    }

    #[test]
    fn unrefreshed_biaser_is_neutral() {
        let biaser = Biaser::new(1200, 1.0);
        assert_eq!(biaser.bias("us-west-2", "us-west-2a", "m5.large", 1000), 1.0);
    }

    #[test]
    fn stale_table_is_neutral() {
        let table = table_with(
            "us-west-2",
            "us-west-2a",
            "m5.large",
            BiasCounters {
                kills: 50,
                fulfillments: 1,
            },
        );
        let biaser = Biaser::new(1200, 1.0).with_table(table, 1000);
        // Within max age: biased. Past it: neutral.
        assert!(biaser.bias("us-west-2", "us-west-2a", "m5.large", 2000) > 1.0);
        assert_eq!(biaser.bias("us-west-2", "us-west-2a", "m5.large", 2300), 1.0);
    }

    #[test]
    fn no_history_gets_explore_bias() {
        let table = BiasTable::new();
        let biaser = Biaser::new(1200, 1.0).with_table(table, 1000);
        assert_eq!(
            biaser.bias("us-west-2", "us-west-2a", "m5.large", 1000),
            EXPLORE_BIAS
        );
    }

    #[test]
    fn fulfillments_without_kills_are_neutral() {
        let table = table_with(
            "us-west-2",
            "us-west-2a",
            "m5.large",
            BiasCounters {
                kills: 0,
                fulfillments: 7,
            },
        );
        let biaser = Biaser::new(1200, 1.0).with_table(table, 1000);
        assert_eq!(biaser.bias("us-west-2", "us-west-2a", "m5.large", 1000), 1.0);
    }

    #[test]
    fn kills_without_fulfillments_return_raw_kill_count() {
        let table = table_with(
            "us-west-2",
            "us-west-2a",
            "m5.large",
            BiasCounters {
                kills: 4,
                fulfillments: 0,
            },
        );
        let biaser = Biaser::new(1200, 1.0).with_table(table, 1000);
        assert_eq!(biaser.bias("us-west-2", "us-west-2a", "m5.large", 1000), 4.0);
    }

    #[test]
    fn kill_rate_scales_with_multiplier() {
        let table = table_with(
            "us-west-2",
            "us-west-2a",
            "m5.large",
            BiasCounters {
                kills: 3,
                fulfillments: 6,
            },
        );
        let biaser = Biaser::new(1200, 2.0).with_table(table, 1000);
        // 1 + 2.0 × (3/6) = 2.0
        assert_eq!(biaser.bias("us-west-2", "us-west-2a", "m5.large", 1000), 2.0);
    }

    struct FailingSource;

    #[async_trait]
    impl BiasSource for FailingSource {
        async fn kill_fulfillment_counts(
            &self,
            _zones: &HashMap<String, Vec<String>>,
        ) -> Result<BiasTable, String> {
            Err("query backend down".to_string())
        }
    }

    struct FixedSource(BiasTable);

    #[async_trait]
    impl BiasSource for FixedSource {
        async fn kill_fulfillment_counts(
            &self,
            _zones: &HashMap<String, Vec<String>>,
        ) -> Result<BiasTable, String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn refresh_failure_keeps_previous_table() {
        let table = table_with(
            "us-west-2",
            "us-west-2a",
            "m5.large",
            BiasCounters {
                kills: 4,
                fulfillments: 0,
            },
        );
        let mut biaser = Biaser::new(1200, 1.0).with_table(table, 1000);

        biaser
            .refresh(&FailingSource, &HashMap::new(), 1100)
            .await;
        // Previous counters still in effect, timestamp unchanged.
        assert_eq!(biaser.bias("us-west-2", "us-west-2a", "m5.large", 1100), 4.0);
    }

    #[tokio::test]
    async fn refresh_replaces_table_and_timestamp() {
        let mut biaser = Biaser::new(1200, 1.0);
        let table = table_with(
            "us-west-2",
            "us-west-2a",
            "m5.large",
            BiasCounters {
                kills: 0,
                fulfillments: 3,
            },
        );

        biaser
            .refresh(&FixedSource(table), &HashMap::new(), 5000)
            .await;
        assert_eq!(biaser.bias("us-west-2", "us-west-2a", "m5.large", 5100), 1.0);
        assert_eq!(
            biaser.bias("us-west-2", "us-west-2b", "m5.large", 5100),
            EXPLORE_BIAS
        );
    }
}
