//! Capacity delta computation.

use fleetgrid_types::WorkerTypePolicy;

/// Decide how many capacity units to add (positive) or remove (negative).
///
/// The desired pending capacity is `scaling_ratio × running`, so a nonzero
/// ratio keeps headroom proportional to the running fleet. The raw change
/// is whatever closes the gap between the backlog and that headroom,
/// clamped so `running + pending + change` never leaves
/// `[min_capacity, max_capacity]`.
pub fn determine_capacity_change(
    policy: &WorkerTypePolicy,
    running_capacity: i64,
    pending_capacity: i64,
    pending_tasks: i64,
) -> i64 {
    let desired_pending = (policy.scaling_ratio * running_capacity as f64).round() as i64;
    let mut change = pending_tasks - pending_capacity - desired_pending;

    let total = running_capacity + pending_capacity;
    if total + change > policy.max_capacity {
        change = policy.max_capacity - total;
    }
    if total + change < policy.min_capacity {
        change = policy.min_capacity - total;
    }
    change
}
