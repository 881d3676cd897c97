//! Launch spec materialization.
//!
//! A launch spec is assembled from the policy's template layers in strict
//! precedence order: base → region → zone → instance type. Two keys are
//! owned by a single layer: `image_id` belongs to the region (or zone)
//! layer and `instance_type` to the instance-type layer. A key appearing
//! in two override layers is an ambiguous-precedence configuration error.
//! All of this is checked before any cloud call is made.

use fleetgrid_types::{Bid, JsonObject, WorkerTypePolicy};
use serde_json::Value;

use crate::error::{PolicyError, PolicyResult};

/// Keys a launch spec may contain.
const ALLOWED_KEYS: &[&str] = &[
    "image_id",
    "instance_type",
    "key_name",
    "security_groups",
    "subnet_id",
    "iam_profile",
    "block_device_mappings",
    "placement_group",
    "monitoring",
    "ebs_optimized",
    "user_data",
];

/// Keys every launch spec must contain after merging.
const REQUIRED_KEYS: &[&str] = &["image_id", "instance_type", "key_name"];

/// Key pairs that must not appear together. A legacy security-group list
/// conflicts with VPC subnet placement.
const EXCLUSIVE_KEYS: &[(&str, &str)] = &[("security_groups", "subnet_id")];

/// Build the fully materialized launch request for `bid`.
///
/// `key_name` is the provisioner-owned keypair name for this worker type;
/// `security_token` is the freshly generated single-use token the worker
/// redeems against the secret store after boot.
pub fn create_launch_spec(
    policy: &WorkerTypePolicy,
    bid: &Bid,
    provisioner_id: &str,
    key_name: &str,
    security_token: &str,
) -> PolicyResult<Value> {
    let region_spec = policy
        .regions
        .iter()
        .find(|r| r.region == bid.region)
        .ok_or_else(|| PolicyError::NotCovered {
            worker_type: policy.worker_type.clone(),
            what: format!("region {}", bid.region),
        })?;
    let zone_spec = policy
        .availability_zones
        .iter()
        .find(|z| z.region == bid.region && z.availability_zone == bid.zone);
    let type_spec = policy
        .instance_types
        .iter()
        .find(|t| t.instance_type == bid.instance_type)
        .ok_or_else(|| PolicyError::NotCovered {
            worker_type: policy.worker_type.clone(),
            what: format!("instance type {}", bid.instance_type),
        })?;

    let zone_launch = zone_spec.map(|z| &z.launch_spec);
    let zone_user_data = zone_spec.map(|z| &z.user_data);

    validate_layer_ownership(
        &policy.launch_spec,
        &region_spec.launch_spec,
        zone_launch,
        &type_spec.launch_spec,
    )?;

    // Merge launch-spec layers, lowest precedence first.
    let mut spec = JsonObject::new();
    for layer in [
        Some(&policy.launch_spec),
        Some(&region_spec.launch_spec),
        zone_launch,
        Some(&type_spec.launch_spec),
    ]
    .into_iter()
    .flatten()
    {
        for (k, v) in layer {
            spec.insert(k.clone(), v.clone());
        }
    }

    // The chosen type and keypair are authoritative regardless of templates.
    spec.entry("instance_type".to_string())
        .or_insert_with(|| Value::String(bid.instance_type.clone()));
    spec.insert("key_name".to_string(), Value::String(key_name.to_string()));

    // Merge user-data layers and inject the worker's boot context.
    let mut user_data = JsonObject::new();
    for layer in [
        Some(&policy.user_data),
        Some(&region_spec.user_data),
        zone_user_data,
        Some(&type_spec.user_data),
    ]
    .into_iter()
    .flatten()
    {
        for (k, v) in layer {
            user_data.insert(k.clone(), v.clone());
        }
    }
    user_data.insert("capacity".to_string(), Value::from(type_spec.capacity));
    user_data.insert(
        "worker_type".to_string(),
        Value::String(policy.worker_type.clone()),
    );
    user_data.insert(
        "provisioner_id".to_string(),
        Value::String(provisioner_id.to_string()),
    );
    user_data.insert("region".to_string(), Value::String(bid.region.clone()));
    user_data.insert("zone".to_string(), Value::String(bid.zone.clone()));
    user_data.insert(
        "instance_type".to_string(),
        Value::String(bid.instance_type.clone()),
    );
    user_data.insert("bid_price".to_string(), Value::from(bid.submitted_price));
    user_data.insert(
        "security_token".to_string(),
        Value::String(security_token.to_string()),
    );
    user_data.insert(
        "policy_last_modified".to_string(),
        Value::from(policy.last_modified),
    );
    spec.insert("user_data".to_string(), Value::Object(user_data));

    validate_final_spec(&spec)?;
    Ok(Value::Object(spec))
}

/// Enforce single-layer key ownership and unambiguous override precedence.
fn validate_layer_ownership(
    general: &JsonObject,
    region: &JsonObject,
    zone: Option<&JsonObject>,
    itype: &JsonObject,
) -> PolicyResult<()> {
    // image_id is region-scoped (zone layers are region-scoped too).
    for (layer, name) in [(general, "general"), (itype, "instance-type")] {
        if layer.contains_key("image_id") {
            return Err(PolicyError::MisplacedKey {
                key: "image_id".to_string(),
                layer: name.to_string(),
            });
        }
    }
    // instance_type belongs only to the instance-type layer.
    let mut lower_layers = vec![(general, "general"), (region, "region")];
    if let Some(z) = zone {
        lower_layers.push((z, "zone"));
    }
    for (layer, name) in &lower_layers {
        if layer.contains_key("instance_type") {
            return Err(PolicyError::MisplacedKey {
                key: "instance_type".to_string(),
                layer: name.to_string(),
            });
        }
    }

    // A key may appear in at most one override layer.
    let overrides: Vec<(&JsonObject, &str)> = match zone {
        Some(z) => vec![(region, "region"), (z, "zone"), (itype, "instance-type")],
        None => vec![(region, "region"), (itype, "instance-type")],
    };
    for (i, (a, a_name)) in overrides.iter().enumerate() {
        for (b, b_name) in &overrides[i + 1..] {
            if let Some(key) = a.keys().find(|k| b.contains_key(*k)) {
                return Err(PolicyError::AmbiguousOverride {
                    key: key.clone(),
                    first: a_name.to_string(),
                    second: b_name.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Validate the merged spec against the allow-list, required keys, and
/// mutually exclusive combinations.
fn validate_final_spec(spec: &JsonObject) -> PolicyResult<()> {
    for key in spec.keys() {
        if !ALLOWED_KEYS.contains(&key.as_str()) {
            return Err(PolicyError::UnknownKey(key.clone()));
        }
    }
    for key in REQUIRED_KEYS {
        if !spec.contains_key(*key) {
            return Err(PolicyError::MissingKey(key.to_string()));
        }
    }
    for (a, b) in EXCLUSIVE_KEYS {
        if spec.contains_key(*a) && spec.contains_key(*b) {
            return Err(PolicyError::ExclusiveKeys(a.to_string(), b.to_string()));
        }
    }
    Ok(())
}
