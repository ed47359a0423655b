//! Config validator: turns the raw document into a typed monitor table.
//!
//! The operator's document is loosely typed JSON; this module validates it in
//! two passes and materializes one [`MonitorSpec`] per monitor entry. Error
//! accumulation is mandatory — every independent fault across every monitor
//! and rule is collected before returning, never short-circuited, so the
//! operator sees the complete picture in one run. The reason list is
//! deduplicated preserving first-occurrence order.
//!
//! ## Document shape
//!
//! ```json
//! {
//!   "monitors": {
//!     "single": [
//!       {"name": "m1", "type": "http", "config": {...},
//!        "retry_policy": {"max_retries": 3, "retry_timeout": 1000,
//!                         "backoff_strategy": "exponential"}}
//!     ]
//!   },
//!   "rules": [
//!     {"name": "r1", "monitor": "m1"},
//!     {"name": "r2", "monitor": ["m1", "m2"]}
//!   ]
//! }
//! ```
//!
//! ## Passes
//!
//! 1. *Rule structural check* — builds the monitor-name → rule-names index
//!    used for `inform_to`, collecting structural errors. A rule whose own
//!    name is unrecoverable is reported under the synthetic name `UNKNOWN`.
//! 2. *Per-monitor validation* — common fields, retry policy shape, protocol
//!    config against the worker's field schemas, and rule coverage; each
//!    monitor is validated independently of its siblings.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::policy::{BackoffStrategy, RetryPolicy};
use crate::schema::FieldSchema;

/// Parse a raw configuration document from JSON text.
///
/// This only decodes the text; pass the resulting value to
/// [`validate_document`] (or [`Supervisor::start`](crate::Supervisor::start))
/// for the actual validation.
pub fn parse_document(text: &str) -> crate::Result<Value> {
    Ok(serde_json::from_str(text)?)
}

/// A fully-typed monitor record, produced by validation. Immutable.
#[derive(Debug, Clone)]
pub struct MonitorSpec {
    /// Operator-assigned monitor id, unique within the document.
    pub id: String,
    /// Protocol tag; resolves to a registered worker factory.
    pub kind: String,
    /// Validated protocol config with declared defaults applied, keyed by
    /// the schema's field names.
    pub config: Map<String, Value>,
    /// How operational failures are retried.
    pub retry_policy: RetryPolicy,
    /// Rule names subscribed to this monitor's output, in rule declaration
    /// order, deduplicated.
    pub inform_to: Vec<String>,
}

/// Validate a configuration document against the given protocol schemas.
///
/// `schemas` maps each known protocol tag to its field-schema list (built at
/// startup from the installed worker factories, see
/// [`WorkerRegistry::schemas`](crate::worker::WorkerRegistry::schemas)).
///
/// Returns the monitor table, or the aggregated list of human-readable
/// reasons. Validation is idempotent and performs no I/O.
pub fn validate_document(
    doc: &Value,
    schemas: &HashMap<String, Vec<FieldSchema>>,
) -> Result<Vec<MonitorSpec>, Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    let monitors = monitor_entries(doc, &mut errors);
    let rules = rule_entries(doc, &mut errors);

    // Pass 1: rule structure + subscriber index.
    let targets = index_rule_targets(&rules, &mut errors);

    // Pass 2: monitors, independently and in declaration order.
    let mut specs = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();
    for (index, entry) in monitors.iter().enumerate() {
        validate_monitor(
            index,
            entry,
            schemas,
            &targets,
            &mut seen_names,
            &mut errors,
            &mut specs,
        );
    }

    let errors = dedup_reasons(errors);
    if errors.is_empty() {
        Ok(specs)
    } else {
        Err(errors)
    }
}

/// Extract `monitors.single`, tolerating an absent key (empty document).
fn monitor_entries<'a>(doc: &'a Value, errors: &mut Vec<String>) -> Vec<&'a Value> {
    let Some(root) = doc.as_object() else {
        errors.push("configuration document must be a JSON object".to_string());
        return Vec::new();
    };

    let Some(monitors) = root.get("monitors") else {
        return Vec::new();
    };
    let Some(monitors) = monitors.as_object() else {
        errors.push("monitors: must be an object".to_string());
        return Vec::new();
    };

    match monitors.get("single") {
        None => Vec::new(),
        Some(Value::Array(entries)) => entries.iter().collect(),
        Some(_) => {
            errors.push("monitors.single: must be an array".to_string());
            Vec::new()
        }
    }
}

/// Extract `rules`, tolerating an absent key.
fn rule_entries<'a>(doc: &'a Value, errors: &mut Vec<String>) -> Vec<&'a Value> {
    let Some(root) = doc.as_object() else {
        // Already reported by monitor_entries.
        return Vec::new();
    };

    match root.get("rules") {
        None => Vec::new(),
        Some(Value::Array(entries)) => entries.iter().collect(),
        Some(_) => {
            errors.push("rules: must be an array".to_string());
            Vec::new()
        }
    }
}

/// Pass 1: structural check of every rule entry, building the
/// monitor-name → rule-names index.
///
/// Rules with errors still contribute to the index where possible — a rule
/// with a good name and a partially-bad monitor list indexes its valid
/// entries. A rule without a recoverable name cannot be subscribed to, so
/// its targets are not indexed.
fn index_rule_targets(
    rules: &[&Value],
    errors: &mut Vec<String>,
) -> HashMap<String, Vec<String>> {
    let mut targets: HashMap<String, Vec<String>> = HashMap::new();

    for entry in rules {
        let Some(obj) = entry.as_object() else {
            errors.push("Rule 'UNKNOWN' must be an object".to_string());
            continue;
        };

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let display = name.unwrap_or("UNKNOWN");
        if name.is_none() {
            errors.push(format!("Rule '{}' must have a non-empty 'name' field", display));
        }

        match obj.get("monitor") {
            Some(Value::String(monitor)) if !monitor.is_empty() => {
                if let Some(rule) = name {
                    push_target(&mut targets, monitor, rule);
                }
            }
            Some(Value::String(_)) => {
                errors.push(format!(
                    "Rule '{}': 'monitor' entries must be non-empty strings",
                    display
                ));
            }
            Some(Value::Array(items)) => {
                for item in items {
                    match item.as_str().filter(|s| !s.is_empty()) {
                        Some(monitor) => {
                            if let Some(rule) = name {
                                push_target(&mut targets, monitor, rule);
                            }
                        }
                        None => errors.push(format!(
                            "Rule '{}': 'monitor' entries must be non-empty strings",
                            display
                        )),
                    }
                }
            }
            _ => errors.push(format!("Rule '{}' must have a 'monitor' field", display)),
        }
    }

    targets
}

fn push_target(targets: &mut HashMap<String, Vec<String>>, monitor: &str, rule: &str) {
    let entries = targets.entry(monitor.to_string()).or_default();
    if !entries.iter().any(|r| r == rule) {
        entries.push(rule.to_string());
    }
}

/// Pass 2, one monitor: common fields, retry policy, protocol config,
/// rule coverage. Appends every fault to `errors`; appends a spec only
/// when the entry produced no fault at all.
fn validate_monitor(
    index: usize,
    entry: &Value,
    schemas: &HashMap<String, Vec<FieldSchema>>,
    targets: &HashMap<String, Vec<String>>,
    seen_names: &mut HashSet<String>,
    errors: &mut Vec<String>,
    specs: &mut Vec<MonitorSpec>,
) {
    let Some(obj) = entry.as_object() else {
        errors.push(format!("Monitor at index {}: must be an object", index));
        return;
    };

    let Some(name) = obj
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    else {
        errors.push(format!(
            "Monitor at index {}: 'name' must be a non-empty string",
            index
        ));
        return;
    };

    if !seen_names.insert(name.to_string()) {
        errors.push(format!("Monitor '{}': duplicate monitor name", name));
        return;
    }

    let Some(kind) = obj.get("type").and_then(Value::as_str) else {
        errors.push(format!("Monitor '{}': 'type' must be a string", name));
        return;
    };
    let Some(schema) = schemas.get(kind) else {
        errors.push(format!("Monitor '{}': unknown protocol type '{}'", name, kind));
        return;
    };

    let before = errors.len();

    let retry_policy = validate_retry_policy(name, obj.get("retry_policy"), errors);
    let config = validate_config(name, obj.get("config"), schema, errors);

    let inform_to = targets.get(name).cloned().unwrap_or_default();
    if inform_to.is_empty() {
        errors.push(format!("Monitor '{}' is not targeted by any rule", name));
    }

    if errors.len() == before {
        if let (Some(retry_policy), Some(config)) = (retry_policy, config) {
            specs.push(MonitorSpec {
                id: name.to_string(),
                kind: kind.to_string(),
                config,
                retry_policy,
                inform_to,
            });
        }
    }
}

/// Validate `retry_policy` as a map containing exactly `max_retries`,
/// `retry_timeout`, and `backoff_strategy`. Each failure is reported
/// independently.
fn validate_retry_policy(
    name: &str,
    value: Option<&Value>,
    errors: &mut Vec<String>,
) -> Option<RetryPolicy> {
    let Some(Value::Object(map)) = value else {
        errors.push(format!("Monitor '{}': 'retry_policy' must be an object", name));
        return None;
    };

    let max_retries = match map.get("max_retries") {
        None => {
            errors.push(format!(
                "Monitor '{}' -> retry_policy.max_retries: required field missing",
                name
            ));
            None
        }
        // null = unlimited retries; the policy engine never shuts down.
        Some(Value::Null) => Some(None),
        Some(other) => match other.as_u64() {
            Some(n) => Some(Some(u32::try_from(n).unwrap_or(u32::MAX))),
            None => {
                errors.push(format!(
                    "Monitor '{}' -> retry_policy.max_retries: must be a non-negative integer or null",
                    name
                ));
                None
            }
        },
    };

    let retry_timeout = match map.get("retry_timeout") {
        None => {
            errors.push(format!(
                "Monitor '{}' -> retry_policy.retry_timeout: required field missing",
                name
            ));
            None
        }
        Some(v) => match v.as_u64() {
            Some(ms) if ms > 0 => Some(ms),
            _ => {
                errors.push(format!(
                    "Monitor '{}' -> retry_policy.retry_timeout: must be a positive integer",
                    name
                ));
                None
            }
        },
    };

    let backoff = match map.get("backoff_strategy") {
        None => {
            errors.push(format!(
                "Monitor '{}' -> retry_policy.backoff_strategy: required field missing",
                name
            ));
            None
        }
        Some(v) => match v.as_str().map(BackoffStrategy::parse) {
            Some(Ok(strategy)) => Some(strategy),
            _ => {
                errors.push(format!(
                    "Monitor '{}' -> retry_policy.backoff_strategy: must be one of fixed, linear, exponential",
                    name
                ));
                None
            }
        },
    };

    for key in map.keys() {
        if !matches!(key.as_str(), "max_retries" | "retry_timeout" | "backoff_strategy") {
            errors.push(format!(
                "Monitor '{}' -> retry_policy.{}: unexpected field",
                name, key
            ));
        }
    }

    match (max_retries, retry_timeout, backoff) {
        (Some(max_retries), Some(retry_timeout), Some(backoff)) => {
            Some(RetryPolicy::new(max_retries, backoff, retry_timeout))
        }
        _ => None,
    }
}

/// Validate `config` against the protocol's field schemas and apply
/// declared defaults.
///
/// When `config` is absent or not a map, the structural error is reported
/// *and* one "required field missing" per required schema field, so the
/// operator sees everything the schema expects in a single run.
fn validate_config(
    name: &str,
    value: Option<&Value>,
    schema: &[FieldSchema],
    errors: &mut Vec<String>,
) -> Option<Map<String, Value>> {
    let map = match value {
        Some(Value::Object(map)) => map,
        _ => {
            errors.push(format!(
                "Monitor '{}': 'config' field required and must be an object",
                name
            ));
            for field in schema.iter().filter(|f| f.is_required()) {
                errors.push(format!(
                    "Monitor '{}' -> config.{}: required field missing",
                    name,
                    field.name()
                ));
            }
            return None;
        }
    };

    let before = errors.len();

    for field in schema {
        match map.get(field.name()) {
            Some(value) => {
                for reason in field.validate(value) {
                    errors.push(format!(
                        "Monitor '{}' -> config.{}: {}",
                        name,
                        field.name(),
                        reason
                    ));
                }
            }
            None if field.is_required() => errors.push(format!(
                "Monitor '{}' -> config.{}: required field missing",
                name,
                field.name()
            )),
            None => {}
        }
    }

    let known: HashSet<&str> = schema.iter().map(|f| f.name()).collect();
    for key in map.keys() {
        if !known.contains(key.as_str()) {
            errors.push(format!(
                "Monitor '{}' -> config.{}: unexpected field",
                name, key
            ));
        }
    }

    if errors.len() != before {
        return None;
    }

    let mut out = Map::new();
    for field in schema {
        if let Some(value) = map.get(field.name()) {
            out.insert(field.name().to_string(), value.clone());
        } else if let Some(default) = field.default() {
            out.insert(field.name().to_string(), default.clone());
        }
    }
    Some(out)
}

/// Remove duplicate reasons, preserving first-occurrence order.
fn dedup_reasons(reasons: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    reasons
        .into_iter()
        .filter(|reason| seen.insert(reason.clone()))
        .collect()
}
