//! Container merging.
//!
//! Overrides win field by field. Object fields such as `resources.limits`
//! merge per key, `args` and `envFrom` concatenate, and `env` merges by
//! variable name.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::{Container, EnvVar};
use serde_json::Value;

/// Separator used when joining colliding container env values
pub const ENV_SEPARATOR: &str = " ";

/// Merge environment variables by name.
///
/// Order follows first appearance. A later entry with `valueFrom` replaces
/// the earlier one outright, as does any entry replacing a `valueFrom`.
/// Two plain values are joined with `separator`.
pub fn merge_env_vars(base: &[EnvVar], overrides: &[EnvVar], separator: &str) -> Vec<EnvVar> {
    let mut merged: Vec<EnvVar> = Vec::with_capacity(base.len() + overrides.len());

    for env in base.iter().chain(overrides) {
        let Some(existing) = merged.iter_mut().find(|e| e.name == env.name) else {
            merged.push(env.clone());
            continue;
        };
        if env.value_from.is_some() || existing.value_from.is_some() {
            *existing = env.clone();
            continue;
        }
        let joined = match (existing.value.as_deref(), env.value.as_deref()) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
                Some(format!("{}{}{}", a, separator, b))
            }
            (_, Some(b)) if !b.is_empty() => Some(b.to_string()),
            (a, _) => a.map(str::to_string),
        };
        existing.value = joined;
    }

    merged
}

/// Recursively merge `patch` into `target`; `null` in `patch` is ignored
fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (_, Value::Null) => {}
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        if !value.is_null() {
                            target.insert(key, value);
                        }
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

fn concat<T: Clone>(base: Option<&Vec<T>>, overrides: Option<&Vec<T>>) -> Option<Vec<T>> {
    let merged: Vec<T> = base.into_iter().chain(overrides).flatten().cloned().collect();
    (!merged.is_empty()).then_some(merged)
}

/// Merge `overrides` onto `base`
pub fn merge_container(
    base: &Container,
    overrides: &Container,
) -> Result<Container, ControllerError> {
    let mut merged = serde_json::to_value(base)?;
    deep_merge(&mut merged, serde_json::to_value(overrides)?);
    let mut container: Container = serde_json::from_value(merged)?;

    if overrides.name.is_empty() {
        container.name = base.name.clone();
    }
    container.args = concat(base.args.as_ref(), overrides.args.as_ref());
    container.env_from = concat(base.env_from.as_ref(), overrides.env_from.as_ref());
    let env = merge_env_vars(
        base.env.as_deref().unwrap_or_default(),
        overrides.env.as_deref().unwrap_or_default(),
        ENV_SEPARATOR,
    );
    container.env = (!env.is_empty()).then_some(env);

    Ok(container)
}
