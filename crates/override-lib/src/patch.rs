//! JSON patch computation
//!
//! The typed pod model drops fields it does not know, so diffing a
//! re-serialized pod against the raw request object would produce spurious
//! `remove` operations. Instead the mutated blocks are written back onto a
//! copy of the raw object, and only that copy is diffed.

use k8s_openapi::api::core::v1::{Container, Pod};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to serialize - {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("object does not match the decoded pod - {0}")]
    ShapeMismatch(String),
}

/// Copy of `original` with each (init)container's `resources` taken from `mutated`
pub fn overlay_containers(original: &Value, mutated: &Pod) -> Result<Value, PatchError> {
    let mut target = original.clone();
    let Some(spec) = mutated.spec.as_ref() else {
        return Ok(target);
    };

    overlay_resources(
        &mut target,
        "initContainers",
        spec.init_containers.as_deref().unwrap_or_default(),
    )?;
    overlay_resources(&mut target, "containers", &spec.containers)?;

    Ok(target)
}

fn overlay_resources(target: &mut Value, field: &str, containers: &[Container]) -> Result<(), PatchError> {
    if containers.is_empty() {
        return Ok(());
    }

    let entries = target
        .pointer_mut(&format!("/spec/{field}"))
        .and_then(Value::as_array_mut)
        .ok_or_else(|| PatchError::ShapeMismatch(format!("spec.{field} is missing")))?;

    if entries.len() != containers.len() {
        return Err(PatchError::ShapeMismatch(format!(
            "spec.{field} has {} entries, expected {}",
            entries.len(),
            containers.len()
        )));
    }

    for (entry, container) in entries.iter_mut().zip(containers) {
        let Some(resources) = container.resources.as_ref() else {
            continue;
        };

        let entry = entry.as_object_mut().ok_or_else(|| {
            PatchError::ShapeMismatch(format!("spec.{field} entry {:?} is not an object", container.name))
        })?;
        entry.insert("resources".to_string(), serde_json::to_value(resources)?);
    }

    Ok(())
}

/// Copy of `original` with `spec.securityContext` taken from `mutated`
pub fn overlay_pod_security_context(original: &Value, mutated: &Pod) -> Result<Value, PatchError> {
    let mut target = original.clone();
    let Some(security_context) = mutated.spec.as_ref().and_then(|spec| spec.security_context.as_ref()) else {
        return Ok(target);
    };

    let spec = target
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| PatchError::ShapeMismatch("spec is missing".to_string()))?;
    spec.insert("securityContext".to_string(), serde_json::to_value(security_context)?);

    Ok(target)
}

/// Serialized RFC 6902 operations turning `original` into `mutated`
///
/// Returns an empty buffer when the two documents are equal.
pub fn create_patch(original: &Value, mutated: &Value) -> Result<Vec<u8>, PatchError> {
    let patch = json_patch::diff(original, mutated);
    if patch.0.is_empty() {
        return Ok(Vec::new());
    }

    Ok(serde_json::to_vec(&patch)?)
}
