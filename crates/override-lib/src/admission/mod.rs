//! Admission orchestration
//!
//! Every request goes through the same decision sequence:
//!
//! ```text
//! not applicable          -> allowed
//! exemption lookup fails  -> denied (Forbidden)
//! exempt                  -> allowed
//! otherwise               -> admit (allowed, allowed with patch, or denied)
//! ```

mod cluster_resource_override;
mod svt_relabel;

pub use cluster_resource_override::{ClusterResourceOverrideAdmission, OVERRIDE_WEBHOOK};
pub use svt_relabel::{PodSvtRelabelAdmission, SPC_TYPE, SVT_ENABLED_LABEL, SVT_WEBHOOK};

use crate::limits::{RESOURCE_CPU, RESOURCE_MEMORY};
use crate::observability::{AdmissionMetrics, StructuredLogger};
use crate::quantity::{Quantity, QuantityError};
use crate::review::{AdmissionRequest, AdmissionResponse};
use k8s_openapi::api::core::v1::Pod;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// One admission controller behind a webhook endpoint
pub trait Admission: Send + Sync {
    /// Webhook name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Whether the request is something this admission looks at
    fn is_applicable(&self, request: &AdmissionRequest) -> bool;

    /// `Ok(true)` to allow unchanged; `Err` carries the response to return
    /// without proceeding
    fn is_exempt(&self, request: &AdmissionRequest) -> Result<bool, AdmissionResponse>;

    fn admit(&self, request: &AdmissionRequest) -> AdmissionResponse;
}

/// Run the full decision sequence for one request, recording the outcome
pub fn admit_request(admission: &dyn Admission, request: &AdmissionRequest) -> AdmissionResponse {
    let started = Instant::now();
    let response = decide(admission, request);
    let elapsed = started.elapsed().as_secs_f64();

    AdmissionMetrics::new().observe_decision(admission.name(), response.outcome(), elapsed);
    StructuredLogger::new(admission.name()).log_decision(request, &response, elapsed);

    response
}

fn decide(admission: &dyn Admission, request: &AdmissionRequest) -> AdmissionResponse {
    if !admission.is_applicable(request) {
        debug!(
            namespace = %request.namespace,
            resource = %request.resource.resource,
            sub_resource = %request.sub_resource,
            "request is not applicable"
        );
        return AdmissionResponse::allowed(request);
    }

    match admission.is_exempt(request) {
        Err(response) => return response,
        Ok(true) => return AdmissionResponse::allowed(request),
        Ok(false) => {}
    }

    admission.admit(request)
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("admission request carries no object")]
    MissingObject,

    #[error("failed to decode pod - {0}")]
    Json(#[from] serde_json::Error),

    #[error("container {container:?} has an invalid {field} - {source}")]
    InvalidQuantity {
        container: String,
        field: String,
        #[source]
        source: QuantityError,
    },
}

/// Decode the request object as a pod, rejecting unparseable cpu/memory quantities
pub fn decode_pod(request: &AdmissionRequest) -> Result<Pod, DecodeError> {
    let object = request.object.as_ref().ok_or(DecodeError::MissingObject)?;
    let pod: Pod = serde_json::from_value(object.clone())?;

    let Some(spec) = pod.spec.as_ref() else {
        return Ok(pod);
    };

    let containers = spec
        .init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter());

    for container in containers {
        let Some(resources) = container.resources.as_ref() else {
            continue;
        };

        let lists = [("limits", &resources.limits), ("requests", &resources.requests)];
        for (list_name, list) in lists {
            let Some(list) = list.as_ref() else {
                continue;
            };

            for resource in [RESOURCE_CPU, RESOURCE_MEMORY] {
                if let Some(raw) = list.get(resource) {
                    Quantity::try_from(raw).map_err(|source| DecodeError::InvalidQuantity {
                        container: container.name.clone(),
                        field: format!("{list_name}.{resource}"),
                        source,
                    })?;
                }
            }
        }
    }

    Ok(pod)
}
