use super::{decode_pod, Admission};
use crate::lister::NamespaceLister;
use crate::patch::{create_patch, overlay_pod_security_context};
use crate::policy::{ApplicabilityPolicy, ExemptionPolicy, LabelOptIn};
use crate::review::{AdmissionRequest, AdmissionResponse};
use k8s_openapi::api::core::v1::SELinuxOptions;
use std::sync::Arc;
use tracing::debug;

pub const SVT_WEBHOOK: &str = "podsvtoverride";

/// Namespace label enabling the relabel
pub const SVT_ENABLED_LABEL: &str = "podsvtoverride.admission.node.openshift.io/enabled";

/// SELinux type given to pods that mount a persistent volume claim
pub const SPC_TYPE: &str = "spc_t";

/// Sets the `spc_t` SELinux type on pods with a persistent volume claim
pub struct PodSvtRelabelAdmission {
    namespaces: Arc<dyn NamespaceLister>,
    exemption: Arc<dyn ExemptionPolicy>,
    applicability: ApplicabilityPolicy,
}

impl PodSvtRelabelAdmission {
    /// Opt-in by [`SVT_ENABLED_LABEL`], on create and update
    pub fn new(namespaces: Arc<dyn NamespaceLister>) -> Self {
        Self {
            namespaces,
            exemption: Arc::new(LabelOptIn::new(SVT_ENABLED_LABEL)),
            applicability: ApplicabilityPolicy::CREATE_AND_UPDATE,
        }
    }
}

impl Admission for PodSvtRelabelAdmission {
    fn name(&self) -> &'static str {
        SVT_WEBHOOK
    }

    fn is_applicable(&self, request: &AdmissionRequest) -> bool {
        self.applicability.is_applicable(request)
    }

    fn is_exempt(&self, request: &AdmissionRequest) -> Result<bool, AdmissionResponse> {
        self.exemption
            .is_exempt(&request.namespace, self.namespaces.as_ref())
            .map_err(|err| AdmissionResponse::forbidden(request, err))
    }

    fn admit(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let mut pod = match decode_pod(request) {
            Ok(pod) => pod,
            Err(err) => return AdmissionResponse::bad_request(request, err),
        };
        let Some(object) = request.object.as_ref() else {
            return AdmissionResponse::bad_request(request, "admission request carries no object");
        };

        let Some(spec) = pod.spec.as_mut() else {
            return AdmissionResponse::allowed(request);
        };

        let uses_claim = spec
            .volumes
            .iter()
            .flatten()
            .any(|volume| volume.persistent_volume_claim.is_some());

        if !uses_claim {
            debug!(namespace = %request.namespace, pod = %request.name, "no persistent volume claim, admitted without modification");
            return AdmissionResponse::allowed(request);
        }

        spec.security_context
            .get_or_insert_with(Default::default)
            .se_linux_options = Some(SELinuxOptions {
            type_: Some(SPC_TYPE.to_string()),
            ..Default::default()
        });

        debug!(namespace = %request.namespace, pod = %request.name, "admitted with modification");

        match overlay_pod_security_context(object, &pod).and_then(|current| create_patch(object, &current)) {
            Ok(patch) => AdmissionResponse::with_patch(request, patch),
            Err(err) => AdmissionResponse::internal_error(request, err),
        }
    }
}
