use super::{decode_pod, Admission};
use crate::config::Config;
use crate::limits::{with_default_floor, NamespaceLimitQuerier};
use crate::lister::{LimitRangeLister, NamespaceLister};
use crate::mutator::{PodMutator, CPU_BASE_SCALE_FACTOR};
use crate::observability::AdmissionMetrics;
use crate::patch::{create_patch, overlay_containers};
use crate::policy::{ApplicabilityPolicy, ExemptionPolicy};
use crate::review::{AdmissionRequest, AdmissionResponse};
use k8s_openapi::api::core::v1::{Container, Pod};
use std::sync::Arc;
use tracing::debug;

pub const OVERRIDE_WEBHOOK: &str = "clusterresourceoverride";

/// Rewrites pod CPU/memory from the configured ratios, bounded by the
/// namespace LimitRanges
pub struct ClusterResourceOverrideAdmission {
    config: Config,
    namespaces: Arc<dyn NamespaceLister>,
    limits: NamespaceLimitQuerier,
    exemption: Arc<dyn ExemptionPolicy>,
    applicability: ApplicabilityPolicy,
    metrics: AdmissionMetrics,
}

impl ClusterResourceOverrideAdmission {
    pub fn new(
        config: Config,
        namespaces: Arc<dyn NamespaceLister>,
        limit_ranges: Arc<dyn LimitRangeLister>,
        exemption: Arc<dyn ExemptionPolicy>,
        applicability: ApplicabilityPolicy,
    ) -> Self {
        Self {
            config,
            namespaces,
            limits: NamespaceLimitQuerier::new(limit_ranges),
            exemption,
            applicability,
            metrics: AdmissionMetrics::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Admission for ClusterResourceOverrideAdmission {
    fn name(&self) -> &'static str {
        OVERRIDE_WEBHOOK
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
        debug!(namespace = %request.namespace, "admitting resource");

        let pod = match decode_pod(request) {
            Ok(pod) => pod,
            Err(err) => return AdmissionResponse::bad_request(request, err),
        };
        let Some(object) = request.object.as_ref() else {
            return AdmissionResponse::bad_request(request, "admission request carries no object");
        };

        let (floor, ceiling) = match self.limits.query_floor_and_ceiling(&request.namespace) {
            Ok(bounds) => bounds,
            Err(err) => return AdmissionResponse::forbidden(request, err),
        };

        let mutator = PodMutator::new(
            self.config,
            with_default_floor(&floor),
            ceiling,
            CPU_BASE_SCALE_FACTOR,
        );

        let mutated = match mutator.mutate(&pod) {
            Ok(mutated) => mutated,
            Err(err) => return AdmissionResponse::internal_error(request, err),
        };

        let patch = match overlay_containers(object, &mutated).and_then(|current| create_patch(object, &current)) {
            Ok(patch) => patch,
            Err(err) => return AdmissionResponse::internal_error(request, err),
        };

        let changed = count_changed(&pod, &mutated);
        if changed > 0 {
            self.metrics.inc_containers_mutated(OVERRIDE_WEBHOOK, changed);
        }
        debug!(namespace = %request.namespace, pod = %request.name, containers_changed = changed, "resources overridden");

        AdmissionResponse::with_patch(request, patch)
    }
}

fn count_changed(before: &Pod, after: &Pod) -> u64 {
    fn all(pod: &Pod) -> impl Iterator<Item = &Container> {
        pod.spec.iter().flat_map(|spec| {
            spec.init_containers
                .iter()
                .flatten()
                .chain(spec.containers.iter())
        })
    }

    all(before)
        .zip(all(after))
        .filter(|(b, a)| b.resources != a.resources)
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::admit_request;
    use crate::lister::InMemoryStore;
    use crate::policy::{AnnotationOptOut, LabelOptIn, ENABLED_LABEL, OPT_OUT_ANNOTATION};
    use crate::review::{Operation, StatusReason};
    use k8s_openapi::api::core::v1::{LimitRange, LimitRangeItem, LimitRangeSpec, Namespace};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity as RawQuantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn config() -> Config {
        Config {
            force_selinux_relabel: false,
            limit_cpu_to_memory_percent: 200,
            cpu_request_to_limit_percent: 25,
            memory_request_to_limit_percent: 50,
        }
    }

    fn opted_in(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(ENABLED_LABEL.to_string(), "true".to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn memory_floor(namespace: &str, min: &str) -> LimitRange {
        LimitRange {
            metadata: ObjectMeta {
                name: Some("limits".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(LimitRangeSpec {
                limits: vec![LimitRangeItem {
                    type_: "Container".to_string(),
                    min: Some(BTreeMap::from([("memory".to_string(), RawQuantity(min.to_string()))])),
                    ..Default::default()
                }],
            }),
        }
    }

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_namespace(opted_in("team-a"));
        store
    }

    fn admission(store: &InMemoryStore) -> ClusterResourceOverrideAdmission {
        ClusterResourceOverrideAdmission::new(
            config(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(LabelOptIn::new(ENABLED_LABEL)),
            ApplicabilityPolicy::CREATE_ONLY,
        )
    }

    fn pod(memory_limit: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "namespace": "team-a"},
            "spec": {
                "containers": [{
                    "name": "app",
                    "image": "nginx",
                    "resources": {"limits": {"memory": memory_limit}}
                }]
            }
        })
    }

    fn patched(original: &Value, response: &AdmissionResponse) -> Value {
        let patch: json_patch::Patch = serde_json::from_slice(response.patch.as_ref().unwrap()).unwrap();
        let mut document = original.clone();
        json_patch::patch(&mut document, &patch).unwrap();
        document
    }

    #[test]
    fn test_mutates_pod_in_opted_in_namespace() {
        let store = store();
        let object = pod("16Gi");
        let request = AdmissionRequest::for_pod("1", "team-a", Operation::Create, object.clone());

        let response = admit_request(&admission(&store), &request);
        assert!(response.allowed);
        assert_eq!(response.outcome(), "mutated");

        let resources = &patched(&object, &response)["spec"]["containers"][0]["resources"];
        assert_eq!(resources["requests"]["memory"], "8Gi");
        assert_eq!(resources["limits"]["cpu"], "32");
        assert_eq!(resources["requests"]["cpu"], "8");
        assert_eq!(resources["limits"]["memory"], "16Gi");
    }

    #[test]
    fn test_namespace_floor_applies() {
        let store = store();
        store.insert_limit_range(memory_floor("team-a", "4Gi"));
        let object = pod("6Gi");
        let request = AdmissionRequest::for_pod("1", "team-a", Operation::Create, object.clone());

        let response = admit_request(&admission(&store), &request);
        let resources = &patched(&object, &response)["spec"]["containers"][0]["resources"];
        assert_eq!(resources["requests"]["memory"], "4Gi");
    }

    #[test]
    fn test_namespace_without_label_is_exempt() {
        let store = InMemoryStore::new();
        store.insert_namespace(Namespace {
            metadata: ObjectMeta {
                name: Some("team-b".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let request = AdmissionRequest::for_pod("1", "team-b", Operation::Create, pod("1Gi"));

        let response = admit_request(&admission(&store), &request);
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[test]
    fn test_missing_namespace_is_forbidden() {
        let store = InMemoryStore::new();
        let request = AdmissionRequest::for_pod("1", "ghost", Operation::Create, pod("1Gi"));

        let response = admit_request(&admission(&store), &request);
        assert!(!response.allowed);
        assert_eq!(response.denial_reason(), Some(StatusReason::Forbidden));
        assert!(response.status.unwrap().message.contains("ghost"));
    }

    #[test]
    fn test_update_is_not_applicable_by_default() {
        let store = store();
        let request = AdmissionRequest::for_pod("1", "team-a", Operation::Update, pod("1Gi"));

        let response = admit_request(&admission(&store), &request);
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[test]
    fn test_update_applicable_when_configured() {
        let store = store();
        let admission = ClusterResourceOverrideAdmission::new(
            config(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(LabelOptIn::new(ENABLED_LABEL)),
            ApplicabilityPolicy::CREATE_AND_UPDATE,
        );
        let request = AdmissionRequest::for_pod("1", "team-a", Operation::Update, pod("1Gi"));

        assert_eq!(admit_request(&admission, &request).outcome(), "mutated");
    }

    #[test]
    fn test_bad_quantity_is_bad_request() {
        let store = store();
        let request = AdmissionRequest::for_pod("1", "team-a", Operation::Create, pod("a lot"));

        let response = admit_request(&admission(&store), &request);
        assert_eq!(response.denial_reason(), Some(StatusReason::BadRequest));
    }

    #[test]
    fn test_already_overridden_pod_yields_no_patch() {
        let store = store();
        let object = json!({
            "metadata": {"name": "web"},
            "spec": {"containers": [{
                "name": "app",
                "resources": {
                    "limits": {"memory": "1Gi", "cpu": "2"},
                    "requests": {"memory": "512Mi", "cpu": "500m"}
                }
            }]}
        });
        let request = AdmissionRequest::for_pod("1", "team-a", Operation::Create, object);

        let response = admit_request(&admission(&store), &request);
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[test]
    fn test_annotation_opt_out_mode() {
        let store = InMemoryStore::new();
        store.insert_namespace(Namespace {
            metadata: ObjectMeta {
                name: Some("team-c".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let admission = ClusterResourceOverrideAdmission::new(
            config(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(AnnotationOptOut::new(OPT_OUT_ANNOTATION)),
            ApplicabilityPolicy::CREATE_ONLY,
        );

        let request = AdmissionRequest::for_pod("1", "team-c", Operation::Create, pod("1Gi"));
        assert_eq!(admit_request(&admission, &request).outcome(), "mutated");

        let request = AdmissionRequest::for_pod("2", "kube-system", Operation::Create, pod("1Gi"));
        assert_eq!(admit_request(&admission, &request).outcome(), "allowed");
    }

    #[test]
    fn test_count_changed() {
        let before: Pod = serde_json::from_value(pod("1Gi")).unwrap();
        let mut after = before.clone();
        assert_eq!(count_changed(&before, &after), 0);

        after.spec.as_mut().unwrap().containers[0].resources = None;
        assert_eq!(count_changed(&before, &after), 1);
    }
}
