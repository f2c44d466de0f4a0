//! AdmissionReview wire types
//!
//! The subset of `admission.k8s.io/v1` the webhook reads and writes, plus
//! the response builders every admission path uses to answer a request.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

/// Envelope exchanged with the API server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wrap a response in a review echoing this review's apiVersion and kind
    pub fn into_response_review(self, response: AdmissionResponse) -> AdmissionReview {
        let or_default = |value: String, default: &str| {
            if value.is_empty() {
                default.to_string()
            } else {
                value
            }
        };

        AdmissionReview {
            api_version: or_default(self.api_version, ADMISSION_API_VERSION),
            kind: or_default(self.kind, ADMISSION_REVIEW_KIND),
            request: None,
            response: Some(response),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub kind: GroupVersionKind,
    pub resource: GroupVersionResource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_resource: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub operation: Operation,
    /// The object as sent by the client, kept raw so the patch is computed
    /// against exactly what the API server holds
    #[serde(default)]
    pub object: Option<serde_json::Value>,
}

impl AdmissionRequest {
    /// A request for a pod in `namespace`, as the API server would send it
    pub fn for_pod(
        uid: impl Into<String>,
        namespace: impl Into<String>,
        operation: Operation,
        object: serde_json::Value,
    ) -> Self {
        let name = object
            .pointer("/metadata/name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();

        Self {
            uid: uid.into(),
            kind: GroupVersionKind {
                group: String::new(),
                version: "v1".to_string(),
                kind: "Pod".to_string(),
            },
            resource: GroupVersionResource {
                group: String::new(),
                version: "v1".to_string(),
                resource: "pods".to_string(),
            },
            sub_resource: String::new(),
            name,
            namespace: namespace.into(),
            operation,
            object: Some(object),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusReason {
    BadRequest,
    Forbidden,
    InternalError,
}

impl StatusReason {
    pub fn code(&self) -> u16 {
        match self {
            StatusReason::BadRequest => 400,
            StatusReason::Forbidden => 403,
            StatusReason::InternalError => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusReason::BadRequest => "BadRequest",
            StatusReason::Forbidden => "Forbidden",
            StatusReason::InternalError => "InternalError",
        }
    }
}

/// Failure details attached to a denied response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
    pub code: u16,
    pub reason: StatusReason,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, with = "base64_patch", skip_serializing_if = "Option::is_none")]
    pub patch: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
}

impl AdmissionResponse {
    /// Allow the request unchanged
    pub fn allowed(request: &AdmissionRequest) -> Self {
        Self {
            uid: request.uid.clone(),
            allowed: true,
            status: None,
            patch: None,
            patch_type: None,
        }
    }

    /// Allow the request with a JSON patch; an empty patch allows unchanged
    pub fn with_patch(request: &AdmissionRequest, patch: Vec<u8>) -> Self {
        let mut response = Self::allowed(request);
        if !patch.is_empty() {
            response.patch = Some(patch);
            response.patch_type = Some(PatchType::JsonPatch);
        }
        response
    }

    pub fn bad_request(request: &AdmissionRequest, err: impl Display) -> Self {
        Self::denied(request, StatusReason::BadRequest, err)
    }

    pub fn forbidden(request: &AdmissionRequest, err: impl Display) -> Self {
        Self::denied(request, StatusReason::Forbidden, err)
    }

    pub fn internal_error(request: &AdmissionRequest, err: impl Display) -> Self {
        Self::denied(request, StatusReason::InternalError, err)
    }

    fn denied(request: &AdmissionRequest, reason: StatusReason, err: impl Display) -> Self {
        Self {
            uid: request.uid.clone(),
            allowed: false,
            status: Some(Status {
                status: "Failure".to_string(),
                code: reason.code(),
                reason,
                message: err.to_string(),
            }),
            patch: None,
            patch_type: None,
        }
    }

    /// Reason of a denied response
    pub fn denial_reason(&self) -> Option<StatusReason> {
        self.status.as_ref().map(|s| s.reason)
    }

    /// Short outcome label used for logs and metrics
    pub fn outcome(&self) -> &'static str {
        match (self.allowed, self.patch.is_some(), self.denial_reason()) {
            (true, true, _) => "mutated",
            (true, false, _) => "allowed",
            (false, _, Some(reason)) => reason.as_str(),
            (false, _, None) => "denied",
        }
    }
}

mod base64_patch {
    use super::*;

    pub fn serialize<S: Serializer>(patch: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match patch {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_review() -> serde_json::Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "team-a",
                "operation": "CREATE",
                "userInfo": {"username": "admin"},
                "object": {"metadata": {"name": "web"}, "spec": {"containers": []}}
            }
        })
    }

    #[test]
    fn test_decode_review() {
        let review: AdmissionReview = serde_json::from_value(sample_review()).unwrap();
        let request = review.request.unwrap();

        assert_eq!(request.operation, Operation::Create);
        assert_eq!(request.resource.resource, "pods");
        assert!(request.sub_resource.is_empty());
        assert_eq!(request.namespace, "team-a");
        assert!(request.object.is_some());
    }

    #[test]
    fn test_patch_is_base64_on_the_wire() {
        let review: AdmissionReview = serde_json::from_value(sample_review()).unwrap();
        let request = review.request.clone().unwrap();
        let response = AdmissionResponse::with_patch(&request, b"[]x".to_vec());

        let encoded = serde_json::to_value(review.into_response_review(response)).unwrap();

        assert_eq!(encoded["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(encoded["response"]["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(encoded["response"]["patch"], "W114");
        assert_eq!(encoded["response"]["patchType"], "JSONPatch");
        assert!(encoded.get("request").is_none());
    }

    #[test]
    fn test_empty_patch_allows_unchanged() {
        let request = AdmissionRequest::for_pod("1", "ns", Operation::Create, json!({}));
        let response = AdmissionResponse::with_patch(&request, Vec::new());

        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert!(response.patch_type.is_none());
        assert_eq!(response.outcome(), "allowed");
    }

    #[test]
    fn test_denied_responses_carry_code_and_reason() {
        let request = AdmissionRequest::for_pod("1", "ns", Operation::Create, json!({}));

        let cases = [
            (AdmissionResponse::bad_request(&request, "bad"), 400, StatusReason::BadRequest),
            (AdmissionResponse::forbidden(&request, "nope"), 403, StatusReason::Forbidden),
            (AdmissionResponse::internal_error(&request, "boom"), 500, StatusReason::InternalError),
        ];

        for (response, code, reason) in cases {
            assert!(!response.allowed);
            let status = response.status.clone().unwrap();
            assert_eq!(status.code, code);
            assert_eq!(status.reason, reason);
            assert_eq!(status.status, "Failure");
            assert_eq!(response.outcome(), reason.as_str());
        }
    }

    #[test]
    fn test_response_round_trips_patch_bytes() {
        let request = AdmissionRequest::for_pod("1", "ns", Operation::Update, json!({}));
        let response = AdmissionResponse::with_patch(&request, br#"[{"op":"add"}]"#.to_vec());

        let decoded: AdmissionResponse =
            serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_for_pod_takes_name_from_object() {
        let request = AdmissionRequest::for_pod(
            "1",
            "ns",
            Operation::Create,
            json!({"metadata": {"name": "web"}}),
        );
        assert_eq!(request.name, "web");
        assert_eq!(request.resource.resource, "pods");
    }
}
