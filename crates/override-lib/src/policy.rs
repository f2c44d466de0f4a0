//! Applicability and exemption policy
//!
//! Decides whether a request is something the override cares about at all
//! (pods, no sub-resource, the right operation) and whether the target
//! namespace has opted in. Two exemption strategies exist and are selected
//! by configuration:
//!
//! - label opt-in: nothing is touched unless the namespace carries the
//!   enablement label set to `"true"`
//! - annotation opt-out: everything is touched except system namespaces
//!   and namespaces whose annotation is present and not `"true"`

use crate::lister::{LookupError, NamespaceLister};
use crate::review::{AdmissionRequest, Operation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Namespace label enabling the resource override (opt-in strategy)
pub const ENABLED_LABEL: &str = "clusterresourceoverrides.admission.autoscaling.openshift.io/enabled";

/// Namespace annotation disabling the resource override (opt-out strategy)
pub const OPT_OUT_ANNOTATION: &str = "quota.openshift.io/cluster-resource-override-enabled";

const POD_RESOURCE: &str = "pods";

const SYSTEM_NAMESPACE_NAMES: [&str; 3] = ["openshift", "kubernetes", "kube"];
const SYSTEM_NAMESPACE_PREFIXES: [&str; 3] = ["openshift-", "kubernetes-", "kube-"];

/// Which requests an admission looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicabilityPolicy {
    /// Treat pod updates as applicable in addition to creates
    pub admit_updates: bool,
}

impl ApplicabilityPolicy {
    pub const CREATE_ONLY: Self = Self { admit_updates: false };
    pub const CREATE_AND_UPDATE: Self = Self { admit_updates: true };

    /// True for pod requests with no sub-resource and an accepted operation
    pub fn is_applicable(&self, request: &AdmissionRequest) -> bool {
        if request.resource.resource != POD_RESOURCE || !request.sub_resource.is_empty() {
            return false;
        }

        match request.operation {
            Operation::Create => true,
            Operation::Update => self.admit_updates,
            Operation::Delete | Operation::Connect => false,
        }
    }
}

impl Default for ApplicabilityPolicy {
    fn default() -> Self {
        Self::CREATE_ONLY
    }
}

/// True for the namespaces the platform owns
pub fn is_system_namespace(name: &str) -> bool {
    SYSTEM_NAMESPACE_NAMES.contains(&name)
        || SYSTEM_NAMESPACE_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Strategy deciding whether a namespace is exempt from the override
pub trait ExemptionPolicy: Send + Sync {
    /// `Ok(true)` when pods in `namespace` must be left alone.
    /// A lookup failure means the caller must not proceed.
    fn is_exempt(&self, namespace: &str, namespaces: &dyn NamespaceLister)
        -> Result<bool, LookupError>;

    fn mode(&self) -> ExemptionMode;
}

/// Exempt unless the namespace label is exactly `"true"`
#[derive(Debug, Clone)]
pub struct LabelOptIn {
    label: String,
}

impl LabelOptIn {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ExemptionPolicy for LabelOptIn {
    fn is_exempt(
        &self,
        namespace: &str,
        namespaces: &dyn NamespaceLister,
    ) -> Result<bool, LookupError> {
        let ns = namespaces.get(namespace).map_err(|err| {
            warn!(namespace = %namespace, error = %err, "error retrieving namespace");
            err
        })?;

        let enabled = ns
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&self.label))
            .is_some_and(|value| value == "true");

        if enabled {
            debug!(namespace = %namespace, "namespace is not exempt");
        } else {
            debug!(namespace = %namespace, "namespace is exempt");
        }

        Ok(!enabled)
    }

    fn mode(&self) -> ExemptionMode {
        ExemptionMode::LabelOptIn
    }
}

/// Exempt system namespaces, and namespaces whose annotation is present and not `"true"`
#[derive(Debug, Clone)]
pub struct AnnotationOptOut {
    annotation: String,
}

impl AnnotationOptOut {
    pub fn new(annotation: impl Into<String>) -> Self {
        Self {
            annotation: annotation.into(),
        }
    }
}

impl ExemptionPolicy for AnnotationOptOut {
    fn is_exempt(
        &self,
        namespace: &str,
        namespaces: &dyn NamespaceLister,
    ) -> Result<bool, LookupError> {
        if is_system_namespace(namespace) {
            debug!(namespace = %namespace, "system namespace is exempt");
            return Ok(true);
        }

        let ns = namespaces.get(namespace).map_err(|err| {
            warn!(namespace = %namespace, error = %err, "error retrieving namespace");
            err
        })?;

        let opted_out = ns
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(&self.annotation))
            .is_some_and(|value| value != "true");

        debug!(namespace = %namespace, exempt = opted_out, "annotation checked");
        Ok(opted_out)
    }

    fn mode(&self) -> ExemptionMode {
        ExemptionMode::AnnotationOptOut
    }
}

/// Configured choice of exemption strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExemptionMode {
    #[default]
    LabelOptIn,
    AnnotationOptOut,
}

impl ExemptionMode {
    /// Build the strategy using the given label (opt-in) or annotation (opt-out) key
    pub fn policy(self, label: &str, annotation: &str) -> Arc<dyn ExemptionPolicy> {
        match self {
            ExemptionMode::LabelOptIn => Arc::new(LabelOptIn::new(label)),
            ExemptionMode::AnnotationOptOut => Arc::new(AnnotationOptOut::new(annotation)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExemptionMode::LabelOptIn => "label-opt-in",
            ExemptionMode::AnnotationOptOut => "annotation-opt-out",
        }
    }
}

impl fmt::Display for ExemptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExemptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "label-opt-in" => Ok(ExemptionMode::LabelOptIn),
            "annotation-opt-out" => Ok(ExemptionMode::AnnotationOptOut),
            other => Err(format!(
                "unknown exemption mode {other:?}, expected label-opt-in or annotation-opt-out"
            )),
        }
    }
}
