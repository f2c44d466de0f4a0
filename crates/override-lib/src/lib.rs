//! Decision-and-mutation engine for the cluster resource override webhook
//!
//! This crate provides:
//! - Kubernetes quantity arithmetic
//! - Namespace floor/ceiling aggregation from LimitRanges
//! - Applicability and namespace exemption policy
//! - The ordered CPU/memory override and the SELinux relabel
//! - AdmissionReview wire types and JSON patch computation
//! - Health checks and observability

pub mod admission;
pub mod config;
pub mod health;
pub mod limits;
pub mod lister;
pub mod mutator;
pub mod observability;
pub mod patch;
pub mod policy;
pub mod quantity;
pub mod review;

pub use admission::{admit_request, Admission, ClusterResourceOverrideAdmission, PodSvtRelabelAdmission};
pub use config::{Config, ConfigError};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use limits::CpuMemory;
pub use lister::{InMemoryStore, LimitRangeLister, LookupError, NamespaceLister};
pub use mutator::PodMutator;
pub use observability::{AdmissionMetrics, StructuredLogger};
pub use quantity::{Format, Quantity};
pub use review::{AdmissionRequest, AdmissionResponse, AdmissionReview};
