//! Mutating hook lifecycle
//!
//! The HTTP server comes up before the informer caches have synced, so the
//! admission behind each endpoint is installed later, exactly once.

use anyhow::{bail, Result};
use override_lib::admission::{admit_request, Admission};
use override_lib::review::{AdmissionRequest, AdmissionResponse};
use std::sync::{Arc, OnceLock};
use tracing::info;

pub struct MutatingHook {
    name: &'static str,
    admission: OnceLock<Arc<dyn Admission>>,
}

impl MutatingHook {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            admission: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Install the admission; fails if one is already installed
    pub fn initialize(&self, admission: Arc<dyn Admission>) -> Result<()> {
        if self.admission.set(admission).is_err() {
            bail!("name={} hook already initialized", self.name);
        }

        info!(hook = %self.name, "admission hook initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.admission.get().is_some()
    }

    pub fn admit(&self, request: &AdmissionRequest) -> AdmissionResponse {
        match self.admission.get() {
            Some(admission) => admit_request(admission.as_ref(), request),
            None => AdmissionResponse::internal_error(request, format!("name={} not initialized", self.name)),
        }
    }
}
