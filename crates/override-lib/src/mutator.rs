//! Resource override mutator
//!
//! Rewrites the CPU/memory requests and limits of every container in a pod
//! from the configured ratios. Each container goes through three steps in a
//! fixed order:
//!
//! 1. memory request from the memory limit
//! 2. CPU limit from the memory limit
//! 3. CPU request from the CPU limit (the one step 2 may have just written)
//!
//! Every computed value is clamped to the namespace floor and ceiling.

use crate::config::Config;
use crate::limits::{CpuMemory, RESOURCE_CPU, RESOURCE_MEMORY};
use crate::quantity::{round_down_to_unit, Format, Quantity, QuantityError};
use k8s_openapi::api::core::v1::{Container, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as RawQuantity;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Milli-cores per byte of memory limit at ratio 1.0 (1000 milli-cores per 1Gi)
pub const CPU_BASE_SCALE_FACTOR: f64 = 1000.0 / (1024.0 * 1024.0 * 1024.0);

type ResourceList = BTreeMap<String, RawQuantity>;

#[derive(Debug, Error)]
pub enum MutateError {
    #[error("invalid {field} - {source}")]
    InvalidQuantity {
        field: &'static str,
        #[source]
        source: QuantityError,
    },

    #[error("container {container:?}: {source}")]
    Container {
        container: String,
        #[source]
        source: Box<MutateError>,
    },
}

#[derive(Debug, Clone)]
pub struct PodMutator {
    config: Config,
    floor: CpuMemory,
    ceiling: CpuMemory,
    cpu_base_scale_factor: f64,
}

impl PodMutator {
    pub fn new(config: Config, floor: CpuMemory, ceiling: CpuMemory, cpu_base_scale_factor: f64) -> Self {
        Self {
            config,
            floor,
            ceiling,
            cpu_base_scale_factor,
        }
    }

    /// Return an overridden copy of `pod`; the input is never modified
    ///
    /// A failure on any container fails the whole pod.
    pub fn mutate(&self, pod: &Pod) -> Result<Pod, MutateError> {
        let mut current = pod.clone();

        if let Some(spec) = current.spec.as_mut() {
            for container in spec.init_containers.iter_mut().flatten() {
                self.override_container(container)?;
            }

            for container in spec.containers.iter_mut() {
                self.override_container(container)?;
            }
        }

        Ok(current)
    }

    fn override_container(&self, container: &mut Container) -> Result<(), MutateError> {
        let Some(resources) = container.resources.as_mut() else {
            return Ok(());
        };

        self.override_resources(resources)
            .map_err(|source| MutateError::Container {
                container: container.name.clone(),
                source: Box::new(source),
            })
    }

    /// Run the three override steps on one container's resources
    pub fn override_resources(&self, resources: &mut ResourceRequirements) -> Result<(), MutateError> {
        self.override_memory_request(resources)?;

        // must run before the CPU request override, which reads this limit
        self.override_cpu_limit(resources)?;

        self.override_cpu_request(resources)
    }

    /// Memory request = memory limit * percent / 100, rounded down to a whole MiB (or MB)
    fn override_memory_request(&self, resources: &mut ResourceRequirements) -> Result<(), MutateError> {
        let Some(limit) = lookup(&resources.limits, RESOURCE_MEMORY, "limits.memory")? else {
            return Ok(());
        };

        let percent = self.config.memory_request_to_limit_percent;
        if percent == 0 {
            return Ok(());
        }

        // memory is measured in whole bytes; round to MiB for readability
        let amount = percent_of(limit.value(), percent);
        let amount = round_down_to_unit(amount, limit.format());

        let overridden = clamp(
            Quantity::from_value(amount, limit.format()),
            self.floor.memory,
            self.ceiling.memory,
            RESOURCE_MEMORY,
        );

        store(&mut resources.requests, RESOURCE_MEMORY, overridden);
        Ok(())
    }

    /// CPU limit = memory limit * ratio, with ratio 1.0 mapping 1Gi to one core
    fn override_cpu_limit(&self, resources: &mut ResourceRequirements) -> Result<(), MutateError> {
        let Some(limit) = lookup(&resources.limits, RESOURCE_MEMORY, "limits.memory")? else {
            return Ok(());
        };

        let ratio = self.config.limit_cpu_to_memory_ratio();
        if ratio == 0.0 {
            return Ok(());
        }

        let milli = (limit.value() as f64 * ratio * self.cpu_base_scale_factor) as i64;

        let overridden = clamp(
            Quantity::from_milli(milli, Format::DecimalSI),
            self.floor.cpu,
            self.ceiling.cpu,
            RESOURCE_CPU,
        );

        store(&mut resources.limits, RESOURCE_CPU, overridden);
        Ok(())
    }

    /// CPU request = CPU limit * percent / 100
    fn override_cpu_request(&self, resources: &mut ResourceRequirements) -> Result<(), MutateError> {
        let Some(limit) = lookup(&resources.limits, RESOURCE_CPU, "limits.cpu")? else {
            return Ok(());
        };

        let percent = self.config.cpu_request_to_limit_percent;
        if percent == 0 {
            return Ok(());
        }

        let milli = percent_of(limit.milli_value(), percent);

        let overridden = clamp(
            Quantity::from_milli(milli, limit.format()),
            self.floor.cpu,
            self.ceiling.cpu,
            RESOURCE_CPU,
        );

        store(&mut resources.requests, RESOURCE_CPU, overridden);
        Ok(())
    }
}

/// `value * percent / 100`, truncated toward zero
fn percent_of(value: i64, percent: i64) -> i64 {
    let scaled = i128::from(value) * i128::from(percent) / 100;
    i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN } else { i64::MAX })
}

/// Raise to the floor, then lower to the ceiling; a ceiling below the floor
/// never pulls the value under the floor
fn clamp(value: Quantity, floor: Option<Quantity>, ceiling: Option<Quantity>, resource: &str) -> Quantity {
    let mut value = value;

    if let Some(floor) = floor {
        if value < floor {
            debug!(resource, computed = %value, floor = %floor, "below namespace minimum, using minimum");
            value = floor;
        }
    }

    if let Some(ceiling) = ceiling {
        let ceiling = floor.map_or(ceiling, |floor| ceiling.max(floor));
        if value > ceiling {
            debug!(resource, computed = %value, ceiling = %ceiling, "above namespace maximum, using maximum");
            value = ceiling;
        }
    }

    value
}

fn lookup(
    list: &Option<ResourceList>,
    resource: &str,
    field: &'static str,
) -> Result<Option<Quantity>, MutateError> {
    list.as_ref()
        .and_then(|values| values.get(resource))
        .map(|raw| Quantity::try_from(raw).map_err(|source| MutateError::InvalidQuantity { field, source }))
        .transpose()
}

/// Write a value, creating the list only now that something goes in it
fn store(list: &mut Option<ResourceList>, resource: &str, value: Quantity) {
    list.get_or_insert_with(BTreeMap::new)
        .insert(resource.to_string(), value.into());
}
