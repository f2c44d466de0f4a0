//! Namespace floor and ceiling aggregation
//!
//! A namespace may carry any number of LimitRange objects. For the
//! override we only care about the container-scoped items: the smallest
//! declared minimum becomes the floor and the largest declared maximum
//! becomes the ceiling, independently for CPU and memory.

use crate::lister::{LimitRangeLister, LookupError};
use crate::quantity::{Format, Quantity, QuantityError, MEBIBYTE};
use k8s_openapi::api::core::v1::{LimitRange, LimitRangeItem};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as RawQuantity;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";

/// LimitRange item type the aggregation looks at
pub const LIMIT_TYPE_CONTAINER: &str = "Container";

/// Optional CPU and memory amounts, used for both floors and ceilings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuMemory {
    pub cpu: Option<Quantity>,
    pub memory: Option<Quantity>,
}

impl fmt::Display for CpuMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |q: &Option<Quantity>| q.map(|q| q.to_string()).unwrap_or_else(|| "<none>".into());
        write!(f, "cpu={} memory={}", show(&self.cpu), show(&self.memory))
    }
}

pub fn default_cpu_floor() -> Quantity {
    Quantity::from_milli(1, Format::DecimalSI)
}

pub fn default_memory_floor() -> Quantity {
    Quantity::from_value(MEBIBYTE, Format::BinarySI)
}

/// Fill the gaps in a namespace floor with the defaults (1m CPU, 1Mi memory)
///
/// Namespace-declared values always take precedence.
pub fn with_default_floor(namespace_floor: &CpuMemory) -> CpuMemory {
    CpuMemory {
        cpu: namespace_floor.cpu.or_else(|| Some(default_cpu_floor())),
        memory: namespace_floor.memory.or_else(|| Some(default_memory_floor())),
    }
}

/// Compute (floor, ceiling) across the container-scoped items of the given LimitRanges
///
/// Either side is `None` for a resource no item declares, which is distinct
/// from a declared zero.
pub fn aggregate<'a>(
    limit_ranges: impl IntoIterator<Item = &'a LimitRange>,
) -> Result<(CpuMemory, CpuMemory), QuantityError> {
    let items: Vec<&LimitRangeItem> = limit_ranges
        .into_iter()
        .filter_map(|lr| lr.spec.as_ref())
        .flat_map(|spec| spec.limits.iter())
        .filter(|item| item.type_ == LIMIT_TYPE_CONTAINER)
        .collect();

    let minimums = |resource| collect(&items, resource, |item| item.min.as_ref());
    let maximums = |resource| collect(&items, resource, |item| item.max.as_ref());

    let floor = CpuMemory {
        cpu: Quantity::min_of(&minimums(RESOURCE_CPU)?),
        memory: Quantity::min_of(&minimums(RESOURCE_MEMORY)?),
    };
    let ceiling = CpuMemory {
        cpu: Quantity::max_of(&maximums(RESOURCE_CPU)?),
        memory: Quantity::max_of(&maximums(RESOURCE_MEMORY)?),
    };

    Ok((floor, ceiling))
}

fn collect(
    items: &[&LimitRangeItem],
    resource: &str,
    bound: impl Fn(&LimitRangeItem) -> Option<&BTreeMap<String, RawQuantity>>,
) -> Result<Vec<Quantity>, QuantityError> {
    items
        .iter()
        .filter_map(|item| bound(item).and_then(|values| values.get(resource)))
        .map(Quantity::try_from)
        .collect()
}

/// Errors raised while querying namespace limits
#[derive(Debug, Error)]
pub enum LimitQueryError {
    #[error("failed to query limitrange - {0}")]
    Lookup(#[from] LookupError),

    #[error("limitrange declares an invalid quantity - {0}")]
    InvalidQuantity(#[from] QuantityError),
}

/// Reads a namespace's LimitRanges from the cache and aggregates them
#[derive(Clone)]
pub struct NamespaceLimitQuerier {
    limit_ranges: Arc<dyn LimitRangeLister>,
}

impl NamespaceLimitQuerier {
    pub fn new(limit_ranges: Arc<dyn LimitRangeLister>) -> Self {
        Self { limit_ranges }
    }

    /// Returns the namespace (floor, ceiling) without defaults applied
    pub fn query_floor_and_ceiling(
        &self,
        namespace: &str,
    ) -> Result<(CpuMemory, CpuMemory), LimitQueryError> {
        let limit_ranges = self.limit_ranges.list(namespace)?;
        let (floor, ceiling) = aggregate(limit_ranges.iter().map(Arc::as_ref))?;

        debug!(
            namespace = %namespace,
            limit_ranges = limit_ranges.len(),
            minimum = %floor,
            maximum = %ceiling,
            "LimitRange query"
        );

        Ok((floor, ceiling))
    }
}
