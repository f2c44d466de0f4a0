//! Offline preview of the resource override

use anyhow::{bail, Context, Result};
use colored::Colorize;
use k8s_openapi::api::core::v1::{Container, LimitRange, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as RawQuantity;
use kube::api::{Api, ListParams};
use override_lib::limits::{with_default_floor, CpuMemory, NamespaceLimitQuerier, RESOURCE_CPU, RESOURCE_MEMORY};
use override_lib::mutator::{PodMutator, CPU_BASE_SCALE_FACTOR};
use override_lib::patch::{create_patch, overlay_containers};
use override_lib::{Config, InMemoryStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::Tabled;

use crate::kube_client;
use crate::output::{format_change, print_info, print_json, print_table, print_warning, OutputFormat};

pub struct PreviewOptions {
    pub pod: PathBuf,
    pub config: PathBuf,
    pub limit_ranges: Vec<PathBuf>,
    pub namespace: Option<String>,
    pub live: bool,
    pub kubeconfig: Option<String>,
}

/// Requests and limits of one container, as strings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct ContainerResources {
    memory_request: Option<String>,
    memory_limit: Option<String>,
    cpu_request: Option<String>,
    cpu_limit: Option<String>,
}

impl ContainerResources {
    fn of(container: &Container) -> Self {
        let resources = container.resources.as_ref();
        let requests = resources.and_then(|r| r.requests.as_ref());
        let limits = resources.and_then(|r| r.limits.as_ref());

        Self {
            memory_request: lookup(requests, RESOURCE_MEMORY),
            memory_limit: lookup(limits, RESOURCE_MEMORY),
            cpu_request: lookup(requests, RESOURCE_CPU),
            cpu_limit: lookup(limits, RESOURCE_CPU),
        }
    }
}

fn lookup(list: Option<&BTreeMap<String, RawQuantity>>, resource: &str) -> Option<String> {
    list.and_then(|values| values.get(resource))
        .map(|quantity| quantity.0.clone())
}

#[derive(Debug, Serialize)]
struct ContainerPreview {
    name: String,
    init: bool,
    before: ContainerResources,
    after: ContainerResources,
}

#[derive(Debug, Serialize)]
struct Bounds {
    cpu: Option<String>,
    memory: Option<String>,
}

impl From<&CpuMemory> for Bounds {
    fn from(bounds: &CpuMemory) -> Self {
        Self {
            cpu: bounds.cpu.map(|q| q.to_string()),
            memory: bounds.memory.map(|q| q.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct PreviewReport {
    namespace: String,
    configuration: String,
    floor: Bounds,
    ceiling: Bounds,
    containers: Vec<ContainerPreview>,
    patch: Value,
}

#[derive(Tabled)]
struct PreviewRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Mem Req")]
    memory_request: String,
    #[tabled(rename = "Mem Lim")]
    memory_limit: String,
    #[tabled(rename = "CPU Req")]
    cpu_request: String,
    #[tabled(rename = "CPU Lim")]
    cpu_limit: String,
}

pub async fn run(options: PreviewOptions, format: OutputFormat) -> Result<()> {
    let object = read_manifest(&options.pod)?;
    let pod: Pod = serde_json::from_value(object.clone())
        .with_context(|| format!("{} is not a pod", options.pod.display()))?;
    let config = Config::load(&options.config)?;

    let namespace = options
        .namespace
        .clone()
        .or_else(|| pod.metadata.namespace.clone())
        .unwrap_or_else(|| "default".to_string());

    let store = InMemoryStore::new();
    for path in &options.limit_ranges {
        let mut limit_range: LimitRange = serde_json::from_value(read_manifest(path)?)
            .with_context(|| format!("{} is not a LimitRange", path.display()))?;
        limit_range.metadata.namespace = Some(namespace.clone());
        store.insert_limit_range(limit_range);
    }

    if options.live {
        let client = kube_client::connect(options.kubeconfig.as_deref()).await?;
        let api: Api<LimitRange> = Api::namespaced(client, &namespace);
        let live = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("failed to list LimitRanges in {namespace}"))?;
        for limit_range in live.items {
            store.insert_limit_range(limit_range);
        }
    }

    let (floor, ceiling) = NamespaceLimitQuerier::new(Arc::new(store)).query_floor_and_ceiling(&namespace)?;
    let floor = with_default_floor(&floor);

    let mutated = PodMutator::new(config, floor, ceiling, CPU_BASE_SCALE_FACTOR).mutate(&pod)?;
    let current = overlay_containers(&object, &mutated)?;
    let patch = create_patch(&object, &current)?;
    let patch: Value = if patch.is_empty() {
        Value::Array(Vec::new())
    } else {
        serde_json::from_slice(&patch)?
    };

    let report = PreviewReport {
        namespace,
        configuration: config.to_string(),
        floor: Bounds::from(&floor),
        ceiling: Bounds::from(&ceiling),
        containers: compare(&pod, &mutated),
        patch,
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report, &config)?,
    }

    Ok(())
}

fn read_manifest(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    if !value.is_object() {
        bail!("{} does not contain a Kubernetes object", path.display());
    }
    Ok(value)
}

fn compare(before: &Pod, after: &Pod) -> Vec<ContainerPreview> {
    fn containers(pod: &Pod) -> Vec<(&Container, bool)> {
        pod.spec
            .iter()
            .flat_map(|spec| {
                let init = spec.init_containers.iter().flatten().map(|c| (c, true));
                let app = spec.containers.iter().map(|c| (c, false));
                init.chain(app)
            })
            .collect()
    }

    containers(before)
        .into_iter()
        .zip(containers(after))
        .map(|((b, init), (a, _))| ContainerPreview {
            name: b.name.clone(),
            init,
            before: ContainerResources::of(b),
            after: ContainerResources::of(a),
        })
        .collect()
}

fn print_report(report: &PreviewReport, config: &Config) -> Result<()> {
    println!("{}", "Resource Override Preview".bold());
    println!("{}", "=".repeat(60));
    println!("Namespace: {}", report.namespace.cyan());
    println!(
        "Floor:     cpu={} memory={}",
        report.floor.cpu.as_deref().unwrap_or("-"),
        report.floor.memory.as_deref().unwrap_or("-")
    );
    println!(
        "Ceiling:   cpu={} memory={}",
        report.ceiling.cpu.as_deref().unwrap_or("-"),
        report.ceiling.memory.as_deref().unwrap_or("-")
    );
    println!();

    if config.is_noop() {
        print_warning("every ratio is 0, the override changes nothing");
    }

    if report.containers.is_empty() {
        print_warning("pod has no containers");
        return Ok(());
    }

    let rows = report
        .containers
        .iter()
        .map(|c| PreviewRow {
            name: if c.init {
                format!("{} (init)", c.name)
            } else {
                c.name.clone()
            },
            memory_request: format_change(c.before.memory_request.clone(), c.after.memory_request.clone()),
            memory_limit: format_change(c.before.memory_limit.clone(), c.after.memory_limit.clone()),
            cpu_request: format_change(c.before.cpu_request.clone(), c.after.cpu_request.clone()),
            cpu_limit: format_change(c.before.cpu_limit.clone(), c.after.cpu_limit.clone()),
        })
        .collect();
    print_table::<PreviewRow>(rows);

    match report.patch.as_array() {
        Some(operations) if !operations.is_empty() => {
            println!("\n{}", "JSON patch".bold());
            println!("{}", serde_json::to_string_pretty(&report.patch)?);
        }
        _ => print_info("no patch, the pod would be admitted unchanged"),
    }

    Ok(())
}
