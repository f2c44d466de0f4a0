//! Watch-backed Namespace and LimitRange caches
//!
//! Both caches are kube reflectors kept current by a background watcher.
//! Admission reads are synchronous snapshot lookups into the stores.

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{LimitRange, Namespace};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use override_lib::health::{components, HealthRegistry};
use override_lib::lister::{LimitRangeLister, LookupError, NamespaceLister};
use override_lib::observability::StructuredLogger;
use serde::de::DeserializeOwned;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ReflectorCache {
    namespaces: Store<Namespace>,
    limit_ranges: Store<LimitRange>,
}

impl ReflectorCache {
    /// Start watching Namespaces and LimitRanges cluster-wide
    ///
    /// Watch failures mark the matching health component unhealthy until
    /// the watcher delivers events again.
    pub fn start(client: Client, health: &HealthRegistry) -> Self {
        let namespaces = spawn_reflector(
            Api::<Namespace>::all(client.clone()),
            health.clone(),
            components::NAMESPACE_CACHE,
        );
        let limit_ranges = spawn_reflector(
            Api::<LimitRange>::all(client),
            health.clone(),
            components::LIMIT_RANGE_CACHE,
        );

        Self::from_stores(namespaces, limit_ranges)
    }

    pub fn from_stores(namespaces: Store<Namespace>, limit_ranges: Store<LimitRange>) -> Self {
        Self {
            namespaces,
            limit_ranges,
        }
    }

    /// Block until both stores hold their initial list
    pub async fn wait_until_synced(
        &self,
        health: &HealthRegistry,
        logger: &StructuredLogger,
        timeout: Duration,
    ) -> Result<()> {
        tokio::time::timeout(timeout, self.namespaces.wait_until_ready())
            .await
            .context("timed out waiting for Namespace informer cache to sync")?
            .context("failed to wait for Namespace informer cache to sync")?;
        health.set_healthy(components::NAMESPACE_CACHE).await;
        logger.log_cache_synced("namespaces", self.namespaces.state().len());

        tokio::time::timeout(timeout, self.limit_ranges.wait_until_ready())
            .await
            .context("timed out waiting for LimitRange informer cache to sync")?
            .context("failed to wait for LimitRange informer cache to sync")?;
        health.set_healthy(components::LIMIT_RANGE_CACHE).await;
        logger.log_cache_synced("limitranges", self.limit_ranges.state().len());

        Ok(())
    }
}

fn spawn_reflector<K>(api: Api<K>, health: HealthRegistry, component: &'static str) -> Store<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone + Send + Sync,
{
    let (reader, writer) = reflector::store();
    let kind = K::kind(&K::DynamicType::default()).to_string();

    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer);

    tokio::spawn(track_watch_health(stream, health, component, kind));

    reader
}

/// Drive a watch stream, reporting failures and recoveries to `health`
async fn track_watch_health<S, T, E>(stream: S, health: HealthRegistry, component: &'static str, kind: String)
where
    S: Stream<Item = Result<T, E>>,
    E: Display,
{
    futures::pin_mut!(stream);
    let mut failing = false;

    while let Some(event) = stream.next().await {
        match event {
            Ok(_) if failing => {
                failing = false;
                info!(kind = %kind, component, "watch recovered");
                health.set_healthy(component).await;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(kind = %kind, component, error = %err, "watch error");
                health.set_unhealthy(component, format!("watch error: {err}")).await;
                failing = true;
            }
        }
    }

    warn!(kind = %kind, component, "watch stream ended");
    health.set_unhealthy(component, "watch stream ended").await;
}

impl NamespaceLister for ReflectorCache {
    fn get(&self, name: &str) -> Result<Arc<Namespace>, LookupError> {
        self.namespaces
            .get(&ObjectRef::new(name))
            .ok_or_else(|| LookupError::namespace_not_found(name))
    }
}

impl LimitRangeLister for ReflectorCache {
    fn list(&self, namespace: &str) -> Result<Vec<Arc<LimitRange>>, LookupError> {
        Ok(self
            .limit_ranges
            .state()
            .into_iter()
            .filter(|lr| lr.metadata.namespace.as_deref() == Some(namespace))
            .collect())
    }
}
