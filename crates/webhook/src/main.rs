//! Resource override webhook
//!
//! Serves the mutating admission endpoints the API server calls on pod
//! creation. TLS is terminated in front of this process.

use anyhow::{Context, Result};
use override_lib::{
    admission::{ClusterResourceOverrideAdmission, PodSvtRelabelAdmission, OVERRIDE_WEBHOOK, SVT_WEBHOOK},
    health::{components, HealthRegistry},
    observability::{AdmissionMetrics, StructuredLogger},
    policy::{ENABLED_LABEL, OPT_OUT_ANNOTATION},
};
use resource_override_webhook::{api, config::WebhookConfig, hook::MutatingHook, informer::ReflectorCache};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const WEBHOOK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting resource-override-webhook");

    let settings = WebhookConfig::load()?;
    let config = settings.load_override_config()?;
    info!(
        port = settings.port,
        exemption_mode = %settings.exemption_mode,
        admit_updates = settings.admit_updates,
        configuration = %config,
        "Webhook configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry
        .register_pending(components::NAMESPACE_CACHE, "initial list in progress")
        .await;
    health_registry
        .register_pending(components::LIMIT_RANGE_CACHE, "initial list in progress")
        .await;
    health_registry
        .register_pending(components::ADMISSION, "waiting for caches")
        .await;

    // register metrics before the first scrape
    AdmissionMetrics::new();
    let logger = StructuredLogger::new(OVERRIDE_WEBHOOK);

    let override_hook = Arc::new(MutatingHook::new(OVERRIDE_WEBHOOK));
    let relabel_hook = config
        .force_selinux_relabel
        .then(|| Arc::new(MutatingHook::new(SVT_WEBHOOK)));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        override_hook.clone(),
        relabel_hook.clone(),
    ));
    let mut api_handle = tokio::spawn(api::serve(settings.port, app_state));

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;
    let cache = Arc::new(ReflectorCache::start(client, &health_registry));
    cache
        .wait_until_synced(&health_registry, &logger, settings.cache_sync_timeout())
        .await?;

    override_hook.initialize(Arc::new(ClusterResourceOverrideAdmission::new(
        config,
        cache.clone(),
        cache.clone(),
        settings.exemption_mode.policy(ENABLED_LABEL, OPT_OUT_ANNOTATION),
        settings.applicability(),
    )))?;

    if let Some(hook) = relabel_hook.as_ref() {
        hook.initialize(Arc::new(PodSvtRelabelAdmission::new(cache.clone())))?;
    }

    health_registry.set_healthy(components::ADMISSION).await;
    logger.log_startup(WEBHOOK_VERSION, &config.to_string());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("server stopped"),
                Ok(Err(err)) => {
                    error!(error = %err, "admission server failed");
                    return Err(err);
                }
                Err(err) => return Err(err).context("admission server task panicked"),
            }
        }
    }

    Ok(())
}
