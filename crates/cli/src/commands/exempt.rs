//! Namespace exemption check

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;
use override_lib::policy::{is_system_namespace, ExemptionMode, ENABLED_LABEL, OPT_OUT_ANNOTATION};
use override_lib::InMemoryStore;
use serde::Serialize;

use crate::kube_client;
use crate::output::{print_info, print_json, print_success, print_warning, OutputFormat};

#[derive(Serialize)]
struct ExemptionReport {
    namespace: String,
    system_namespace: bool,
    /// Only known when the namespace was looked up in the cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    exempt: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<ExemptionMode>,
}

/// `kubeconfig` is `Some` when the namespace should be looked up live
pub async fn check(
    namespace: &str,
    mode: ExemptionMode,
    kubeconfig: Option<Option<&str>>,
    format: OutputFormat,
) -> Result<()> {
    let mut report = ExemptionReport {
        namespace: namespace.to_string(),
        system_namespace: is_system_namespace(namespace),
        exempt: None,
        mode: None,
    };

    if let Some(kubeconfig) = kubeconfig {
        let client = kube_client::connect(kubeconfig).await?;
        let object = Api::<Namespace>::all(client)
            .get(namespace)
            .await
            .with_context(|| format!("failed to get namespace {namespace}"))?;

        let store = InMemoryStore::new();
        store.insert_namespace(object);

        let policy = mode.policy(ENABLED_LABEL, OPT_OUT_ANNOTATION);
        report.exempt = Some(policy.is_exempt(namespace, &store)?);
        report.mode = Some(mode);
    }

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if report.system_namespace {
                print_warning(&format!(
                    "{namespace} is a system namespace, always exempt under annotation-opt-out"
                ));
            } else {
                print_info(&format!("{namespace} is not a system namespace"));
            }

            match report.exempt {
                Some(true) => print_warning(&format!("{namespace} is exempt ({mode})")),
                Some(false) => print_success(&format!("{namespace} is subject to the override ({mode})")),
                None => print_info("run with --live to evaluate the namespace labels and annotations"),
            }
        }
    }

    Ok(())
}
