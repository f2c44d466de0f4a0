//! Cluster Resource Override CLI
//!
//! A command-line tool for previewing what the admission webhook does to a
//! pod, inspecting override configuration, and checking namespace exemption.

mod commands;
mod kube_client;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{config, exempt, preview};
use override_lib::policy::ExemptionMode;
use std::path::PathBuf;

/// Cluster Resource Override CLI
#[derive(Parser)]
#[command(name = "cro")]
#[command(author, version, about = "CLI for the Cluster Resource Override admission webhook", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file, used with --live (uses default if not specified)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show how a pod's resources would be rewritten
    Preview {
        /// Pod manifest (YAML or JSON)
        #[arg(long)]
        pod: PathBuf,

        /// ClusterResourceOverride configuration document
        #[arg(long)]
        config: PathBuf,

        /// LimitRange manifest bounding the namespace (repeatable)
        #[arg(long = "limit-range")]
        limit_ranges: Vec<PathBuf>,

        /// Target namespace (defaults to the pod's namespace, then "default")
        #[arg(long, short)]
        namespace: Option<String>,

        /// Read the namespace LimitRanges from the cluster
        #[arg(long)]
        live: bool,
    },

    /// Show the effective override ratios
    Config {
        /// ClusterResourceOverride configuration document
        #[arg(long)]
        config: PathBuf,
    },

    /// Check whether a namespace is exempt from the override
    Exempt {
        /// Namespace name
        namespace: String,

        /// Look up the namespace in the cluster and apply the exemption policy
        #[arg(long)]
        live: bool,

        /// Exemption policy to evaluate with --live
        #[arg(long, default_value = "label-opt-in")]
        mode: ExemptionMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Preview {
            pod,
            config,
            limit_ranges,
            namespace,
            live,
        } => {
            let options = preview::PreviewOptions {
                pod,
                config,
                limit_ranges,
                namespace,
                live,
                kubeconfig: cli.kubeconfig,
            };
            preview::run(options, cli.format).await?;
        }
        Commands::Config { config: path } => {
            config::show_config(&path, cli.format)?;
        }
        Commands::Exempt {
            namespace,
            live,
            mode,
        } => {
            let kubeconfig = live.then_some(cli.kubeconfig.as_deref());
            exempt::check(&namespace, mode, kubeconfig, cli.format).await?;
        }
    }

    Ok(())
}
