//! Override configuration inspection

use anyhow::Result;
use colored::Colorize;
use override_lib::Config;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{print_json, print_table, print_warning, OutputFormat};

#[derive(Serialize)]
struct ConfigReport {
    limit_cpu_to_memory_ratio: f64,
    cpu_request_to_limit_ratio: f64,
    memory_request_to_limit_ratio: f64,
    force_selinux_relabel: bool,
}

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    setting: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn ratio(value: f64) -> String {
    if value == 0.0 {
        "disabled".dimmed().to_string()
    } else {
        format!("{:.2}", value)
    }
}

pub fn show_config(path: &Path, format: OutputFormat) -> Result<()> {
    let config = Config::load(path)?;

    match format {
        OutputFormat::Json => print_json(&ConfigReport {
            limit_cpu_to_memory_ratio: config.limit_cpu_to_memory_ratio(),
            cpu_request_to_limit_ratio: config.cpu_request_to_limit_ratio(),
            memory_request_to_limit_ratio: config.memory_request_to_limit_ratio(),
            force_selinux_relabel: config.force_selinux_relabel,
        })?,
        OutputFormat::Table => {
            println!("{}", "Override Configuration".bold());
            println!("{}", "=".repeat(60));

            print_table(vec![
                SettingRow {
                    setting: "CPU limit / memory limit",
                    value: ratio(config.limit_cpu_to_memory_ratio()),
                },
                SettingRow {
                    setting: "CPU request / CPU limit",
                    value: ratio(config.cpu_request_to_limit_ratio()),
                },
                SettingRow {
                    setting: "Memory request / memory limit",
                    value: ratio(config.memory_request_to_limit_ratio()),
                },
                SettingRow {
                    setting: "Force SELinux relabel",
                    value: config.force_selinux_relabel.to_string(),
                },
            ]);

            if config.is_noop() {
                print_warning("every ratio is 0, the override changes nothing");
            }
        }
    }

    Ok(())
}
