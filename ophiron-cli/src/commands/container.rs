//! `ophiron container` command handler

use std::io::Write;

use colored::Colorize;
use tracing::info;

use ophiron_core::config::OphironConfig;
use ophiron_cve_scanner::{ContainerScanAdapter, ContainerScanReport, CveScannerConfig};

use crate::cli::ContainerArgs;
use crate::commands::scan::{findings, findings_message, render_findings};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `container` command.
pub async fn execute(
    args: ContainerArgs,
    config: &OphironConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let scanner_config = CveScannerConfig::from_core(&config.cve_scanner);
    let adapter = ContainerScanAdapter::connect(scanner_config)?;

    info!(container = %args.container, "starting container scan");
    let report = adapter.scan_container_cves(&args.container).await?;
    writer.render(&report)?;

    if report.summary.has_findings() {
        return Err(CliError::Scan(findings_message(&report.summary)));
    }
    Ok(())
}

impl Render for ContainerScanReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Container scan: {} ({}, {})",
            self.container_name.bold(),
            short_id(&self.container_id),
            self.os_type
        )?;
        let shell = match self.shell_available {
            Some(true) => "available",
            Some(false) => "none (filesystem fallback)",
            None => "not probed",
        };
        writeln!(w, "Shell: {shell}")?;
        if let Some(warning) = &self.warning {
            writeln!(w, "{} {}", "Warning:".yellow().bold(), warning)?;
        }
        render_findings(
            w,
            self.summary.total_installed,
            self.summary.total_advisories,
            &self.summary.severity_counts(),
            &findings(&self.summary.matched),
        )
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
