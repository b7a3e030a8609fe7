//! `ophiron scan` command handler

use std::io::Write;

use colored::{ColoredString, Colorize};
use serde::Serialize;
use tracing::info;

use ophiron_core::config::OphironConfig;
use ophiron_core::types::Severity;
use ophiron_cve_scanner::{
    CveScannerConfig, Detector, Distro, Match, OsRelease, ScanOrchestrator, ScanSummary,
    SeverityCounts,
};

use crate::cli::ScanArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `scan` command.
///
/// Renders the report, then returns [`CliError::Scan`] when anything matched
/// so the process exits with code 4.
pub async fn execute(
    args: ScanArgs,
    config: &OphironConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let scanner_config = CveScannerConfig::from_core(&config.cve_scanner);
    let release = Detector::new(&scanner_config.os_release_path)
        .read_release()
        .await;
    let orchestrator = ScanOrchestrator::new(scanner_config)?;

    info!(
        force_refresh = args.force_refresh,
        use_system = !args.no_system,
        "starting host scan"
    );
    let summary = orchestrator
        .run_scan(args.force_refresh, !args.no_system)
        .await?;

    let report = ScanReport::new(&release, &summary);
    writer.render(&report)?;

    if summary.has_findings() {
        return Err(CliError::Scan(findings_message(&summary)));
    }
    Ok(())
}

pub(crate) fn findings_message(summary: &ScanSummary) -> String {
    format!(
        "{} vulnerable package matches across {} advisories",
        summary.total_matched, summary.total_advisories
    )
}

/// Host scan result as shown to the user.
#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub os: String,
    pub distro: Distro,
    pub packages_scanned: usize,
    pub advisories: usize,
    pub matches: usize,
    pub severity: SeverityCounts,
    pub findings: Vec<FindingEntry>,
}

impl ScanReport {
    pub fn new(release: &OsRelease, summary: &ScanSummary) -> Self {
        let distro = release.distro();
        let os = if release.pretty_name.is_empty() {
            distro.to_string()
        } else {
            release.pretty_name.clone()
        };
        Self {
            os,
            distro,
            packages_scanned: summary.total_installed,
            advisories: summary.total_advisories,
            matches: summary.total_matched,
            severity: summary.severity_counts(),
            findings: findings(&summary.matched),
        }
    }
}

/// One matched advisory for one package.
#[derive(Debug, Serialize)]
pub struct FindingEntry {
    pub advisory: String,
    pub package: String,
    pub installed_version: String,
    pub fixed: Option<String>,
    pub severity: String,
    pub status: String,
    pub issues: Vec<String>,
}

impl From<&Match> for FindingEntry {
    fn from(m: &Match) -> Self {
        Self {
            advisory: m.advisory.clone(),
            package: m.package.clone(),
            installed_version: m.installed_version.clone(),
            fixed: m.fixed.clone(),
            severity: m.severity.clone(),
            status: m.status.clone(),
            issues: m.issues.clone(),
        }
    }
}

pub(crate) fn findings(matched: &[Match]) -> Vec<FindingEntry> {
    matched.iter().map(FindingEntry::from).collect()
}

fn severity_colored(severity: &str) -> ColoredString {
    let label = if severity.is_empty() { "-" } else { severity };
    // pad before colouring so escape codes do not break alignment
    let padded = format!("{label:<10}");
    match Severity::from_str_loose(severity) {
        Some(Severity::Critical) => padded.red().bold(),
        Some(Severity::High) => padded.red(),
        Some(Severity::Medium) => padded.yellow(),
        Some(Severity::Low) | None => padded.normal(),
        Some(Severity::Info) => padded.dimmed(),
    }
}

/// Shared body for host and container reports.
pub(crate) fn render_findings(
    w: &mut dyn Write,
    packages_scanned: usize,
    advisories: usize,
    counts: &SeverityCounts,
    findings: &[FindingEntry],
) -> std::io::Result<()> {
    writeln!(w, "Packages scanned: {packages_scanned}")?;
    writeln!(w, "Advisories: {advisories}")?;

    let total = findings.len();
    let matches_str = format!(
        "{} (C:{} H:{} M:{} L:{} I:{} ?:{})",
        total, counts.critical, counts.high, counts.medium, counts.low, counts.info, counts.unknown
    );
    if total > 0 {
        writeln!(w, "Matches: {}", matches_str.red().bold())?;
    } else {
        writeln!(w, "Matches: {}", matches_str.green().bold())?;
    }
    writeln!(w)?;

    if findings.is_empty() {
        writeln!(w, "{}", "No vulnerable packages found.".green())?;
        return Ok(());
    }

    writeln!(
        w,
        "{:<24} {:<10} {:<28} {:<22} Fixed",
        "Advisory", "Severity", "Package", "Installed"
    )?;
    writeln!(w, "{}", "-".repeat(96))?;
    for f in findings {
        writeln!(
            w,
            "{:<24} {} {:<28} {:<22} {}",
            f.advisory,
            severity_colored(&f.severity),
            f.package,
            f.installed_version,
            f.fixed.as_deref().unwrap_or("N/A")
        )?;
        if f.issues.iter().any(|i| *i != f.advisory) {
            writeln!(w, "{:<24} {}", "", f.issues.join(", ").dimmed())?;
        }
    }
    Ok(())
}

impl Render for ScanReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Host scan: {} ({})", self.os.bold(), self.distro)?;
        render_findings(
            w,
            self.packages_scanned,
            self.advisories,
            &self.severity,
            &self.findings,
        )
    }
}
