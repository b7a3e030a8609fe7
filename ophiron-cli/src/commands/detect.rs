//! `ophiron detect` command handler

use std::io::Write;

use colored::Colorize;
use serde::Serialize;

use ophiron_core::config::OphironConfig;
use ophiron_cve_scanner::{CveScannerConfig, Detector, Distro, OsRelease, PackageFormat};

use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `detect` command.
///
/// Unsupported hosts are still reported, then exit with code 5.
pub async fn execute(config: &OphironConfig, writer: &OutputWriter) -> Result<(), CliError> {
    let scanner_config = CveScannerConfig::from_core(&config.cve_scanner);
    let path = scanner_config.os_release_path.display().to_string();
    let release = Detector::new(&scanner_config.os_release_path)
        .read_release()
        .await;

    let report = DetectReport::new(path, &release);
    writer.render(&report)?;

    if !report.supported {
        let os = if release.id.is_empty() {
            Distro::Unknown.to_string()
        } else {
            release.id
        };
        return Err(CliError::Unsupported(os));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct DetectReport {
    pub os_release_path: String,
    pub distro: Distro,
    pub supported: bool,
    pub id: String,
    pub pretty_name: String,
    pub version_id: Option<String>,
    pub codename: Option<String>,
    /// Package manager invocation used for listing (without format flags).
    pub package_command: Option<String>,
}

impl DetectReport {
    pub fn new(os_release_path: String, release: &OsRelease) -> Self {
        let distro = release.distro();
        Self {
            os_release_path,
            distro,
            supported: distro != Distro::Unknown,
            id: release.id.clone(),
            pretty_name: release.pretty_name.clone(),
            version_id: release.version_id.clone(),
            codename: release.codename.clone(),
            package_command: PackageFormat::for_distro(distro)
                .map(|f| f.command()[..2].join(" ")),
        }
    }
}

impl Render for DetectReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let distro = self.distro.to_string();
        if self.supported {
            writeln!(w, "Distribution: {}", distro.green().bold())?;
        } else {
            writeln!(w, "Distribution: {}", distro.red().bold())?;
        }
        writeln!(w, "Source: {}", self.os_release_path)?;
        if !self.pretty_name.is_empty() {
            writeln!(w, "Name: {}", self.pretty_name)?;
        }
        if let Some(version) = &self.version_id {
            writeln!(w, "Version: {version}")?;
        }
        if let Some(codename) = &self.codename {
            writeln!(w, "Codename: {codename}")?;
        }
        match &self.package_command {
            Some(cmd) => writeln!(w, "Package listing: {cmd}")?,
            None => writeln!(w, "{}", "This distribution is not supported.".red())?,
        }
        Ok(())
    }
}
