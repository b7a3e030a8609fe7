//! `ophiron config` command handler

use std::io::Write;

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::commands::ConfigSource;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

const SECTIONS: [&str; 3] = ["general", "cve_scanner", "feeds"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    source: &ConfigSource,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(source, writer).await,
        ConfigAction::Show { section } => execute_show(source, section, writer).await,
    }
}

/// Load and validate, reporting the first error.
///
/// # Errors
///
/// Returns `CliError::Config` if validation fails (parse errors, out-of-range values).
async fn execute_validate(source: &ConfigSource, writer: &OutputWriter) -> Result<(), CliError> {
    info!(source = %source.describe(), "validating configuration");

    let report = match source.load().await {
        Ok(_) => ConfigValidationReport {
            source: source.describe(),
            valid: true,
            errors: Vec::new(),
        },
        Err(e) => ConfigValidationReport {
            source: source.describe(),
            valid: false,
            errors: vec![e.to_string()],
        },
    };

    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

/// Show the effective configuration (file + env overrides + defaults).
async fn execute_show(
    source: &ConfigSource,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = source.load().await?;

    let config_toml = match section.as_deref() {
        None => toml::to_string_pretty(&config),
        Some("general") => toml::to_string_pretty(&config.general),
        Some("cve_scanner") => toml::to_string_pretty(&config.cve_scanner),
        Some("feeds") => toml::to_string_pretty(&config.cve_scanner.feeds),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section: {} (expected: {})",
                other,
                SECTIONS.join(", ")
            )));
        }
    }
    .map_err(|e| CliError::Command(format!("failed to serialize config: {e}")))?;

    writer.render(&ConfigReport {
        source: source.describe(),
        section,
        config_toml,
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Config: {}", self.source.bold())?;
        if self.valid {
            writeln!(w, "Status: {}", "valid".green().bold())?;
        } else {
            writeln!(w, "Status: {}", "invalid".red().bold())?;
            for e in &self.errors {
                writeln!(w, "  - {e}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub source: String,
    pub section: Option<String>,
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        match &self.section {
            Some(section) => writeln!(w, "# {} [{}]", self.source, section)?,
            None => writeln!(w, "# {}", self.source)?,
        }
        write!(w, "{}", self.config_toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;

    fn write_config(dir: &tempfile::TempDir, content: &str) -> ConfigSource {
        let path = dir.path().join("ophiron.toml");
        std::fs::write(&path, content).expect("write config");
        ConfigSource::File(path)
    }

    #[tokio::test]
    async fn test_validate_valid_config() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = write_config(&dir, "[general]\nlog_level = \"debug\"\n");
        let writer = OutputWriter::new(OutputFormat::Json);
        assert!(execute_validate(&source, &writer).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_out_of_range_batch_size() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = write_config(&dir, "[cve_scanner]\nbatch_size = 401\n");
        let writer = OutputWriter::new(OutputFormat::Json);
        let err = execute_validate(&source, &writer)
            .await
            .expect_err("batch_size 401 is invalid");
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_show_unknown_section() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = write_config(&dir, "");
        let writer = OutputWriter::new(OutputFormat::Text);
        let err = execute_show(&source, Some("ebpf".to_owned()), &writer)
            .await
            .expect_err("ebpf is not a section");
        assert!(err.to_string().contains("unknown section: ebpf"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_validation_report_lists_errors() {
        let report = ConfigValidationReport {
            source: "ophiron.toml".to_owned(),
            valid: false,
            errors: vec!["invalid config value for 'cve_scanner.batch_size'".to_owned()],
        };
        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");
        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("invalid"));
        assert!(output.contains("cve_scanner.batch_size"));
    }

    #[test]
    fn test_config_report_renders_toml() {
        let report = ConfigReport {
            source: "ophiron.toml".to_owned(),
            section: Some("general".to_owned()),
            config_toml: "log_level = \"info\"\n".to_owned(),
        };
        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");
        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.starts_with("# ophiron.toml [general]"));
        assert!(output.contains("log_level = \"info\""));
    }
}
