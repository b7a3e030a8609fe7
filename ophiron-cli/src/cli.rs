//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Default configuration file, used only when it exists.
pub const DEFAULT_CONFIG_PATH: &str = "ophiron.toml";

/// Ophiron -- package vulnerability scanner for Linux hosts and containers.
///
/// Use `ophiron <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "ophiron", version, about, long_about = None)]
pub struct Cli {
    /// Path to the ophiron.toml configuration file.
    ///
    /// When omitted, `./ophiron.toml` is used if present, otherwise defaults.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the host's installed packages for known vulnerabilities.
    Scan(ScanArgs),

    /// Scan a running Docker container.
    Container(ContainerArgs),

    /// Show the detected host distribution.
    Detect,

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- scan ----

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Ask for fresh advisory data.
    #[arg(long)]
    pub force_refresh: bool,

    /// Prefer the cached package list over querying the package manager.
    #[arg(long)]
    pub no_system: bool,
}

// ---- container ----

#[derive(Args, Debug)]
pub struct ContainerArgs {
    /// Container id or name.
    pub container: String,
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, cve_scanner, feeds).
        #[arg(long)]
        section: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_scan_defaults() {
        let cli = Cli::try_parse_from(["ophiron", "scan"]).expect("parse succeeded");
        match cli.command {
            Commands::Scan(args) => {
                assert!(!args.force_refresh, "force_refresh should default to false");
                assert!(!args.no_system, "no_system should default to false");
            }
            _ => panic!("expected Scan command"),
        }
        assert!(cli.config.is_none());
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_cli_parse_scan_flags() {
        let cli = Cli::try_parse_from(["ophiron", "scan", "--force-refresh", "--no-system"])
            .expect("parse succeeded");
        match cli.command {
            Commands::Scan(args) => {
                assert!(args.force_refresh);
                assert!(args.no_system);
            }
            _ => panic!("expected Scan command"),
        }
    }

    #[test]
    fn test_cli_parse_container_requires_id() {
        assert!(
            Cli::try_parse_from(["ophiron", "container"]).is_err(),
            "container without id should fail"
        );

        let cli = Cli::try_parse_from(["ophiron", "container", "web-1"]).expect("parse succeeded");
        match cli.command {
            Commands::Container(args) => assert_eq!(args.container, "web-1"),
            _ => panic!("expected Container command"),
        }
    }

    #[test]
    fn test_cli_parse_detect() {
        let cli = Cli::try_parse_from(["ophiron", "detect"]).expect("parse succeeded");
        assert!(matches!(cli.command, Commands::Detect));
    }

    #[test]
    fn test_cli_parse_config_show_section() {
        let cli = Cli::try_parse_from(["ophiron", "config", "show", "--section", "feeds"])
            .expect("parse succeeded");
        match cli.command {
            Commands::Config(args) => match args.action {
                ConfigAction::Show { section } => assert_eq!(section.as_deref(), Some("feeds")),
                _ => panic!("expected Show action"),
            },
            _ => panic!("expected Config command"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ophiron",
            "detect",
            "--output",
            "json",
            "--config",
            "/etc/ophiron/ophiron.toml",
            "--log-level",
            "debug",
        ])
        .expect("parse succeeded");
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(
            cli.config,
            Some(PathBuf::from("/etc/ophiron/ophiron.toml"))
        );
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_rejects_unknown_output_format() {
        let result = Cli::try_parse_from(["ophiron", "--output", "yaml", "detect"]);
        assert!(result.is_err(), "yaml is not a supported output format");
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
