#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`CveScannerError`)
//! - [`config`]: Scanner configuration (`CveScannerConfig`, builder)
//! - [`types`]: Domain types (`Distro`, `InstalledPackage`, `Match`, `BatchResult`, `ScanSummary`)
//! - [`detect`]: OS detection from os-release (`Detector`, `OsRelease`)
//! - [`exec`]: Command execution seam (`CommandRunner`, `HostRunner`)
//! - [`container`]: Container runtime seam (`ContainerRuntime`, `BollardRuntime`)
//! - [`version`]: Version ordering (`VersionComparator`, `Vercmp`)
//! - [`enumerate`]: Installed package listing (`PackageEnumerator`, `PackageFormat`)
//! - [`fetch`]: Advisory feed HTTP client (`FeedClient`)
//! - [`backend`]: Per-distro matching (`DistroBackend`, `Backend`, `get_handler`)
//! - [`batch`]: Batched matching with incremental persistence (`BatchMatcher`)
//! - [`cache`]: Per-distro result cache (`CacheLocation`, `ScanLock`)
//! - [`scanner`]: Host scan orchestrator (`ScanOrchestrator`)
//! - [`container_scan`]: Container scan adapter (`ContainerScanAdapter`)
//!
//! # Architecture
//!
//! ```text
//! Detector --> Distro --> get_handler --> Backend
//!                                           |
//!            PackageEnumerator --> Vec<InstalledPackage>
//!                                           |
//!                      fetch_advisories (once per scan)
//!                                           |
//!                    BatchMatcher --> batch_<n>.json (per batch)
//!                                           |
//!                              ScanSummary --> matched.json
//! ```

pub mod backend;
pub mod batch;
pub mod cache;
pub mod config;
pub mod container;
pub mod container_scan;
pub mod detect;
pub mod enumerate;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod scanner;
pub mod types;
pub mod version;

// --- Public API Re-exports ---

// Orchestrators
pub use container_scan::{ContainerScanAdapter, ContainerScanReport};
pub use scanner::ScanOrchestrator;

// Configuration
pub use config::{CveScannerConfig, CveScannerConfigBuilder, FeedEndpoints};

// Error
pub use error::CveScannerError;

// Types
pub use types::{
    BatchResult, Distro, InstalledPackage, Match, PackageResult, ScanSummary, SeverityCounts,
};

// Detection
pub use detect::{Detector, OsRelease};

// Execution seams
pub use container::{BollardRuntime, ContainerRuntime};
pub use exec::{CommandRunner, HostRunner};

// Matching
pub use backend::{Backend, DistroBackend, get_handler};
pub use batch::BatchMatcher;
pub use enumerate::{PackageEnumerator, PackageFormat};
pub use version::{VersionComparator, Vercmp};
