//! Container runtime abstraction for in-container scanning.
//!
//! The [`ContainerRuntime`] trait covers the three things a container scan
//! needs from Docker: inspecting state, executing a command, and copying a
//! path out as a tar archive. [`BollardRuntime`] talks to the daemon;
//! tests use `MockRuntime`.
//!
//! [`ContainerRunner`] adapts a runtime plus a container handle into a
//! [`CommandRunner`], so package enumeration and `zypper` parsing run the same
//! code on the host and inside a container.
//!
//! # Resilience ladder
//!
//! Minimal images often have no shell or no package tool on `PATH`.
//! Callers try, in order:
//!
//! 1. direct exec (`ExecMode::Direct`)
//! 2. shell-wrapped exec through one of [`SHELLS`]
//! 3. copying files out with [`ContainerRuntime::copy_from_container`]
//!
//! # Container reference validation
//!
//! References must be a hex ID (1-64 chars) or a Docker name
//! (`[A-Za-z0-9][A-Za-z0-9_.-]*`, at most 128 chars).

use std::future::Future;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::StreamExt;
use tracing::debug;

use ophiron_core::types::ContainerInfo;

use crate::error::CveScannerError;
use crate::exec::{CommandOutput, CommandRunner};

/// Shells probed for shell-wrapped execution, in order.
pub const SHELLS: [&str; 4] = ["/bin/sh", "/bin/bash", "/usr/bin/sh", "/busybox/sh"];

/// Largest single file accepted out of a container archive (256 MiB).
const MAX_ARCHIVE_ENTRY: u64 = 256 * 1024 * 1024;

/// Validates a container reference before it reaches the Docker API.
pub fn validate_container_ref(reference: &str) -> Result<(), CveScannerError> {
    if reference.is_empty() || reference.len() > 128 {
        return Err(CveScannerError::DockerApi(format!(
            "invalid container reference: length {} (must be 1-128)",
            reference.len()
        )));
    }
    let is_hex_id = reference.len() <= 64 && reference.chars().all(|c| c.is_ascii_hexdigit());
    let mut chars = reference.chars();
    let is_name = chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if is_hex_id || is_name {
        Ok(())
    } else {
        Err(CveScannerError::DockerApi(
            "invalid container reference: contains forbidden characters".to_owned(),
        ))
    }
}

/// Result of a command executed inside a container.
///
/// Docker multiplexes stdout and stderr; `output` holds both in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: Vec<u8>,
}

/// Container operations needed by the scanner.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Inspects a container.
    ///
    /// # Errors
    ///
    /// - `CveScannerError::ContainerNotFound`: no such container (404)
    /// - `CveScannerError::DockerApi`: invalid reference or other API errors
    fn inspect_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ContainerInfo, CveScannerError>> + Send;

    /// Runs `cmd` inside the container and waits for it to exit.
    ///
    /// A missing binary is reported by Docker as a non-zero exit code, not an error.
    fn exec(
        &self,
        id: &str,
        cmd: &[&str],
    ) -> impl Future<Output = Result<ExecOutput, CveScannerError>> + Send;

    /// Copies `path` out of the container as a tar archive.
    fn copy_from_container(
        &self,
        id: &str,
        path: &str,
    ) -> impl Future<Output = Result<Vec<u8>, CveScannerError>> + Send;
}

impl<C: ContainerRuntime> ContainerRuntime for Arc<C> {
    fn inspect_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ContainerInfo, CveScannerError>> + Send {
        (**self).inspect_container(id)
    }

    fn exec(
        &self,
        id: &str,
        cmd: &[&str],
    ) -> impl Future<Output = Result<ExecOutput, CveScannerError>> + Send {
        (**self).exec(id, cmd)
    }

    fn copy_from_container(
        &self,
        id: &str,
        path: &str,
    ) -> impl Future<Output = Result<Vec<u8>, CveScannerError>> + Send {
        (**self).copy_from_container(id, path)
    }
}

/// Production runtime backed by `bollard`.
pub struct BollardRuntime {
    docker: Arc<bollard::Docker>,
}

impl BollardRuntime {
    /// Connects using `DOCKER_HOST` or the platform default socket.
    ///
    /// # Errors
    ///
    /// Returns `CveScannerError::DockerConnection` if the client cannot be built.
    pub fn connect_local() -> Result<Self, CveScannerError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            CveScannerError::DockerConnection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to a specific Unix socket.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, CveScannerError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    CveScannerError::DockerConnection(format!(
                        "failed to connect to docker at {socket_path}: {e}"
                    ))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to `socket` when given, otherwise to the local defaults.
    pub fn connect(socket: Option<&str>) -> Result<Self, CveScannerError> {
        match socket {
            Some(path) => Self::connect_with_socket(path),
            None => Self::connect_local(),
        }
    }
}

fn api_error(id: &str, context: &str, err: bollard::errors::Error) -> CveScannerError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => CveScannerError::ContainerNotFound(id.to_owned()),
        other => CveScannerError::DockerApi(format!("{context} failed: {other}")),
    }
}

impl ContainerRuntime for BollardRuntime {
    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, CveScannerError> {
        validate_container_ref(id)?;

        let details = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| api_error(id, "inspect container", e))?;

        let name = details
            .name
            .map(|n| n.trim_start_matches('/').to_owned())
            .unwrap_or_default();
        let image = details.config.and_then(|c| c.image).unwrap_or_default();
        let status = details
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        let created_at = details
            .created
            .and_then(|c| chrono::DateTime::parse_from_rfc3339(&c).ok())
            .map(SystemTime::from)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        Ok(ContainerInfo {
            id: details.id.unwrap_or_else(|| id.to_owned()),
            name,
            image,
            status,
            created_at,
        })
    }

    async fn exec(&self, id: &str, cmd: &[&str]) -> Result<ExecOutput, CveScannerError> {
        use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};

        validate_container_ref(id)?;

        let options = CreateExecOptions::<String> {
            cmd: Some(cmd.iter().map(|s| (*s).to_owned()).collect()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| api_error(id, "create exec", e))?;

        let mut output = Vec::new();
        match self
            .docker
            .start_exec(&created.id, None::<StartExecOptions>)
            .await
            .map_err(|e| api_error(id, "start exec", e))?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| api_error(id, "read exec output", e))?;
                    output.extend_from_slice(&chunk.into_bytes());
                }
            }
            StartExecResults::Detached => {}
        }

        let inspected = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| api_error(id, "inspect exec", e))?;

        Ok(ExecOutput {
            exit_code: inspected.exit_code.unwrap_or(-1),
            output,
        })
    }

    async fn copy_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>, CveScannerError> {
        use bollard::container::DownloadFromContainerOptions;

        validate_container_ref(id)?;

        let mut stream = Box::pin(self.docker.download_from_container(
            id,
            Some(DownloadFromContainerOptions {
                path: path.to_owned(),
            }),
        ));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| api_error(id, "download from container", e))?;
            archive.extend_from_slice(&chunk);
        }
        Ok(archive)
    }
}

/// How commands are launched inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Exec the binary directly.
    Direct,
    /// Wrap the command line in `<shell> -c`.
    Shell(&'static str),
}

/// [`CommandRunner`] that executes inside a container.
pub struct ContainerRunner<'a, C> {
    runtime: &'a C,
    id: &'a str,
    mode: ExecMode,
    timeout: Duration,
}

impl<'a, C: ContainerRuntime> ContainerRunner<'a, C> {
    pub fn new(runtime: &'a C, id: &'a str, mode: ExecMode, timeout: Duration) -> Self {
        Self {
            runtime,
            id,
            mode,
            timeout,
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }
}

impl<C: ContainerRuntime> CommandRunner for ContainerRunner<'_, C> {
    async fn run(&self, argv: &[&str]) -> Result<CommandOutput, CveScannerError> {
        let program = argv.first().copied().unwrap_or_default().to_owned();
        let script;
        let cmd: Vec<&str> = match self.mode {
            ExecMode::Direct => argv.to_vec(),
            ExecMode::Shell(shell) => {
                script = shell_join(argv);
                vec![shell, "-c", script.as_str()]
            }
        };

        debug!(container = self.id, ?cmd, "running container command");
        let out = tokio::time::timeout(self.timeout, self.runtime.exec(self.id, &cmd))
            .await
            .map_err(|_| CveScannerError::Command {
                program: program.clone(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            })??;

        Ok(CommandOutput {
            exit_code: out.exit_code,
            stdout: String::from_utf8_lossy(&out.output).into_owned(),
            stderr: String::new(),
        })
    }
}

/// Single-quotes each argument for `sh -c`.
pub fn shell_join(argv: &[&str]) -> String {
    argv.iter()
        .map(|arg| {
            if !arg.is_empty()
                && arg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_./=:%".contains(c))
            {
                (*arg).to_owned()
            } else {
                format!("'{}'", arg.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Finds a working shell in the container.
pub async fn probe_shell<C: ContainerRuntime>(
    runtime: &C,
    id: &str,
    timeout: Duration,
) -> Option<&'static str> {
    for shell in SHELLS {
        let probe = tokio::time::timeout(timeout, runtime.exec(id, &[shell, "-c", "echo ok"])).await;
        if let Ok(Ok(out)) = probe
            && out.exit_code == 0
            && String::from_utf8_lossy(&out.output).contains("ok")
        {
            debug!(container = id, shell, "container shell available");
            return Some(shell);
        }
    }
    debug!(container = id, "no usable shell in container");
    None
}

/// Reads a text file from the container using the resilience ladder.
///
/// Returns `None` when every rung fails.
pub async fn read_container_file<C: ContainerRuntime>(
    runtime: &C,
    id: &str,
    path: &str,
    timeout: Duration,
) -> Option<String> {
    let direct = ContainerRunner::new(runtime, id, ExecMode::Direct, timeout);
    if let Ok(out) = direct.run(&["cat", path]).await
        && out.success()
    {
        return Some(out.stdout);
    }

    for shell in SHELLS {
        let runner = ContainerRunner::new(runtime, id, ExecMode::Shell(shell), timeout);
        if let Ok(out) = runner.run(&["cat", path]).await
            && out.success()
        {
            return Some(out.stdout);
        }
    }

    let archive = copy_with_timeout(runtime, id, path, timeout).await.ok()?;
    let entries = extract_archive(&archive).ok()?;
    entries
        .into_iter()
        .find(|e| !e.data.is_empty())
        .map(|e| String::from_utf8_lossy(&e.data).into_owned())
}

/// Copies a path out with a timeout.
pub async fn copy_with_timeout<C: ContainerRuntime>(
    runtime: &C,
    id: &str,
    path: &str,
    timeout: Duration,
) -> Result<Vec<u8>, CveScannerError> {
    tokio::time::timeout(timeout, runtime.copy_from_container(id, path))
        .await
        .map_err(|_| CveScannerError::DockerApi(format!("copy of {path} timed out")))?
}

/// A regular file extracted from a container archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive (relative to the copied directory's parent).
    pub path: String,
    pub data: Vec<u8>,
}

/// Extracts regular files from a tar archive produced by Docker.
pub fn extract_archive(archive: &[u8]) -> Result<Vec<ArchiveEntry>, CveScannerError> {
    let mut reader = tar::Archive::new(archive);
    let entries = reader
        .entries()
        .map_err(|e| CveScannerError::Parse(format!("tar archive: {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| CveScannerError::Parse(format!("tar entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let size = entry.header().size().unwrap_or(0);
        if size > MAX_ARCHIVE_ENTRY {
            debug!(size, "skipping oversized archive entry");
            continue;
        }
        let path = entry
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut data = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        entry
            .read_to_end(&mut data)
            .map_err(|e| CveScannerError::Parse(format!("tar entry {path}: {e}")))?;
        files.push(ArchiveEntry { path, data });
    }
    Ok(files)
}

/// Test runtime with scripted responses.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockRuntime {
        pub info: Option<ContainerInfo>,
        /// Keyed by the space-joined command line.
        pub exec_responses: HashMap<String, ExecOutput>,
        /// Keyed by the copied path; value is a tar archive.
        pub archives: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockRuntime {
        pub fn running(id: &str) -> Self {
            Self {
                info: Some(ContainerInfo {
                    id: id.to_owned(),
                    name: "test".to_owned(),
                    image: "test:latest".to_owned(),
                    status: "running".to_owned(),
                    created_at: SystemTime::UNIX_EPOCH,
                }),
                ..Self::default()
            }
        }

        pub fn with_exec(mut self, cmdline: &str, exit_code: i64, output: &str) -> Self {
            self.exec_responses.insert(
                cmdline.to_owned(),
                ExecOutput {
                    exit_code,
                    output: output.as_bytes().to_vec(),
                },
            );
            self
        }

        pub fn with_archive(mut self, path: &str, files: &[(&str, &[u8])]) -> Self {
            self.archives.insert(path.to_owned(), build_archive(files));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    impl ContainerRuntime for MockRuntime {
        async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, CveScannerError> {
            validate_container_ref(id)?;
            self.info
                .clone()
                .ok_or_else(|| CveScannerError::ContainerNotFound(id.to_owned()))
        }

        async fn exec(&self, _id: &str, cmd: &[&str]) -> Result<ExecOutput, CveScannerError> {
            let cmdline = cmd.join(" ");
            self.calls.lock().unwrap().push(cmdline.clone());
            Ok(self
                .exec_responses
                .get(&cmdline)
                .cloned()
                .unwrap_or(ExecOutput {
                    exit_code: 127,
                    output: b"executable file not found in $PATH".to_vec(),
                }))
        }

        async fn copy_from_container(
            &self,
            _id: &str,
            path: &str,
        ) -> Result<Vec<u8>, CveScannerError> {
            self.calls.lock().unwrap().push(format!("copy {path}"));
            self.archives
                .get(path)
                .cloned()
                .ok_or_else(|| CveScannerError::DockerApi(format!("no such path: {path}")))
        }
    }
}
