//! 외부 명령 실행 추상화
//!
//! 패키지 열거, `vercmp`, `zypper`는 모두 [`CommandRunner`]를 거칩니다.
//! 호스트에서는 [`HostRunner`]가, 컨테이너에서는
//! [`ContainerRunner`](crate::container::ContainerRunner)가 같은 인터페이스를 구현하므로
//! 열거/비교 로직은 대상을 구분하지 않습니다.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::CveScannerError;

/// 명령 실행 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 종료 코드 (시그널로 종료되면 -1)
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 명령 실행기
///
/// 모든 구현은 명시적 타임아웃을 적용해야 합니다.
pub trait CommandRunner: Send + Sync {
    /// `argv[0]`을 `argv[1..]` 인자로 실행합니다.
    ///
    /// 프로세스를 시작하지 못했거나 타임아웃이면 `CveScannerError::Command`.
    /// 비정상 종료 코드는 에러가 아니며 [`CommandOutput::exit_code`]로 전달됩니다.
    fn run(
        &self,
        argv: &[&str],
    ) -> impl Future<Output = Result<CommandOutput, CveScannerError>> + Send;
}

/// 명령을 실행하고 종료 코드 0일 때만 stdout을 반환합니다.
pub async fn run_checked<R: CommandRunner>(
    runner: &R,
    argv: &[&str],
) -> Result<String, CveScannerError> {
    let output = runner.run(argv).await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(CveScannerError::Command {
            program: argv.first().copied().unwrap_or_default().to_owned(),
            reason: format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ),
        })
    }
}

/// 호스트 프로세스 실행기
#[derive(Debug, Clone)]
pub struct HostRunner {
    timeout: Duration,
}

impl HostRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for HostRunner {
    async fn run(&self, argv: &[&str]) -> Result<CommandOutput, CveScannerError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(CveScannerError::Command {
                program: String::new(),
                reason: "empty command".to_owned(),
            });
        };

        debug!(program, ?args, "running host command");
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| CveScannerError::Command {
                program: (*program).to_owned(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| CveScannerError::Command {
                program: (*program).to_owned(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// 테스트용 스크립트 실행기
///
/// 공백으로 이어붙인 명령줄을 키로 미리 정한 응답을 돌려주고, 호출 기록을 남깁니다.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: HashMap<String, CommandOutput>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// 종료 코드 0과 stdout을 돌려주는 응답을 등록합니다.
        pub fn ok(mut self, cmdline: &str, stdout: &str) -> Self {
            self.responses.insert(
                cmdline.to_owned(),
                CommandOutput {
                    exit_code: 0,
                    stdout: stdout.to_owned(),
                    stderr: String::new(),
                },
            );
            self
        }

        /// 지정한 종료 코드를 돌려주는 응답을 등록합니다.
        pub fn exit(mut self, cmdline: &str, exit_code: i64, stdout: &str) -> Self {
            self.responses.insert(
                cmdline.to_owned(),
                CommandOutput {
                    exit_code,
                    stdout: stdout.to_owned(),
                    stderr: String::new(),
                },
            );
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        async fn run(&self, argv: &[&str]) -> Result<CommandOutput, CveScannerError> {
            let cmdline = argv.join(" ");
            self.calls.lock().unwrap().push(cmdline.clone());
            self.responses
                .get(&cmdline)
                .cloned()
                .ok_or_else(|| CveScannerError::Command {
                    program: argv.first().copied().unwrap_or_default().to_owned(),
                    reason: "No such file or directory".to_owned(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    #[tokio::test]
    async fn host_runner_captures_stdout_and_exit_code() {
        let runner = HostRunner::new(Duration::from_secs(10));
        let out = runner.run(&["sh", "-c", "echo hello; exit 3"]).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn host_runner_missing_program_is_command_error() {
        let runner = HostRunner::new(Duration::from_secs(10));
        let err = runner
            .run(&["definitely-not-a-real-binary-ophiron"])
            .await
            .unwrap_err();
        assert!(matches!(err, CveScannerError::Command { .. }));
    }

    #[tokio::test]
    async fn host_runner_times_out() {
        let runner = HostRunner::new(Duration::from_millis(100));
        let err = runner.run(&["sleep", "5"]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn host_runner_rejects_empty_argv() {
        let runner = HostRunner::new(Duration::from_secs(1));
        assert!(runner.run(&[]).await.is_err());
    }

    #[tokio::test]
    async fn run_checked_requires_zero_exit() {
        let runner = ScriptedRunner::new()
            .ok("pacman -Q", "glibc 2.38-1\n")
            .exit("dpkg -l", 1, "");
        assert_eq!(
            run_checked(&runner, &["pacman", "-Q"]).await.unwrap(),
            "glibc 2.38-1\n"
        );
        assert!(run_checked(&runner, &["dpkg", "-l"]).await.is_err());
        assert!(run_checked(&runner, &["rpm", "-qa"]).await.is_err());
        assert_eq!(runner.calls().len(), 3);
    }
}
