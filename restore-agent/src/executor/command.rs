//! Running the barman-cloud tools as child processes.
//!
//! Every child gets exactly the [`Environment`] it is handed (the agent's own
//! environment is cleared), its output is forwarded to the log line by line,
//! and cancellation sends SIGTERM followed by a kill after a grace period.

use super::exit_code::{ExitClass, ToolKind};
use crate::store::credentials::Environment;
use crate::{RestoreError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How to launch one tool: a program plus optional leading arguments, so a
/// tool can be run through a wrapper (`sh script`, `env ...`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarmanTool {
    pub program: PathBuf,
    #[serde(default)]
    pub prefix_args: Vec<String>,
}

impl BarmanTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    pub fn wrapped(program: impl Into<PathBuf>, prefix_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args,
        }
    }

    /// Program and leading arguments as words of a shell command line
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.prefix_args.iter().cloned())
            .collect()
    }
}

/// The set of tools used by a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarmanTools {
    pub restore: BarmanTool,
    pub wal_restore: BarmanTool,
    pub backup_list: BarmanTool,
    pub check_wal_archive: BarmanTool,
    /// Seconds between SIGTERM and SIGKILL when a run is cancelled
    #[serde(default = "default_termination_grace_secs")]
    pub termination_grace_secs: u64,
}

fn default_termination_grace_secs() -> u64 {
    10
}

impl Default for BarmanTools {
    fn default() -> Self {
        Self {
            restore: BarmanTool::new(ToolKind::Restore.default_program()),
            wal_restore: BarmanTool::new(ToolKind::WalRestore.default_program()),
            backup_list: BarmanTool::new(ToolKind::BackupList.default_program()),
            check_wal_archive: BarmanTool::new(ToolKind::CheckWalArchive.default_program()),
            termination_grace_secs: default_termination_grace_secs(),
        }
    }
}

impl BarmanTools {
    pub fn get(&self, kind: ToolKind) -> &BarmanTool {
        match kind {
            ToolKind::Restore => &self.restore,
            ToolKind::WalRestore => &self.wal_restore,
            ToolKind::BackupList => &self.backup_list,
            ToolKind::CheckWalArchive => &self.check_wal_archive,
        }
    }

    fn grace_period(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

/// Result of a completed tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub kind: ToolKind,
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
    /// Collected standard output, empty in streaming mode
    pub stdout: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Failure classification, `None` on success
    pub fn failure(&self) -> Option<ExitClass> {
        if self.success() {
            None
        } else {
            Some(ExitClass::classify(self.kind, self.code))
        }
    }

    /// Turn a failed run into a mechanism error
    pub fn into_result(self) -> Result<ToolOutput> {
        match self.failure() {
            None => Ok(self),
            Some(class) => Err(RestoreError::Mechanism {
                tool: self.kind,
                class,
            }),
        }
    }
}

/// Run a tool, forwarding both output streams to the log
pub async fn run_streaming(
    tools: &BarmanTools,
    kind: ToolKind,
    args: &[String],
    env: &Environment,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    run(tools, kind, args, env, cancel, false).await
}

/// Run a tool, collecting standard output and logging standard error
pub async fn run_capturing(
    tools: &BarmanTools,
    kind: ToolKind,
    args: &[String],
    env: &Environment,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    run(tools, kind, args, env, cancel, true).await
}

async fn run(
    tools: &BarmanTools,
    kind: ToolKind,
    args: &[String],
    env: &Environment,
    cancel: &CancellationToken,
    capture_stdout: bool,
) -> Result<ToolOutput> {
    if cancel.is_cancelled() {
        return Err(RestoreError::Cancelled);
    }

    let tool = tools.get(kind);
    info!("Running {} with options: {:?}", kind, args);

    let mut child = Command::new(&tool.program)
        .args(&tool.prefix_args)
        .args(args)
        .env_clear()
        .envs(env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RestoreError::fs(&tool.program, e))?;

    let stdout_task = child
        .stdout
        .take()
        .map(|out| forward_lines(out, kind, "stdout", capture_stdout));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| forward_lines(err, kind, "stderr", false));

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    let status = match exited {
        Some(status) => status?,
        None => {
            terminate(&mut child, kind, tools.grace_period()).await;
            // A grandchild may still hold the pipes open
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                task.abort();
            }
            return Err(RestoreError::Cancelled);
        }
    };

    let stdout = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    debug!("{} exited with {}", kind, status);

    Ok(ToolOutput {
        kind,
        code: status.code(),
        stdout,
    })
}

/// Log every line of a stream; optionally collect it as well
fn forward_lines<R>(reader: R, kind: ToolKind, stream: &'static str, collect: bool) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut collected = String::new();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if collect {
                        collected.push_str(&line);
                        collected.push('\n');
                    } else {
                        info!("[{} {}] {}", kind, stream, line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read {} of {}: {}", stream, kind, e);
                    break;
                }
            }
        }

        collected
    })
}

/// SIGTERM, wait up to `grace`, then kill
async fn terminate(child: &mut Child, kind: ToolKind, grace: Duration) {
    if let Some(pid) = child.id() {
        info!("Sending SIGTERM to {} (pid {})", kind, pid);
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                    return;
                }
                warn!("{} did not exit within {:?} of SIGTERM, killing it", kind, grace);
            }
            Err(e) => warn!("Failed to send SIGTERM to {}: {}", kind, e),
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill {}: {}", kind, e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// A tool implemented by a shell script written into `dir`
    pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> BarmanTool {
        let script = dir.join(format!("{}.sh", name));
        std::fs::write(&script, body).unwrap();
        BarmanTool::wrapped("sh", vec![script.to_string_lossy().into_owned()])
    }

    /// Minimal environment for scripts that need to find coreutils
    pub(crate) fn test_env() -> Environment {
        Environment::empty().with("PATH", std::env::var("PATH").unwrap_or_default())
    }

    fn tools_with(kind: ToolKind, tool: BarmanTool) -> BarmanTools {
        let mut tools = BarmanTools {
            termination_grace_secs: 1,
            ..BarmanTools::default()
        };
        match kind {
            ToolKind::Restore => tools.restore = tool,
            ToolKind::WalRestore => tools.wal_restore = tool,
            ToolKind::BackupList => tools.backup_list = tool,
            ToolKind::CheckWalArchive => tools.check_wal_archive = tool,
        }
        tools
    }

    #[tokio::test]
    async fn test_capture_output_and_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(temp_dir.path(), "list", "echo \"$1 $2\"\necho second\n");
        let tools = tools_with(ToolKind::BackupList, tool);

        let output = run_capturing(
            &tools,
            ToolKind::BackupList,
            &["s3://backups/".to_string(), "cluster-example".to_string()],
            &test_env(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "s3://backups/ cluster-example\nsecond\n");
    }

    #[tokio::test]
    async fn test_child_sees_only_given_environment() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(
            temp_dir.path(),
            "env",
            "[ -z \"$RESTORE_AGENT_TEST_LEAK\" ] || exit 9\necho \"$AWS_ACCESS_KEY_ID\"\n",
        );
        let tools = tools_with(ToolKind::BackupList, tool);
        std::env::set_var("RESTORE_AGENT_TEST_LEAK", "1");

        let output = run_capturing(
            &tools,
            ToolKind::BackupList,
            &[],
            &test_env().with("AWS_ACCESS_KEY_ID", "minio-user"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(output.code, Some(0));
        assert_eq!(output.stdout, "minio-user\n");
    }

    #[tokio::test]
    async fn test_exit_codes_are_classified() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(temp_dir.path(), "wal", "exit \"$1\"\n");
        let tools = tools_with(ToolKind::WalRestore, tool);

        for (code, class) in [
            ("1", ExitClass::NotFound),
            ("2", ExitClass::Connectivity),
            ("3", ExitClass::InvalidInput),
            ("42", ExitClass::Unknown(42)),
        ] {
            let output = run_streaming(
                &tools,
                ToolKind::WalRestore,
                &[code.to_string()],
                &test_env(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
            assert_eq!(output.failure(), Some(class));
            match output.into_result() {
                Err(RestoreError::Mechanism { tool, class: got }) => {
                    assert_eq!(tool, ToolKind::WalRestore);
                    assert_eq!(got, class);
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_cancellation_terminates_child() {
        let temp_dir = TempDir::new().unwrap();
        let tool = fake_tool(temp_dir.path(), "slow", "exec sleep 30\n");
        let tools = tools_with(ToolKind::Restore, tool);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = run_streaming(&tools, ToolKind::Restore, &[], &test_env(), &cancel).await;

        assert!(matches!(result, Err(RestoreError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let tools = tools_with(
            ToolKind::Restore,
            BarmanTool::new("/nonexistent/barman-cloud-restore"),
        );
        let result = run_streaming(
            &tools,
            ToolKind::Restore,
            &[],
            &test_env(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(RestoreError::Filesystem { .. })));
    }

    #[test]
    fn test_command_line_includes_wrapper() {
        let tool = BarmanTool::wrapped("/usr/bin/env", vec!["barman-cloud-wal-restore".to_string()]);
        assert_eq!(tool.command_line(), vec!["/usr/bin/env", "barman-cloud-wal-restore"]);
        assert_eq!(
            BarmanTools::default().get(ToolKind::WalRestore).command_line(),
            vec!["barman-cloud-wal-restore"]
        );
    }
}
