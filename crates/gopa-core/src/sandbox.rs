//! Runs submitted source through the active toolchain
//!
//! The source is written to a uniquely named file in the private root
//! directory, the runner is started with that directory as its working
//! directory, and everything it prints on either stream is collected in
//! arrival order. A program that fails to build or exits non-zero is a normal
//! result; only failing to start the runner is an error.

use crate::catalog::until_cancelled;
use crate::config::GopaConfig;
use crate::errors::{GopaError, GopaResult};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

const READ_CHUNK: usize = 8 * 1024;

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Merged standard output and standard error
    pub output: String,
    /// Exit status of the runner, `None` when killed by a signal
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    workdir: PathBuf,
    run_command: String,
    source_extension: String,
}

impl Sandbox {
    pub fn new(config: &GopaConfig) -> Self {
        Self {
            workdir: config.home.clone(),
            run_command: config.run_command.clone(),
            source_extension: config.source_extension.clone(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run `source` with `runner`, e.g. `<runner> run <root>/gopa-XXXX.go`.
    ///
    /// The source file is removed on every exit path.
    pub async fn run(
        &self,
        source: &str,
        runner: &Path,
        cancel: &CancellationToken,
    ) -> GopaResult<ExecutionResult> {
        let source_file = self.write_source(source)?;
        log::debug!("Running {} with {}", source_file.display(), runner.display());

        let started = Instant::now();
        let mut child = Command::new(runner)
            .arg(&self.run_command)
            .arg(&*source_file)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GopaError::Spawn {
                program: runner.to_path_buf(),
                message: e.to_string(),
            })?;

        let output = match collect_output(&mut child, cancel).await {
            Ok(output) => output,
            Err(e) => {
                terminate(&mut child).await;
                return Err(e);
            }
        };

        let status = match until_cancelled(cancel, child.wait()).await {
            Ok(status) => status.map_err(|e| GopaError::Spawn {
                program: runner.to_path_buf(),
                message: format!("waiting for exit: {}", e),
            })?,
            Err(e) => {
                terminate(&mut child).await;
                return Err(e);
            }
        };

        let result = ExecutionResult {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_code: status.code(),
            duration: started.elapsed(),
        };

        log::info!(
            "Run finished with {:?} after {:.2?} ({} bytes of output)",
            result.exit_code,
            result.duration,
            result.output.len()
        );
        drop(source_file);
        Ok(result)
    }

    fn write_source(&self, source: &str) -> GopaResult<tempfile::TempPath> {
        std::fs::create_dir_all(&self.workdir)
            .map_err(|e| GopaError::filesystem("creating", &self.workdir, e))?;

        let mut file = tempfile::Builder::new()
            .prefix("gopa-")
            .suffix(&format!(".{}", self.source_extension))
            .tempfile_in(&self.workdir)
            .map_err(|e| GopaError::filesystem("creating source file in", &self.workdir, e))?;

        file.write_all(source.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| GopaError::filesystem("writing", file.path(), e))?;

        // Close the handle; the path still deletes itself on drop.
        Ok(file.into_temp_path())
    }
}

/// Drain both pipes until they close, interleaving chunks as they arrive
async fn collect_output(child: &mut Child, cancel: &CancellationToken) -> GopaResult<Vec<u8>> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let mut output = Vec::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            _ = cancel.cancelled() => return Err(GopaError::Cancelled),
            read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                append(read, &mut stdout, &out_buf, &mut output)?;
            }
            read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                append(read, &mut stderr, &err_buf, &mut output)?;
            }
        }
    }

    Ok(output)
}

async fn read_chunk<R: AsyncRead + Unpin>(pipe: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

fn append<R>(
    read: io::Result<usize>,
    pipe: &mut Option<R>,
    buf: &[u8],
    output: &mut Vec<u8>,
) -> GopaResult<()> {
    match read {
        Ok(0) => *pipe = None,
        Ok(n) => output.extend_from_slice(&buf[..n]),
        Err(e) => {
            return Err(GopaError::Filesystem {
                context: "reading runner output".to_string(),
                message: e.to_string(),
            })
        }
    }
    Ok(())
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        log::warn!("Failed to kill runner: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_utils::archives::ECHO_RUNNER;
    use serial_test::serial;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn fake_runner(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("fake-go");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn leftover_sources(workdir: &Path) -> Vec<PathBuf> {
        fs::read_dir(workdir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with("gopa-"))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn sandbox_in(workdir: &Path) -> Sandbox {
        Sandbox::new(&GopaConfig::with_home(workdir))
    }

    #[tokio::test]
    #[serial]
    async fn test_run_returns_program_output() {
        let tools = tempdir().unwrap();
        let workdir = tempdir().unwrap();
        let runner = fake_runner(tools.path(), ECHO_RUNNER);

        let source = "package main\n\nfunc main() { println(\"hi\") }\n";
        let result = sandbox_in(workdir.path())
            .run(source, &runner, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.output.starts_with("runner: run\n"));
        assert!(result.output.contains(source));
        assert!(leftover_sources(workdir.path()).is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_failing_program_is_output_not_error() {
        let tools = tempdir().unwrap();
        let workdir = tempdir().unwrap();
        let runner = fake_runner(
            tools.path(),
            "#!/bin/sh\necho \"building $2\"\necho \"./prog.go:3:1: syntax error\" >&2\nexit 2\n",
        );

        let result = sandbox_in(workdir.path())
            .run("package main\nfunc", &runner, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.exit_code, Some(2));
        assert!(!result.success());
        assert!(result.output.contains("building "));
        assert!(result.output.contains("syntax error"));
        assert!(leftover_sources(workdir.path()).is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_runs_in_private_workdir() {
        let tools = tempdir().unwrap();
        let workdir = tempdir().unwrap();
        let runner = fake_runner(tools.path(), "#!/bin/sh\npwd -P\nbasename \"$2\"\n");

        let result = sandbox_in(workdir.path())
            .run("package main", &runner, &CancellationToken::new())
            .await
            .unwrap();

        let mut lines = result.output.lines();
        let expected = workdir.path().canonicalize().unwrap();
        assert_eq!(lines.next().map(PathBuf::from), Some(expected));
        let name = lines.next().unwrap();
        assert!(name.starts_with("gopa-") && name.ends_with(".go"), "{}", name);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_runner_is_spawn_error() {
        let workdir = tempdir().unwrap();
        let err = sandbox_in(workdir.path())
            .run("package main", Path::new("/nonexistent/bin/go"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GopaError::Spawn { .. }));
        assert!(leftover_sources(workdir.path()).is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_cancel_kills_runner() {
        let tools = tempdir().unwrap();
        let workdir = tempdir().unwrap();
        let runner = fake_runner(tools.path(), "#!/bin/sh\necho started\nexec sleep 30\n");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = sandbox_in(workdir.path())
            .run("package main", &runner, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GopaError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(leftover_sources(workdir.path()).is_empty());
    }
}
