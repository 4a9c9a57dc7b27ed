//! Subprocess runners for the external dump and restore utilities
//!
//! Both utilities are black boxes invoked with a templated argument list.
//! Every invocation has a hard deadline covering both the exit and the
//! draining of its output, and a bounded output buffer. Each utility runs in
//! its own process group, which is killed when the deadline passes.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::store::{Artifact, ArtifactStore};
use crate::config::settings::{CommandSettings, DEFAULT_MAX_OUTPUT_BYTES};
use crate::error::{VaultError, VaultResult};

/// Connection target placeholder
pub const TARGET_PLACEHOLDER: &str = "{target}";
/// Dump destination placeholder
pub const OUTPUT_PLACEHOLDER: &str = "{output}";
/// Restore source placeholder
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// How much stderr travels with a failure
const DIAGNOSTIC_TAIL_BYTES: usize = 4096;

/// Grace period for draining stderr after a killed child
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Tail of a subprocess output stream, bounded in memory
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    bytes: Vec<u8>,
    total: u64,
    limit: usize,
}

impl CapturedOutput {
    fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            total: 0,
            limit: limit.max(1),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        self.bytes.extend_from_slice(chunk);
        // Compact lazily so large outputs don't memmove on every chunk
        if self.bytes.len() > self.limit * 2 {
            let excess = self.bytes.len() - self.limit;
            self.bytes.drain(..excess);
        }
    }

    fn retained(&self) -> &[u8] {
        let start = self.bytes.len().saturating_sub(self.limit);
        &self.bytes[start..]
    }

    /// Total bytes the stream produced
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Whether older output was dropped to stay within the limit
    pub fn truncated(&self) -> bool {
        self.total > self.retained().len() as u64
    }

    /// The last `max_bytes` of retained output, lossily decoded
    pub fn tail(&self, max_bytes: usize) -> String {
        let retained = self.retained();
        let start = retained.len().saturating_sub(max_bytes);
        String::from_utf8_lossy(&retained[start..]).trim().to_string()
    }
}

#[derive(Debug)]
struct ProcessOutcome {
    status: Option<ExitStatus>,
    timed_out: bool,
    stdout: CapturedOutput,
    stderr: CapturedOutput,
    elapsed: Duration,
}

impl ProcessOutcome {
    fn failure(&self, program: &str, timeout: Duration) -> Option<String> {
        if self.timed_out {
            return Some(format!(
                "{} timed out after {}",
                program,
                humanize(timeout)
            ));
        }
        match self.status {
            Some(status) if status.success() => None,
            Some(status) => Some(format!("{} exited with {}", program, status)),
            None => Some(format!("{} did not report an exit status", program)),
        }
    }

    /// Diagnostics for a failure: stderr tail, falling back to stdout
    fn diagnostics(&self) -> String {
        let stderr = self.stderr.tail(DIAGNOSTIC_TAIL_BYTES);
        if stderr.is_empty() {
            self.stdout.tail(DIAGNOSTIC_TAIL_BYTES)
        } else {
            stderr
        }
    }
}

struct ProcessSpec<'a> {
    program: &'a str,
    args: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
    stdin_from: Option<&'a Path>,
    stdout_to: Option<&'a Path>,
}

/// Dumps the live database into a new artifact
#[derive(Debug, Clone)]
pub struct DumpRunner {
    store: ArtifactStore,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl DumpRunner {
    /// Create a runner writing into `store`
    pub fn new(store: ArtifactStore, command: &CommandSettings) -> Self {
        Self {
            store,
            program: command.program.clone(),
            args: command.args.clone(),
            timeout: command.timeout(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Override the subprocess deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the captured output cap
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Dump `connection_target` into a new artifact
    ///
    /// When the argument template has no `{output}` placeholder, the
    /// utility's stdout is written to the artifact instead.
    pub async fn run(&self, connection_target: &str) -> VaultResult<Artifact> {
        self.store.ensure_directory()?;

        let allocation = self.store.allocate(Utc::now());
        let partial = allocation.partial_path.to_string_lossy().to_string();
        let writes_file = self.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER));

        tracing::info!(program = %self.program, name = %allocation.name, "starting database dump");

        let spec = ProcessSpec {
            program: &self.program,
            args: render_args(
                &self.args,
                &[(TARGET_PLACEHOLDER, connection_target), (OUTPUT_PLACEHOLDER, &partial)],
            ),
            timeout: self.timeout,
            max_output_bytes: self.max_output_bytes,
            stdin_from: None,
            stdout_to: if writes_file { None } else { Some(&allocation.partial_path) },
        };

        let outcome = match run_process(spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("failed to run {}: {}", self.program, e);
                tracing::error!(program = %self.program, error = %e, "database dump failed to run");
                return Err(VaultError::DumpFailed {
                    reason,
                    stderr_tail: String::new(),
                });
            }
        };

        let failure = outcome
            .failure(&self.program, self.timeout)
            .or_else(|| match std::fs::metadata(&allocation.partial_path) {
                Ok(metadata) if metadata.len() > 0 => None,
                Ok(_) => Some(format!("{} produced an empty dump", self.program)),
                Err(_) => Some(format!("{} produced no dump file", self.program)),
            });

        if let Some(reason) = failure {
            let stderr_tail = outcome.diagnostics();
            tracing::error!(
                program = %self.program,
                reason = %reason,
                timed_out = outcome.timed_out,
                stderr = %stderr_tail,
                "database dump failed"
            );
            return Err(VaultError::DumpFailed { reason, stderr_tail });
        }

        let artifact = self.store.commit(allocation)?;

        tracing::info!(
            name = %artifact.name,
            size_bytes = artifact.size_bytes,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            output_truncated = outcome.stderr.truncated() || outcome.stdout.truncated(),
            "database dump complete"
        );

        Ok(artifact)
    }
}

/// Replays an artifact into the live database
///
/// This is the only component that mutates the live database. It performs no
/// confirmation checks of its own.
#[derive(Debug, Clone)]
pub struct RestoreRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl RestoreRunner {
    pub fn new(command: &CommandSettings) -> Self {
        Self {
            program: command.program.clone(),
            args: command.args.clone(),
            timeout: command.timeout(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Override the subprocess deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the captured output cap
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Restore `artifact_path` into `connection_target`
    ///
    /// When the argument template has no `{input}` placeholder, the artifact
    /// is piped to the utility's stdin. Returns the elapsed time.
    pub async fn run(&self, connection_target: &str, artifact_path: &Path) -> VaultResult<Duration> {
        let input = artifact_path.to_string_lossy().to_string();
        let reads_file = self.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER));

        tracing::warn!(
            program = %self.program,
            artifact = %artifact_path.display(),
            "starting database restore; live data will be overwritten"
        );

        let spec = ProcessSpec {
            program: &self.program,
            args: render_args(
                &self.args,
                &[(TARGET_PLACEHOLDER, connection_target), (INPUT_PLACEHOLDER, &input)],
            ),
            timeout: self.timeout,
            max_output_bytes: self.max_output_bytes,
            stdin_from: if reads_file { None } else { Some(artifact_path) },
            stdout_to: None,
        };

        let outcome = run_process(spec).await.map_err(|e| {
            tracing::error!(program = %self.program, error = %e, "database restore failed to run");
            VaultError::RestoreFailed {
                reason: format!("failed to run {}: {}", self.program, e),
                stderr_tail: String::new(),
            }
        })?;

        if let Some(reason) = outcome.failure(&self.program, self.timeout) {
            let stderr_tail = outcome.diagnostics();
            tracing::error!(
                program = %self.program,
                reason = %reason,
                timed_out = outcome.timed_out,
                stderr = %stderr_tail,
                "database restore failed; database state may be partially restored"
            );
            return Err(VaultError::RestoreFailed { reason, stderr_tail });
        }

        tracing::info!(
            artifact = %artifact_path.display(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "database restore complete"
        );

        Ok(outcome.elapsed)
    }
}

/// Substitute placeholders in an argument template
pub fn render_args(template: &[String], substitutions: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            substitutions
                .iter()
                .fold(arg.clone(), |acc, (placeholder, value)| acc.replace(placeholder, value))
        })
        .collect()
}

async fn run_process(spec: ProcessSpec<'_>) -> io::Result<ProcessOutcome> {
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + spec.timeout;
    let per_stream = (spec.max_output_bytes / 2).max(1);

    let mut command = Command::new(spec.program);
    command
        .args(&spec.args)
        .stdin(if spec.stdin_from.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let mut group = ProcessGroup::new(child.id());

    let mut stdin_task = match (spec.stdin_from, child.stdin.take()) {
        (Some(source), Some(mut stdin)) => {
            let source = source.to_path_buf();
            Some(tokio::spawn(async move {
                let mut file = tokio::fs::File::open(&source).await?;
                tokio::io::copy(&mut file, &mut stdin).await?;
                stdin.shutdown().await
            }))
        }
        _ => None,
    };

    let stdout = child.stdout.take();
    let mut stdout_task: JoinHandle<io::Result<CapturedOutput>> = match spec.stdout_to {
        Some(dest) => tokio::spawn(write_stream(stdout, dest.to_path_buf())),
        None => tokio::spawn(capture_stream(stdout, per_stream)),
    };
    let mut stderr_task = tokio::spawn(capture_stream(child.stderr.take(), per_stream));

    // Anything that inherited the pipes keeps them open after the child
    // exits, so draining runs under the same deadline as the wait
    let finished = tokio::time::timeout_at(deadline, async {
        let status = child.wait().await?;
        let stdout = join_stream(&mut stdout_task).await?;
        let stderr = join_stream(&mut stderr_task).await?;
        io::Result::Ok((status, stdout, stderr))
    })
    .await;

    match finished {
        Ok(Ok((status, stdout, stderr))) => {
            if let Some(task) = stdin_task.as_mut() {
                // A utility that exits early closes its stdin; the exit status decides
                let joined = tokio::time::timeout_at(deadline, &mut *task).await;
                match joined {
                    Ok(Ok(Err(e))) => {
                        tracing::debug!(error = %e, "input stream closed before the artifact was fully written");
                    }
                    Err(_) => task.abort(),
                    _ => {}
                }
            }
            group.release();

            Ok(ProcessOutcome {
                status: Some(status),
                timed_out: false,
                stdout,
                stderr,
                elapsed: started.elapsed(),
            })
        }
        Ok(Err(e)) => {
            group.kill();
            abort_all(stdin_task.as_ref(), &stdout_task, &stderr_task);
            Err(e)
        }
        Err(_) => {
            group.kill();
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill().await {
                    tracing::warn!(program = %spec.program, error = %e, "failed to kill timed-out process");
                }
            }
            if let Some(task) = stdin_task.as_ref() {
                task.abort();
            }
            stdout_task.abort();

            // Killing the group closes the pipes, so stderr settles quickly
            let drained = tokio::time::timeout(DRAIN_GRACE, &mut stderr_task).await;
            let stderr = match drained {
                Ok(Ok(Ok(captured))) => captured,
                _ => {
                    stderr_task.abort();
                    CapturedOutput::with_limit(per_stream)
                }
            };

            Ok(ProcessOutcome {
                status: None,
                timed_out: true,
                stdout: CapturedOutput::with_limit(per_stream),
                stderr,
                elapsed: started.elapsed(),
            })
        }
    }
}

fn abort_all(
    stdin_task: Option<&JoinHandle<io::Result<()>>>,
    stdout_task: &JoinHandle<io::Result<CapturedOutput>>,
    stderr_task: &JoinHandle<io::Result<CapturedOutput>>,
) {
    if let Some(task) = stdin_task {
        task.abort();
    }
    stdout_task.abort();
    stderr_task.abort();
}

/// The process group a utility runs in
///
/// Dropped while still armed, it kills every process in the group, including
/// helpers the utility left running in the background.
struct ProcessGroup {
    id: Option<u32>,
}

impl ProcessGroup {
    fn new(id: Option<u32>) -> Self {
        Self { id }
    }

    /// Leave the group alone; the utility finished on its own
    fn release(&mut self) {
        self.id = None;
    }

    fn kill(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        #[cfg(unix)]
        {
            let Ok(pgid) = libc::pid_t::try_from(id) else {
                return;
            };
            // SAFETY: kill(2) with a negative pid only signals the group we created
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(
                    pgid,
                    error = %io::Error::last_os_error(),
                    "process group already gone"
                );
            }
        }
        #[cfg(not(unix))]
        let _ = id;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn capture_stream<R>(reader: Option<R>, limit: usize) -> io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedOutput::with_limit(limit);
    let Some(mut reader) = reader else {
        return Ok(captured);
    };

    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        captured.push(&buf[..n]);
    }
    Ok(captured)
}

async fn write_stream<R>(reader: Option<R>, dest: PathBuf) -> io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(&dest).await?;
    if let Some(mut reader) = reader {
        tokio::io::copy(&mut reader, &mut file).await?;
    }
    file.sync_all().await?;
    Ok(CapturedOutput::default())
}

async fn join_stream(task: &mut JoinHandle<io::Result<CapturedOutput>>) -> io::Result<CapturedOutput> {
    task.await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
}

fn humanize(duration: Duration) -> String {
    if duration.as_secs() > 0 && duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
