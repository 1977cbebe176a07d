//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CapturedOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub truncated_bytes: usize,
    pub timed_out: bool,
}

impl CapturedOutput {
    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.truncated_bytes > 0 {
            text.push_str(&format!(
                "\n[output truncated {} bytes]\n",
                self.truncated_bytes
            ));
        }
        text
    }
}

/// Run `cmd` to completion or until `timeout`, capturing both streams.
///
/// Each stream is drained on its own thread so a chatty child never blocks on
/// a full pipe. At most `output_limit_bytes` of each stream is kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_captured(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(%err, "failed to spawn command");
        anyhow!(err).context("spawn command")
    })?;

    let stdout = LimitedReader::spawn(child.stdout.take(), output_limit_bytes, "stdout")?;
    let stderr = LimitedReader::spawn(child.stderr.take(), output_limit_bytes, "stderr")?;
    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;

    let (stdout, stdout_truncated) = stdout.finish()?;
    let (stderr, stderr_truncated) = stderr.finish()?;
    let truncated_bytes = stdout_truncated + stderr_truncated;
    if truncated_bytes > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        truncated_bytes,
        timed_out,
    })
}

/// Wait for the child; kill it once `timeout` elapses. The flag reports a kill.
fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
    child.kill().context("kill command")?;
    let status = child.wait().context("wait for killed command")?;
    Ok((status, true))
}

/// Background drain of one child stream.
struct LimitedReader {
    label: &'static str,
    handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>,
}

impl LimitedReader {
    fn spawn<R: Read + Send + 'static>(
        stream: Option<R>,
        limit: usize,
        label: &'static str,
    ) -> Result<Self> {
        let stream = stream.ok_or_else(|| anyhow!("{label} was not piped"))?;
        let handle = thread::spawn(move || read_stream_limited(stream, limit));
        Ok(Self { label, handle })
    }

    /// Kept bytes and the count of discarded ones.
    fn finish(self) -> Result<(Vec<u8>, usize)> {
        let label = self.label;
        self.handle
            .join()
            .map_err(|_| anyhow!("{label} reader thread panicked"))?
            .with_context(|| format!("read {label}"))
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut discarded = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok((kept, discarded));
        }
        let take = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..take]);
        discarded += n - take;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_stream_up_to_limit() {
        let data = vec![b'x'; 20_000];
        let (kept, truncated) = read_stream_limited(&data[..], 100).expect("read");
        assert_eq!(kept.len(), 100);
        assert_eq!(truncated, 19_900);
    }

    #[test]
    fn combined_appends_stderr_and_truncation_notice() {
        let output = CapturedOutput {
            exit_code: Some(1),
            stdout: b"out".to_vec(),
            stderr: b"err\n".to_vec(),
            truncated_bytes: 7,
            timed_out: false,
        };
        assert_eq!(output.combined(), "out\nerr\n\n[output truncated 7 bytes]\n");
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_code_and_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello; echo oops >&2; exit 3"]);
        let output = run_captured(cmd, Duration::from_secs(10), 1024).expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.timed_out);
        let text = output.combined();
        assert!(text.contains("hello"));
        assert!(text.contains("oops"));
    }

    #[cfg(unix)]
    #[test]
    fn kills_process_after_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 5"]);
        let output = run_captured(cmd, Duration::from_millis(200), 1024).expect("run");
        assert!(output.timed_out);
    }
}
