//! Helpers for running test processes while streaming their output.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Longest output line forwarded as one event.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// How a streamed child process ended.
#[derive(Debug)]
pub struct StreamedExit {
    pub status: ExitStatus,
    /// The process was killed because `abort` was raised.
    pub aborted: bool,
}

/// Run a command, passing every stdout/stderr line to `on_line` as it arrives.
///
/// Output is read on dedicated threads so the child never blocks on a full
/// pipe. `on_poll` runs every `poll_interval` while the child is alive; the
/// child is killed as soon as `abort` is observed.
#[instrument(skip_all, fields(poll_ms = poll_interval.as_millis() as u64))]
pub fn run_command_streaming<L, P>(
    mut cmd: Command,
    poll_interval: Duration,
    abort: &AtomicBool,
    on_line: L,
    mut on_poll: P,
) -> Result<StreamedExit>
where
    L: Fn(&str) + Send + Sync + 'static,
    P: FnMut(),
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let on_line = Arc::new(on_line);
    let stdout_sink = Arc::clone(&on_line);
    let stdout_handle =
        thread::spawn(move || read_lines(stdout, MAX_LINE_BYTES, stdout_sink.as_ref()));
    let stderr_sink = Arc::clone(&on_line);
    let stderr_handle =
        thread::spawn(move || read_lines(stderr, MAX_LINE_BYTES, stderr_sink.as_ref()));

    let mut aborted = false;
    let status = loop {
        if abort.load(Ordering::SeqCst) {
            warn!("abort requested, killing");
            aborted = true;
            child.kill().context("kill command")?;
            break child.wait().context("wait command after kill")?;
        }
        match child
            .wait_timeout(poll_interval)
            .context("wait for command")?
        {
            Some(status) => break status,
            None => on_poll(),
        }
    };

    join_reader(stdout_handle).context("join stdout")?;
    join_reader(stderr_handle).context("join stderr")?;

    debug!(exit_code = ?status.code(), aborted, "command finished");
    Ok(StreamedExit { status, aborted })
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Forward each non-empty line of `reader` to `sink`, lossily decoded.
///
/// Lines longer than `limit` bytes are cut; the dropped byte count is
/// appended to the forwarded text.
fn read_lines<R: Read>(
    reader: R,
    limit: usize,
    sink: &(dyn Fn(&str) + Send + Sync),
) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut truncated = 0usize;
    loop {
        let available = buf_reader.fill_buf().context("read output")?;
        if available.is_empty() {
            break;
        }
        let (chunk, ends_line) = match available.iter().position(|&byte| byte == b'\n') {
            Some(end) => (&available[..end], true),
            None => (available, false),
        };
        let keep = chunk.len().min(limit.saturating_sub(line.len()));
        line.extend_from_slice(&chunk[..keep]);
        truncated += chunk.len() - keep;
        let consumed = chunk.len() + usize::from(ends_line);
        buf_reader.consume(consumed);

        if ends_line {
            emit_line(&line, truncated, sink);
            line.clear();
            truncated = 0;
        }
    }
    emit_line(&line, truncated, sink);
    Ok(())
}

fn emit_line(line: &[u8], truncated: usize, sink: &(dyn Fn(&str) + Send + Sync)) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end();
    if truncated > 0 {
        sink(&format!("{text} [truncated {truncated} bytes]"));
    } else if !text.is_empty() {
        sink(text);
    }
}
