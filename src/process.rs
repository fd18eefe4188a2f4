//! Supervision of a single long-running yt-dlp process.
//!
//! stdout and stderr are drained by two reader tasks that forward lines over a
//! channel; the caller's handler runs on the supervising task, so it gets
//! exclusive access to whatever it captures without extra locking. Each
//! stream's own line order is preserved, nothing is promised across streams.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;

/// How many trailing stderr lines are kept as failure context.
const ERROR_CONTEXT_LINES: usize = 5;

/// How long buffered output is drained after the child has exited.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// Starts `program` with `args` and feeds every output line to `on_line`
/// until the process exits.
///
/// When `cancel` fires, the process group is asked to terminate (SIGTERM on
/// unix) and the call returns [`RunError::Cancelled`] once the child has
/// exited. Output still buffered at exit is delivered, but helpers that keep
/// the pipes open past [`DRAIN_GRACE`] are not waited for.
pub async fn run<S, I, F>(
    program: S,
    args: I,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<(), RunError>
where
    S: AsRef<OsStr>,
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
    F: FnMut(&OutputLine),
{
    let program_name = program.as_ref().to_string_lossy().into_owned();
    let mut command = Command::new(program.as_ref());
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| RunError::NotStarted {
        program: program_name.clone(),
        source,
    })?;
    debug!("started {program_name} (pid {:?})", child.id());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, StreamKind::Stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, StreamKind::Stderr, tx.clone())));
    }
    drop(tx);

    let mut error_context: VecDeque<String> = VecDeque::with_capacity(ERROR_CONTEXT_LINES);
    let mut deliver = |line: OutputLine| {
        if line.stream == StreamKind::Stderr && !line.text.trim().is_empty() {
            if error_context.len() == ERROR_CONTEXT_LINES {
                error_context.pop_front();
            }
            error_context.push_back(line.text.trim().to_owned());
        }
        on_line(&line);
    };

    let mut streams_open = true;
    let mut cancel_requested = false;
    let status = loop {
        tokio::select! {
            line = rx.recv(), if streams_open => match line {
                Some(line) => deliver(line),
                None => streams_open = false,
            },
            status = child.wait() => break status?,
            _ = cancel.cancelled(), if !cancel_requested => {
                info!("cancellation requested, terminating {program_name}");
                request_termination(&mut child);
                cancel_requested = true;
            }
        }
    };

    if streams_open {
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some(line) = rx.recv().await {
                deliver(line);
            }
        })
        .await;
        if drained.is_err() {
            warn!("{program_name} exited but its output pipes are still held open; not waiting");
        }
    }
    for reader in readers {
        reader.abort();
    }

    if cancel_requested {
        return Err(RunError::Cancelled);
    }
    if status.success() {
        return Ok(());
    }
    Err(RunError::Exited {
        program: program_name,
        status: status.to_string(),
        context: Vec::from(error_context).join("\n"),
    })
}

async fn forward_lines<R>(reader: R, stream: StreamKind, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(text)) => {
                if tx.send(OutputLine { stream, text }).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("stopped reading {stream:?}: {err}");
                break;
            }
        }
    }
}

/// Asks the child and everything it spawned (ffmpeg, for one) to exit.
/// The child leads its own process group, so SIGTERM goes to the group;
/// platforms without signals fall back to a kill.
fn request_termination(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match i32::try_from(pid) {
                Ok(raw) => {
                    if let Err(err) = killpg(Pid::from_raw(raw), Signal::SIGTERM) {
                        warn!("failed to send SIGTERM to process group {pid}: {err}");
                    }
                    return;
                }
                Err(_) => warn!("pid {pid} out of range for signal delivery"),
            }
        }
    }

    if let Err(err) = child.start_kill() {
        warn!("failed to terminate child process: {err}");
    }
}
