//! Line-streaming subprocess runner shared by the extraction and transcode tools.

use super::ToolError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Something observed while a tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent<'a> {
    Stdout(&'a str),
    Stderr(&'a str),
    /// Periodic wake-up, for polling that doesn't depend on output.
    Tick,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub tick: Option<Duration>,
}

enum Exit {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Stdout,
    Stderr,
}

/// Map a spawn failure; a missing binary gets its own variant.
pub fn spawn_error(program: &str, e: std::io::Error) -> ToolError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ToolError::NotFound(program.to_string())
    } else {
        ToolError::Io(e)
    }
}

/// Spawn `cmd` and feed every stdout/stderr line to `on_event` until it exits.
///
/// The child is killed when `cancel` fires or the timeout elapses. A non-zero
/// exit is reported as [`ToolError::Failed`].
pub async fn run_streaming<F>(
    mut cmd: Command,
    cancel: &CancellationToken,
    options: RunOptions,
    mut on_event: F,
) -> Result<(), ToolError>
where
    F: FnMut(ProcessEvent<'_>),
{
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled(program));
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| spawn_error(&program, e))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, Source::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, Source::Stderr, tx.clone()));
    }
    drop(tx);

    let deadline = options.timeout.map(|t| Instant::now() + t);
    let mut ticker = options.tick.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let mut streams_open = true;
    while streams_open {
        tokio::select! {
            _ = cancel.cancelled() => {
                terminate(&mut child, &program).await;
                return Err(ToolError::Cancelled(program));
            }
            _ = wait_for_deadline(deadline) => {
                terminate(&mut child, &program).await;
                return Err(timeout_error(program, options.timeout));
            }
            _ = next_tick(&mut ticker) => on_event(ProcessEvent::Tick),
            line = rx.recv() => match line {
                Some((Source::Stdout, text)) => on_event(ProcessEvent::Stdout(&text)),
                Some((Source::Stderr, text)) => on_event(ProcessEvent::Stderr(&text)),
                None => streams_open = false,
            },
        }
    }

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Exit::Cancelled,
        _ = wait_for_deadline(deadline) => Exit::TimedOut,
        status = child.wait() => Exit::Exited(status),
    };
    let status = match outcome {
        Exit::Exited(status) => status?,
        Exit::Cancelled => {
            terminate(&mut child, &program).await;
            return Err(ToolError::Cancelled(program));
        }
        Exit::TimedOut => {
            terminate(&mut child, &program).await;
            return Err(timeout_error(program, options.timeout));
        }
    };

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(ToolError::Failed { program, code }),
            None => Err(ToolError::Terminated(program)),
        }
    }
}

fn timeout_error(program: String, timeout: Option<Duration>) -> ToolError {
    ToolError::Timeout {
        program,
        secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
    }
}

async fn terminate(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        debug!("Failed to kill {}: {}", program, e);
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn forward_lines<R>(reader: R, source: Source, tx: mpsc::UnboundedSender<(Source, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                if tx
                    .send((source, text.trim_end_matches('\r').to_string()))
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading {:?}: {}", source, e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_lines_from_both_streams() {
        let cancel = CancellationToken::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        run_streaming(
            sh("printf 'one\\ntwo\\r\\n'; echo oops >&2"),
            &cancel,
            RunOptions::default(),
            |event| match event {
                ProcessEvent::Stdout(line) => stdout.push(line.to_string()),
                ProcessEvent::Stderr(line) => stderr.push(line.to_string()),
                ProcessEvent::Tick => {}
            },
        )
        .await
        .unwrap();

        assert_eq!(stdout, vec!["one", "two"]);
        assert_eq!(stderr, vec!["oops"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let cancel = CancellationToken::new();
        let result = run_streaming(sh("exit 3"), &cancel, RunOptions::default(), |_| {}).await;
        assert!(matches!(result, Err(ToolError::Failed { code: 3, .. })));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let cancel = CancellationToken::new();
        let cmd = Command::new("definitely-not-a-real-tool-7f3a");
        let result = run_streaming(cmd, &cancel, RunOptions::default(), |_| {}).await;
        assert!(matches!(result, Err(ToolError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = run_streaming(sh("sleep 30"), &cancel, RunOptions::default(), |_| {}).await;
        assert!(matches!(result, Err(ToolError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let cmd = Command::new("definitely-not-a-real-tool-7f3a");
        let result = run_streaming(cmd, &cancel, RunOptions::default(), |_| {}).await;
        assert!(matches!(result, Err(ToolError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let cancel = CancellationToken::new();
        let options = RunOptions {
            timeout: Some(Duration::from_millis(100)),
            tick: None,
        };
        let result = run_streaming(sh("sleep 30"), &cancel, options, |_| {}).await;
        assert!(matches!(result, Err(ToolError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_ticks_while_silent() {
        let cancel = CancellationToken::new();
        let options = RunOptions {
            timeout: None,
            tick: Some(Duration::from_millis(20)),
        };
        let mut ticks = 0;
        run_streaming(sh("sleep 0.3"), &cancel, options, |event| {
            if event == ProcessEvent::Tick {
                ticks += 1;
            }
        })
        .await
        .unwrap();
        assert!(ticks >= 2, "expected several ticks, got {}", ticks);
    }
}
