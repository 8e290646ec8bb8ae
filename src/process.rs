use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{FcError, FcResult};

#[must_use]
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Run `program` to completion, killing it once `timeout` elapses.
///
/// Stdout and stderr are drained on helper threads so a chatty child can
/// never wedge on a full pipe while we poll for its exit.
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> FcResult<Output> {
    if !command_exists(program) {
        return Err(FcError::CommandMissing {
            command: program.to_owned(),
        });
    }

    let rendered = render_command(program, args);
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let started_at = Instant::now();
    let stdout_rx = drain_pipe(child.stdout.take());
    let stderr_rx = drain_pipe(child.stderr.take());

    loop {
        if let Some(status) = child.try_wait()? {
            let stdout = stdout_rx
                .recv_timeout(Duration::from_millis(100))
                .unwrap_or_default();
            let stderr = stderr_rx
                .recv_timeout(Duration::from_millis(100))
                .unwrap_or_default();
            return validate_command_output(
                &rendered,
                Output {
                    status,
                    stdout,
                    stderr,
                },
            );
        }

        if started_at.elapsed() >= timeout {
            kill_and_reap(&mut child);
            let stderr = stderr_rx
                .recv_timeout(Duration::from_millis(100))
                .unwrap_or_default();
            return Err(FcError::from_command_timeout(
                rendered,
                saturating_duration_ms(timeout),
                String::from_utf8_lossy(&stderr).into_owned(),
            ));
        }

        thread::sleep(Duration::from_millis(20));
    }
}

/// Read a child pipe to completion on a helper thread.
///
/// A missing pipe yields an empty buffer.
pub(crate) fn drain_pipe<R>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Kill a child if it is still running and reap it. Errors are ignored: the
/// process may already have exited.
pub(crate) fn kill_and_reap(child: &mut Child) {
    if matches!(child.try_wait(), Ok(None)) {
        let _ = child.kill();
    }
    let _ = child.wait();
}

pub(crate) fn render_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_owned()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn validate_command_output(rendered: &str, output: Output) -> FcResult<Output> {
    if output.status.success() {
        return Ok(output);
    }
    let status = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Err(FcError::from_command_failure(
        rendered.to_owned(),
        status,
        stderr,
    ))
}

fn saturating_duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
