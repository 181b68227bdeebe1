//! Boundary-only adapter that runs `go test -json` for a package and
//! decodes its newline-delimited JSON event stream. Never returns a
//! `Result::Err` to the caller: failures are captured inside [`Results`],
//! per spec.md §7's "Exec errors never propagate" rule.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::snapshot::TestingPackage;

const SHELL_EXIT_ERROR_PREFIX: &str = "shell exit error: ";

/// One `go test -json` event line. Field names mirror the tool's own
/// capitalized JSON keys (`Time`, `Action`, `Package`, `Test`, `Elapsed`,
/// `Output`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestEvent {
    pub time: Option<String>,
    pub action: String,
    pub package: Option<String>,
    pub test: Option<String>,
    pub elapsed: Option<f64>,
    pub output: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Results {
    pub duration: Duration,
    pub events: Vec<TestEvent>,
    pub err: Option<String>,
}

/// Run `<tool> test -json` in `pkg`'s absolute directory, racing the child
/// against `timeout` via a [`CancellationToken`]. Combines stdout+stderr.
/// Forces the package's parse pass first so `pkg`'s cached tests/suites
/// describe exactly what this run executed.
pub async fn run(pkg: &TestingPackage, tool: &str, timeout: Duration) -> Results {
    pkg.ensure_parsed();

    let cancel = CancellationToken::new();
    let started = Instant::now();

    let mut command = Command::new(tool);
    command
        .arg("test")
        .arg("-json")
        .current_dir(&pkg.abs_path)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Results {
                duration: started.elapsed(),
                events: Vec::new(),
                err: Some(format!("{SHELL_EXIT_ERROR_PREFIX}{e}")),
            };
        }
    };

    let timeout_cancel = cancel.clone();
    let timeout_task = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        timeout_cancel.cancel();
    });

    let output_fut = collect_output(&mut child);
    tokio::pin!(output_fut);

    let output = tokio::select! {
        output = &mut output_fut => output,
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            timeout_task.abort();
            return Results {
                duration: started.elapsed(),
                events: Vec::new(),
                err: Some(format!("{SHELL_EXIT_ERROR_PREFIX}timed out after {timeout:?}")),
            };
        }
    };
    timeout_task.abort();
    finish(output, started.elapsed())
}

async fn collect_output(child: &mut tokio::process::Child) -> std::io::Result<std::process::Output> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let status = child.wait().await?;

    use tokio::io::AsyncReadExt;
    let mut out_buf = Vec::new();
    if let Some(mut out) = stdout {
        out.read_to_end(&mut out_buf).await?;
    }
    let mut err_buf = Vec::new();
    if let Some(mut err) = stderr {
        err.read_to_end(&mut err_buf).await?;
    }
    out_buf.extend(err_buf);

    Ok(std::process::Output {
        status,
        stdout: out_buf,
        stderr: Vec::new(),
    })
}

fn finish(output: std::io::Result<std::process::Output>, duration: Duration) -> Results {
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            return Results {
                duration,
                events: Vec::new(),
                err: Some(format!("{SHELL_EXIT_ERROR_PREFIX}{e}")),
            };
        }
    };

    let combined = String::from_utf8_lossy(&output.stdout);
    let mut events = Vec::new();
    for line in combined.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TestEvent>(line) {
            Ok(event) => events.push(event),
            Err(_) => continue, // tolerate non-JSON lines (build failures, panics)
        }
    }

    let err = if output.status.success() {
        None
    } else {
        Some(format!(
            "{SHELL_EXIT_ERROR_PREFIX}exit status {}",
            output.status
        ))
    };

    Results {
        duration,
        events,
        err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event_line() {
        let line = r#"{"Time":"2024-01-01T00:00:00Z","Action":"run","Package":"p","Test":"TestFoo"}"#;
        let event: TestEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.action, "run");
        assert_eq!(event.test.as_deref(), Some("TestFoo"));
    }

    #[test]
    fn shell_exit_error_has_stable_prefix() {
        let results = Results {
            duration: Duration::from_secs(0),
            events: Vec::new(),
            err: Some(format!("{SHELL_EXIT_ERROR_PREFIX}boom")),
        };
        assert!(results.err.unwrap().starts_with("shell exit error: "));
    }
}
