//! Subprocess helpers. Children inherit stdout/stderr so build output is
//! visible live.

use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment changes applied on top of the inherited environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    remove: Vec<String>,
    set: Vec<(String, String)>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any inherited `key` and set it to `value`.
    pub fn replace(mut self, key: &str, value: impl Into<String>) -> Self {
        self.remove.push(key.to_string());
        self.set.push((key.to_string(), value.into()));
        self
    }

    fn apply(&self, cmd: &mut Command) {
        for key in &self.remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.set {
            cmd.env(key, value);
        }
    }
}

/// Run `program` in `dir`, streaming its output, and fail on non-zero exit.
pub async fn run_streaming(
    program: &str,
    args: &[String],
    dir: &Path,
    env: &EnvOverlay,
) -> Result<()> {
    let line = command_line(program, args);
    info!(dir = %dir.display(), "Running {line}");
    let mut cmd = Command::new(program_path(program, dir));
    cmd.args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    env.apply(&mut cmd);
    let status = cmd
        .status()
        .await
        .map_err(|e| spawn_error(&line, e))?;
    check_status(&line, status)
}

/// Run `producer` and feed everything it writes to stdout into the stdin of
/// `consumer`, which runs in `consumer_dir`.
pub async fn run_piped(
    producer: (&str, &[String]),
    consumer: (&str, &[String]),
    consumer_dir: &Path,
) -> Result<()> {
    let (program, args) = producer;
    let producer_display = command_line(program, args);
    info!("Running {producer_display}");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| spawn_error(&producer_display, e))?;
    check_status(&producer_display, output.status)?;

    let (program, args) = consumer;
    let consumer_display = command_line(program, args);
    info!(dir = %consumer_dir.display(), "Running {consumer_display}");
    let mut child = Command::new(program)
        .args(args)
        .current_dir(consumer_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| spawn_error(&consumer_display, e))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&output.stdout)
            .await
            .map_err(|e| Error::io(format!("write to {consumer_display}"), e))?;
    }
    let status = child
        .wait()
        .await
        .map_err(|e| spawn_error(&consumer_display, e))?;
    check_status(&consumer_display, status)
}

/// Run `program` and return what it printed on stdout, trimmed.
pub async fn capture_stdout(program: &str, args: &[String]) -> Result<String> {
    let line = command_line(program, args);
    debug!("Running {line}");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| spawn_error(&line, e))?;
    check_status(&line, output.status)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

/// `./name` is relative to the directory the child runs in.
fn program_path(program: &str, dir: &Path) -> PathBuf {
    match program.strip_prefix("./") {
        Some(rest) => dir.join(rest),
        None => PathBuf::from(program),
    }
}

fn spawn_error(command: &str, e: std::io::Error) -> Error {
    Error::Subprocess {
        command: command.to_string(),
        status: format!("could not start: {e}"),
    }
}

fn check_status(command: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(Error::Subprocess {
            command: command.to_string(),
            status: status.to_string(),
        })
    }
}
