//! External command execution.
//!
//! Builds and archive tools run through a [`SandboxedExecutor`]. The installer decides
//! whether a command should be sandboxed; the executor owns how. [`SystemExecutor`] runs
//! commands with `std::process`, optionally prefixing them with a sandbox wrapper argv
//! (e.g. `sandbox-exec -f profile.sb`), and captures stdout and stderr line by line in
//! arrival order so failures can be reported with the output interleaved.

use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

/// Environment variable the sandbox wrapper reads its writable paths from
pub const SANDBOX_WRITABLE_ENV: &str = "HOMEBREW_SANDBOX_WRITABLE";

/// Environment variable holding the sandbox wrapper argv, whitespace separated
pub const SANDBOX_WRAPPER_ENV: &str = "HOMEBREW_SANDBOX_WRAPPER";

/// Lines from unrelated subsystems that only clutter failure reports
const NOISE_MARKERS: &[&str] = &[
    "is implemented in both",
    "dyld: warning",
    "xcrun: error: invalid active developer path",
];

/// Environment-style assignments whose values are masked in failure reports
const SECRET_KEYS: &[&str] = &["TOKEN=", "PASSWORD=", "SECRET="];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// A command to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub sandbox: bool,
    /// Paths the sandbox must allow writes to
    pub writable: Vec<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn sandboxed(mut self, writable: Vec<PathBuf>) -> Self {
        self.sandbox = true;
        self.writable = writable;
        self
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub lines: Vec<OutputLine>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout(&self) -> String {
        self.collect(Stream::Stdout)
    }

    pub fn stderr(&self) -> String {
        self.collect(Stream::Stderr)
    }

    fn collect(&self, stream: Stream) -> String {
        self.lines
            .iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs external commands, sandboxed when asked to
pub trait SandboxedExecutor: Send + Sync {
    fn exec(&self, cmd: &CommandSpec) -> std::io::Result<ExecOutput>;
}

/// A command that could not be started or exited unsuccessfully
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ExecutionError {
    pub argv: Vec<String>,
    pub status: Option<i32>,
    pub output: Vec<OutputLine>,
}

impl ExecutionError {
    /// Output lines worth showing, noise removed and secrets masked
    pub fn relevant_output(&self) -> Vec<String> {
        self.output
            .iter()
            .filter(|line| !is_noise(&line.text))
            .map(|line| redact(&line.text))
            .collect()
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = self.argv.join(" ");
        match self.status {
            Some(code) => write!(f, "Failure while executing; `{}` exited with {}.", command, code)?,
            None => write!(f, "Failure while executing; `{}` did not exit cleanly.", command)?,
        }

        let output = self.relevant_output();
        if !output.is_empty() {
            write!(f, " Here's the output:\n{}", output.join("\n"))?;
        }
        Ok(())
    }
}

fn is_noise(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("objc[") && NOISE_MARKERS.iter().any(|m| trimmed.contains(m))
        || NOISE_MARKERS[1..].iter().any(|m| trimmed.starts_with(m))
}

fn redact(line: &str) -> String {
    line.split(' ')
        .map(|word| {
            match SECRET_KEYS
                .iter()
                .find_map(|key| word.find(key).map(|idx| idx + key.len()))
            {
                Some(end) if end < word.len() => format!("{}******", &word[..end]),
                _ => word.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `cmd` and turn spawn failures and non-zero exits into [`ExecutionError`]
pub fn run_checked(
    executor: &dyn SandboxedExecutor,
    cmd: &CommandSpec,
) -> Result<ExecOutput, ExecutionError> {
    tracing::debug!("Running {}", cmd.argv.join(" "));

    let output = executor.exec(cmd).map_err(|e| ExecutionError {
        argv: cmd.argv.clone(),
        status: None,
        output: vec![OutputLine {
            stream: Stream::Stderr,
            text: e.to_string(),
        }],
    })?;

    if output.success() {
        Ok(output)
    } else {
        Err(ExecutionError {
            argv: cmd.argv.clone(),
            status: output.status,
            output: output.lines,
        })
    }
}

/// Runs commands on the host with `std::process`
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor {
    sandbox_wrapper: Option<Vec<String>>,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix sandboxed commands with `wrapper`
    pub fn with_sandbox(wrapper: Vec<String>) -> Self {
        Self {
            sandbox_wrapper: Some(wrapper).filter(|w| !w.is_empty()),
        }
    }

    pub fn can_sandbox(&self) -> bool {
        self.sandbox_wrapper.is_some()
    }

    /// Sandboxed commands never run without the wrapper
    fn command_line(&self, cmd: &CommandSpec) -> std::io::Result<Vec<String>> {
        match (&self.sandbox_wrapper, cmd.sandbox) {
            (Some(wrapper), true) => Ok(wrapper.iter().chain(&cmd.argv).cloned().collect()),
            (None, true) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!(
                    "sandbox requested for `{}` but no sandbox wrapper is configured (set {})",
                    cmd.argv.join(" "),
                    SANDBOX_WRAPPER_ENV
                ),
            )),
            (_, false) => Ok(cmd.argv.clone()),
        }
    }
}

impl SandboxedExecutor for SystemExecutor {
    fn exec(&self, cmd: &CommandSpec) -> std::io::Result<ExecOutput> {
        let argv = self.command_line(cmd)?;
        let Some((program, args)) = argv.split_first() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        if cmd.sandbox && self.sandbox_wrapper.is_some() {
            let writable: Vec<String> = cmd
                .writable
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            command.env(SANDBOX_WRITABLE_ENV, writable.join(":"));
        }

        let mut child = command.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let lines = Mutex::new(Vec::new());
        let sink = &lines;
        std::thread::scope(|s| {
            if let Some(out) = stdout {
                s.spawn(move || capture(out, Stream::Stdout, sink));
            }
            if let Some(err) = stderr {
                s.spawn(move || capture(err, Stream::Stderr, sink));
            }
        });

        let status = child.wait()?;
        Ok(ExecOutput {
            status: status.code(),
            lines: lines.into_inner().unwrap_or_else(PoisonError::into_inner),
        })
    }
}

fn capture(reader: impl Read, stream: Stream, sink: &Mutex<Vec<OutputLine>>) {
    for text in BufReader::new(reader).lines().map_while(Result::ok) {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(OutputLine { stream, text });
    }
}
