//! Child processes as cancellable calls.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use cpc_core::{CpcError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::timeout::Cancellable;

/// Lines kept from stderr when building an error message.
const STDERR_TAIL_LINES: usize = 20;

/// Program, arguments and child-only environment for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Set on the child only; the parent environment is never modified
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Command line for logs. Environment values are not shown.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    pub fn spawn(&self) -> Result<ChildProcess> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => CpcError::config_with_hint(
                format!("Required command '{}' not found", self.program),
                format!("Install {} or set its path in config.yaml", self.program),
            ),
            _ => CpcError::execution(format!("Failed to start '{}': {e}", self.display())),
        })?;
        debug!(command = %self.display(), pid = child.id(), "Spawned process");

        let stdout = child.stdout.take().map(|out| collect_lines(out, "stdout"));
        let stderr = child.stderr.take().map(|err| collect_lines(err, "stderr"));

        Ok(ChildProcess {
            label: self.display(),
            child,
            stdout,
            stderr,
            output: None,
        })
    }
}

fn collect_lines<R>(reader: R, stream: &'static str) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut collected = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            trace!(stream, "{line}");
            collected.push(line);
        }
        collected
    })
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into an Execution error carrying the stderr tail.
    pub fn into_result(self, operation: &str) -> Result<ProcessOutput> {
        if self.success() {
            return Ok(self);
        }
        let tail: Vec<&str> = self
            .stderr
            .lines()
            .rev()
            .take(STDERR_TAIL_LINES)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let mut context = BTreeMap::new();
        context.insert("operation".to_string(), operation.to_string());
        if !tail.is_empty() {
            context.insert("stderr".to_string(), tail.join("\n"));
        }
        let status = match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };
        Err(CpcError::Execution {
            message: format!("{operation} failed with {status}"),
            exit_code: self.exit_code,
            context,
        })
    }
}

/// A running child process.
#[derive(Debug)]
pub struct ChildProcess {
    label: String,
    child: Child,
    stdout: Option<JoinHandle<Vec<String>>>,
    stderr: Option<JoinHandle<Vec<String>>>,
    output: Option<ProcessOutput>,
}

impl ChildProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn drain(handle: Option<JoinHandle<Vec<String>>>) -> String {
        match handle {
            Some(handle) => handle.await.unwrap_or_default().join("\n"),
            None => String::new(),
        }
    }
}

#[async_trait]
impl Cancellable for ChildProcess {
    type Output = ProcessOutput;

    async fn wait(&mut self) -> Result<ProcessOutput> {
        if let Some(output) = &self.output {
            return Ok(output.clone());
        }
        // `Child::wait` is cancel-safe; the reader tasks are only taken once
        // the exit status is known.
        let status = self.child.wait().await?;
        let stdout = Self::drain(self.stdout.take()).await;
        let stderr = Self::drain(self.stderr.take()).await;
        debug!(command = %self.label, code = ?status.code(), "Process exited");

        let output = ProcessOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        };
        self.output = Some(output.clone());
        Ok(output)
    }

    async fn cancel(&mut self) -> Result<()> {
        if self.output.is_some() {
            return Ok(());
        }
        debug!(command = %self.label, "Killing process");
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped.
            Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
