//! Process boundary. Every external tool (docker, trivy, crane, analyzers,
//! nmap, CATS) is launched through a [`CommandRunner`] so orchestration code
//! never touches `std::process` directly and tests can script the tools.
//!
//! Invocations are synchronous with captured output and no timeout: a hung
//! tool hangs its caller.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{AuditError, Result};

/// A single external program invocation. Arguments are passed verbatim;
/// nothing goes through a host shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
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

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Space-joined command line, for logs only.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn from_output(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Launches external programs.
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion, capturing both streams.
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;

    /// Run `producer | consumer`. The returned output carries the consumer's
    /// streams; the exit code is the producer's if it failed, else the
    /// consumer's.
    fn run_piped(&self, producer: &Invocation, consumer: &Invocation) -> Result<ToolOutput>;
}

/// [`CommandRunner`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        tracing::debug!(command = %invocation.display(), "running");
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(invocation, e))?;
        Ok(ToolOutput::from_output(output))
    }

    fn run_piped(&self, producer: &Invocation, consumer: &Invocation) -> Result<ToolOutput> {
        tracing::debug!(
            command = %format!("{} | {}", producer.display(), consumer.display()),
            "running pipeline"
        );
        let mut first = producer
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(producer, e))?;

        let pipe = first.stdout.take().ok_or_else(|| {
            AuditError::Io(std::io::Error::other(format!(
                "no stdout pipe for {}",
                producer.program
            )))
        })?;

        let second = consumer
            .to_command()
            .stdin(Stdio::from(pipe))
            .output()
            .map_err(|e| spawn_error(consumer, e));
        let second = match second {
            Ok(output) => output,
            Err(e) => {
                let _ = first.kill();
                let _ = first.wait();
                return Err(e);
            }
        };

        let mut producer_stderr = String::new();
        if let Some(mut err) = first.stderr.take() {
            let _ = err.read_to_string(&mut producer_stderr);
        }
        let status = first.wait()?;

        let mut output = ToolOutput::from_output(second);
        if !status.success() {
            output.code = status.code();
            output.stderr = format!("{}{}", producer_stderr, output.stderr);
        }
        Ok(output)
    }
}

fn spawn_error(invocation: &Invocation, err: std::io::Error) -> AuditError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AuditError::ToolMissing {
            tool: invocation.program.clone(),
            source: err,
        }
    } else {
        AuditError::Io(err)
    }
}

/// Scripted runner for tests: responses are matched on program name and
/// argument prefix, every invocation is recorded.
#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    type Responder = Box<dyn Fn(&Invocation) -> ToolOutput + Send + Sync>;

    struct Rule {
        program: String,
        prefix: Vec<String>,
        respond: Responder,
    }

    #[derive(Default)]
    pub struct FakeRunner {
        rules: Vec<Rule>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer invocations of `program` whose arguments start with `prefix`.
        pub fn on(self, program: &str, prefix: &[&str], output: ToolOutput) -> Self {
            self.on_with(program, prefix, move |_| output.clone())
        }

        /// Like [`FakeRunner::on`], with a closure that may inspect the
        /// invocation or write the files the real tool would produce.
        pub fn on_with<F>(mut self, program: &str, prefix: &[&str], respond: F) -> Self
        where
            F: Fn(&Invocation) -> ToolOutput + Send + Sync + 'static,
        {
            self.rules.push(Rule {
                program: program.to_string(),
                prefix: prefix.iter().map(|s| s.to_string()).collect(),
                respond: Box::new(respond),
            });
            self
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
            self.calls()
                .into_iter()
                .filter(|c| c.program == program)
                .collect()
        }

        fn answer(&self, invocation: &Invocation) -> ToolOutput {
            self.calls.lock().unwrap().push(invocation.clone());
            self.rules
                .iter()
                .find(|r| {
                    r.program == invocation.program
                        && invocation.args.len() >= r.prefix.len()
                        && r.prefix.iter().zip(&invocation.args).all(|(p, a)| p == a)
                })
                .map(|r| (r.respond)(invocation))
                .unwrap_or_else(|| ToolOutput::ok(""))
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
            Ok(self.answer(invocation))
        }

        fn run_piped(&self, producer: &Invocation, consumer: &Invocation) -> Result<ToolOutput> {
            let first = self.answer(producer);
            if !first.success() {
                return Ok(first);
            }
            Ok(self.answer(consumer))
        }
    }
}
