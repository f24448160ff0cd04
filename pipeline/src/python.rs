use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tract_core::internal::*;

/// Handle on the Python interpreter hosting torch, onnx, onnxsim, onnx2tf
/// and tensorflow. Every stage goes through the same interpreter so they all
/// see the same site-packages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Python {
    program: PathBuf,
}

impl Default for Python {
    fn default() -> Python {
        Python::new("python3")
    }
}

/// Captured streams of a finished script.
#[derive(Clone, Debug, Default)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    /// Value of the last `KEY: value` line printed on stdout.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values(key).pop()
    }

    /// Values of every `KEY: value` line, in order.
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.stdout
            .lines()
            .filter_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
            .map(str::trim)
            .collect()
    }
}

/// Last non-empty stderr line: the exception text for a Python traceback.
pub(crate) fn last_line(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

impl Python {
    pub fn new(program: impl Into<PathBuf>) -> Python {
        Python { program: program.into() }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `python -c <script> <args...>`, capturing both streams.
    pub fn run_script<I, S>(&self, label: &str, script: &str, args: I) -> TractResult<ScriptOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        debug!("Running {label} script with {:?}", self.program);
        let output = Command::new(&self.program)
            .arg("-c")
            .arg(script)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to spawn python interpreter {:?}", self.program))?;
        let output = ScriptOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
        .checked(label, output.status)?;
        Ok(output)
    }

    /// Runs `python -m <module> <args...>` on the shared console and waits
    /// for it. The exit status is returned untouched.
    pub fn run_module<I, S>(&self, module: &str, args: I) -> TractResult<ExitStatus>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.arg("-m").arg(module).args(args);
        info!("Running {command:?}");
        command
            .status()
            .with_context(|| format!("Failed to spawn python interpreter {:?}", self.program))
    }
}

impl ScriptOutput {
    fn checked(self, label: &str, status: ExitStatus) -> TractResult<ScriptOutput> {
        for line in self.stdout.lines() {
            debug!("[{label}] {line}");
        }
        for line in self.stderr.lines() {
            debug!("[{label}:err] {line}");
        }
        if !status.success() {
            let reason = last_line(&self.stderr).unwrap_or("no diagnostic on stderr");
            bail!("{label} script failed ({status}): {reason}")
        }
        Ok(self)
    }
}
