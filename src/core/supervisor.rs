//! Child process supervision
//!
//! The child inherits the invoker's stdin, stdout and stderr, so its streams
//! never pass through this process. Exit is observed in two steps: `await_exit`
//! blocks until the child has terminated but leaves it unreaped, and `wait`
//! reaps it. Between the two the pid cannot be handed to another process.

use crate::core::constants::exit_codes;
use crate::error::{PeakError, Result};
use log::debug;
use serde::Serialize;
use std::ffi::OsString;
use std::process::{Child, Command, Stdio};
use std::time::SystemTime;

/// Program and arguments, passed through without shell expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a full argv into program and arguments
    pub fn from_argv(argv: Vec<OsString>) -> Result<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next().ok_or_else(|| {
            PeakError::InvalidConfiguration("Command cannot be empty".to_string())
        })?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }

    /// Lossy rendering for messages and reports
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How the child terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Code(i32),
    Signal(i32),
}

impl ExitStatus {
    /// Exit code the supervisor should pass on
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitStatus::Code(code) => *code,
            ExitStatus::Signal(signal) => exit_codes::SIGNAL_BASE + signal,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Code(status.code().unwrap_or(1))
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {}", code),
            ExitStatus::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Exited(ExitStatus),
}

/// A spawned command
pub struct ChildProcess {
    child: Child,
    pid: u32,
    started_at: SystemTime,
    state: ChildState,
}

impl ChildProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn state(&self) -> ChildState {
        self.state
    }

    /// Block until the child has terminated, leaving it as a zombie so its
    /// pid stays reserved.
    #[cfg(unix)]
    pub fn await_exit(&mut self) -> Result<ExitStatus> {
        if let ChildState::Exited(status) = self.state {
            return Ok(status);
        }

        loop {
            // SAFETY: siginfo_t is plain data and all-zero is a valid value
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            // SAFETY: `info` outlives the call; WNOWAIT leaves the child reapable
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    self.pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                // SAFETY: waitid filled in a SIGCHLD record
                let raw = unsafe { info.si_status() };
                let status = if info.si_code == libc::CLD_EXITED {
                    ExitStatus::Code(raw)
                } else {
                    ExitStatus::Signal(raw)
                };
                debug!("child {} exited with {}, not yet reaped", self.pid, status);
                self.state = ChildState::Exited(status);
                return Ok(status);
            }

            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
    }

    /// Without waitid the child is reaped here, before the final sample.
    #[cfg(not(unix))]
    pub fn await_exit(&mut self) -> Result<ExitStatus> {
        if let ChildState::Exited(status) = self.state {
            return Ok(status);
        }
        let status = ExitStatus::from(self.child.wait()?);
        self.state = ChildState::Exited(status);
        Ok(status)
    }

    /// Reap the child and return its status. Consumes the handle, so it can
    /// only happen once.
    pub fn wait(mut self) -> Result<ExitStatus> {
        // std caches the status if await_exit already reaped
        let status = ExitStatus::from(self.child.wait()?);
        debug!("child {} reaped with {}", self.pid, status);
        Ok(status)
    }
}

/// Spawns commands with inherited stdio
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn spawn(command: &CommandSpec) -> Result<ChildProcess> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| PeakError::Spawn {
                program: command.program.to_string_lossy().into_owned(),
                source,
            })?;

        let pid = child.id();
        debug!("spawned '{}' as pid {}", command.display(), pid);

        Ok(ChildProcess {
            child,
            pid,
            started_at: SystemTime::now(),
            state: ChildState::Running,
        })
    }
}
