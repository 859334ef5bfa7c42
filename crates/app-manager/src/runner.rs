//! Payload process handle
//!
//! Owns the spawned payload: its standard streams, signal delivery and
//! preemptive termination. Stdout ownership is exclusive to the
//! application manager holding this handle.

use crate::error::{Error, Result};
use async_process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use control_core::ActionConfig;
use control_fabric::shutdown::GracePeriod;
use futures_lite::future;
use futures_lite::io::AsyncWriteExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A handle to the running payload process.
pub struct PayloadHandle {
    child: Child,
}

impl PayloadHandle {
    /// Spawn the payload with captured standard streams.
    ///
    /// Arguments are whitespace-stripped; arguments that are empty
    /// after stripping are dropped. Output buffering is disabled for
    /// script payloads via the environment.
    pub fn spawn(action: &ActionConfig, extra_args: &[String]) -> Result<Self> {
        let program = action.program.trim();
        if program.is_empty() {
            return Err(Error::LaunchFailed {
                reason: "empty program".to_string(),
            });
        }
        let mut args = action.stripped_args();
        args.extend(
            extra_args
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        );

        debug!("launching {:?} with {:?}", program, args);
        let mut command = Command::new(program);
        command
            .args(&args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = command.spawn().map_err(|e| Error::LaunchFailed {
            reason: e.to_string(),
        })?;
        info!("payload {:?} launched with pid {}", action.name, child.id());
        Ok(Self { child })
    }

    /// PID of the payload process itself.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Take ownership of the stdout stream.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr stream.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Write one line to the payload's stdin and flush.
    pub async fn write_stdin_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.child.stdin.as_mut().ok_or(Error::LaunchFailed {
            reason: "payload stdin is not captured".to_string(),
        })?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Exit status if the payload already finished.
    pub fn try_status(&mut self) -> Result<Option<std::process::ExitStatus>> {
        Ok(self.child.try_status()?)
    }

    /// Block until the payload finishes.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        Ok(self.child.status().await?)
    }

    /// Send SIGTERM to the payload.
    pub fn terminate(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;
            signal::kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM)
                .map_err(|e| Error::LaunchFailed {
                    reason: format!("SIGTERM failed: {e}"),
                })?;
        }
        Ok(())
    }

    /// Send SIGKILL to the payload.
    pub fn kill(&mut self) -> Result<()> {
        self.child.kill()?;
        Ok(())
    }

    /// Terminate the payload preemptively: SIGTERM, a bounded graceful
    /// wait, then SIGKILL with a further bounded wait. A payload that
    /// survives both is reported as unkillable.
    pub async fn stop_preemptory(&mut self, grace: GracePeriod) -> Result<()> {
        const KILL_WAIT: Duration = Duration::from_secs(1);

        if self.try_status()?.is_some() {
            return Ok(());
        }
        let pid = self.pid();
        info!("signalling payload {} to terminate", pid);
        self.terminate()?;
        if grace.is_graceful() && self.wait_bounded(grace.0).await?.is_some() {
            return Ok(());
        }

        warn!("payload {} ignored SIGTERM, killing", pid);
        self.kill()?;
        if self.wait_bounded(KILL_WAIT).await?.is_some() {
            return Ok(());
        }
        Err(Error::Unkillable { pid })
    }

    async fn wait_bounded(&mut self, timeout: Duration) -> Result<Option<std::process::ExitStatus>> {
        let status = future::or(
            async { Some(self.child.status().await) },
            async {
                smol::Timer::after(timeout).await;
                None
            },
        )
        .await;
        match status {
            None => Ok(None),
            Some(Ok(status)) => Ok(Some(status)),
            Some(Err(e)) => Err(e.into()),
        }
    }
}
