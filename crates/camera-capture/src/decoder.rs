//! Decoder subprocess supervision
//!
//! Spawns the decoder in its own process group with stdout piped for raw
//! frames and stderr teed into the log ring. Decoder death is not fatal;
//! the capture supervisor above decides when to restart.

use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};
use crate::ffmpeg::DecoderCommand;
use crate::log_ring::LogRing;

/// Grace given to a terminating decoder before escalating to SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

const REAP_POLL: Duration = Duration::from_millis(100);

/// A running decoder. The stdout pipe is taken by the frame collector.
pub struct DecoderProcess {
    child: Child,
}

impl DecoderProcess {
    pub fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    /// Takes the raw frame pipe. Valid once per process.
    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child.stdout.take().ok_or(CaptureError::MissingStdout)
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

pub struct DecoderSupervisor {
    camera: String,
    ring: LogRing,
}

impl DecoderSupervisor {
    pub fn new(camera: &str) -> Self {
        Self {
            camera: camera.to_string(),
            ring: LogRing::new(camera),
        }
    }

    /// Spawns a new decoder in its own process group. stderr goes to the
    /// ring; stdout is piped for the collector.
    pub fn start(&mut self, command: &DecoderCommand) -> Result<DecoderProcess> {
        info!(camera = %self.camera, "starting decoder: {}", command.display());

        let mut child = {
            use std::os::unix::process::CommandExt;
            Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .process_group(0)
                .spawn()
                .map_err(CaptureError::Spawn)?
        };

        if let Some(stderr) = child.stderr.take() {
            self.ring.attach(stderr);
        }

        debug!(camera = %self.camera, pid = child.id(), "decoder started");
        Ok(DecoderProcess { child })
    }

    /// Terminates the decoder: SIGTERM, up to `grace`, then SIGKILL. The
    /// process is always reaped before returning.
    pub fn stop(&mut self, process: &mut DecoderProcess, grace: Duration) {
        let pid = process.pid();
        info!(camera = %self.camera, pid, "stopping decoder");

        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(camera = %self.camera, pid, "SIGTERM failed: {e}");
        }

        let deadline = Instant::now() + grace;
        loop {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(camera = %self.camera, pid, "decoder exited: {status}");
                    break;
                }
                Ok(None) if Instant::now() >= deadline => {
                    warn!(camera = %self.camera, pid, "decoder ignored SIGTERM, killing");
                    let _ = process.child.kill();
                    let _ = process.child.wait();
                    break;
                }
                Ok(None) => std::thread::sleep(REAP_POLL),
                Err(e) => {
                    warn!(camera = %self.camera, pid, "failed to reap decoder: {e}");
                    break;
                }
            }
        }

        // stderr hit EOF once the process died; drain the tee thread.
        self.ring.join_reader();
    }

    /// Stops the old decoder, if any, and starts a new one. Equivalent to
    /// [`DecoderSupervisor::start`] when `old` is `None`.
    pub fn restart(
        &mut self,
        command: &DecoderCommand,
        old: Option<DecoderProcess>,
    ) -> Result<DecoderProcess> {
        if let Some(mut old) = old {
            self.stop(&mut old, STOP_GRACE);
        }
        self.start(command)
    }

    /// Flushes the stderr ring to the system log at WARN.
    pub fn dump_log(&self) {
        self.ring.dump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn shell(script: &str) -> DecoderCommand {
        DecoderCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn stdout_and_stderr_are_routed() {
        let mut supervisor = DecoderSupervisor::new("test");
        let mut process = supervisor
            .start(&shell("printf frames; printf 'oops\\n' >&2"))
            .unwrap();

        let mut out = String::new();
        process.take_stdout().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "frames");

        supervisor.stop(&mut process, Duration::from_secs(1));
        assert_eq!(supervisor.ring.len(), 1);
    }

    #[test]
    fn stop_escalates_to_kill() {
        let mut supervisor = DecoderSupervisor::new("test");
        // Ignore SIGTERM so only SIGKILL ends it.
        let mut process = supervisor
            .start(&shell("trap '' TERM; sleep 60"))
            .unwrap();
        assert!(process.is_running());

        let started = Instant::now();
        supervisor.stop(&mut process, Duration::from_millis(300));
        assert!(!process.is_running());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn restart_replaces_the_process() {
        let mut supervisor = DecoderSupervisor::new("test");
        let first = supervisor.start(&shell("sleep 60")).unwrap();
        let first_pid = first.pid();
        let mut second = supervisor
            .restart(&shell("sleep 60"), Some(first))
            .unwrap();
        assert_ne!(second.pid(), first_pid);
        supervisor.stop(&mut second, Duration::from_secs(1));
    }
}
