//! Command channels: local shell and OpenSSH client subprocesses
//!
//! Every command is its own subprocess in its own process group. Output
//! is drained on reader threads so a chatty command cannot fill the pipe
//! while we wait on it, and a timeout kills the whole group.

use convergence::script::shell_quote;
use convergence::{Channel, ChannelError, CommandOutput, Connector, MachineModel};
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use crate::config::SshConfig;

/// ssh reserves this exit code for its own failures
const SSH_FAILURE: i32 = 255;

/// Trailer the remote side writes to stderr with the command's exit code
const EXIT_MARKER: &str = "__fleetward_exit";

/// How long to keep reading after the command exits while something it
/// left in the background still holds the pipes
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Runs commands with `sh -c` on this machine
#[derive(Debug, Default)]
pub struct LocalShell;

impl Channel for LocalShell {
    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ChannelError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        run_process(cmd, timeout)
    }
}

/// Runs commands on a remote host through the `ssh` client
///
/// The remote command's exit code travels back as a stderr trailer, so a
/// command exiting 255 is told apart from ssh failing with 255.
#[derive(Debug, Clone)]
pub struct SshChannel {
    destination: String,
    config: SshConfig,
}

impl SshChannel {
    pub fn new(address: &str, config: &SshConfig) -> Self {
        let destination = match &config.user {
            Some(user) => format!("{user}@{address}"),
            None => address.to_string(),
        };
        Self {
            destination,
            config: config.clone(),
        }
    }

    /// Arguments for one invocation; the remote side runs `sh -c <command>`
    fn args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(self.destination.clone());
        args.push(format!(
            "sh -c {}; echo \"{EXIT_MARKER} $?\" >&2",
            shell_quote(command)
        ));
        args
    }
}

/// Strip the exit trailer from remote stderr, returning the exit code it carried
fn split_exit_marker(stderr: &[u8]) -> (Vec<u8>, Option<i32>) {
    let text = String::from_utf8_lossy(stderr);
    match text.rfind(EXIT_MARKER) {
        Some(pos) => {
            let code = text[pos + EXIT_MARKER.len()..].trim().parse().ok();
            (text[..pos].as_bytes().to_vec(), code)
        }
        None => (stderr.to_vec(), None),
    }
}

impl Channel for SshChannel {
    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ChannelError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.args(command));
        let mut output = run_process(cmd, timeout)?;
        let (stderr, remote_exit) = split_exit_marker(&output.stderr);
        match remote_exit {
            Some(code) => {
                output.stderr = stderr;
                output.exit_code = code;
                Ok(output)
            }
            None if output.exit_code == SSH_FAILURE => Err(ChannelError::Closed(format!(
                "ssh {}: {}",
                self.destination,
                output.stderr_str().trim()
            ))),
            None => Ok(output),
        }
    }
}

/// Opens a channel per machine, over SSH unless told to stay local
#[derive(Debug, Clone)]
pub struct ShellConnector {
    ssh: SshConfig,
    local: bool,
}

impl ShellConnector {
    pub fn new(ssh: SshConfig, local: bool) -> Self {
        Self { ssh, local }
    }
}

impl Connector for ShellConnector {
    fn connect(&self, machine: &MachineModel) -> Result<Box<dyn Channel>, ChannelError> {
        if self.local {
            return Ok(Box::new(LocalShell));
        }

        let mut channel = SshChannel::new(machine.address(), &self.ssh);
        // Probe once so an unreachable host fails before any unit runs
        let probe_timeout = Duration::from_secs(self.ssh.connect_timeout_secs.saturating_add(5));
        match channel.run("true", probe_timeout) {
            Ok(output) if output.success() => {
                log::debug!("{}: connected via {}", machine.label(), channel.destination);
                Ok(Box::new(channel))
            }
            Ok(output) => Err(ChannelError::Closed(format!(
                "connection probe exited with {}",
                output.exit_code
            ))),
            Err(ChannelError::TimedOut(after)) => Err(ChannelError::Closed(format!(
                "no answer within {}s",
                after.as_secs()
            ))),
            Err(e) => Err(e),
        }
    }
}

fn run_process(mut command: Command, timeout: Duration) -> Result<CommandOutput, ChannelError> {
    let deadline = Instant::now() + timeout;
    own_process_group(&mut command);
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ChannelError::Failed(format!("failed to spawn {command:?}: {e}")))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout = child.stdout.take().map(|r| drain(r, done_tx.clone()));
    let stderr = child.stderr.take().map(|r| drain(r, done_tx.clone()));
    drop(done_tx);
    let readers = usize::from(stdout.is_some()) + usize::from(stderr.is_some());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            kill_group(&mut child);
            let _ = child.wait();
            return Err(ChannelError::TimedOut(timeout));
        }
        Err(e) => return Err(ChannelError::Failed(e.to_string())),
    };

    // Background children may keep the pipes open after the command exits
    let grace = deadline
        .saturating_duration_since(Instant::now())
        .min(OUTPUT_GRACE);
    let read_until = Instant::now() + grace;
    for _ in 0..readers {
        let left = read_until.saturating_duration_since(Instant::now());
        if done_rx.recv_timeout(left).is_err() {
            log::debug!("output still open after exit, keeping what was captured");
            break;
        }
    }

    Ok(CommandOutput {
        stdout: stdout.as_ref().map(take).unwrap_or_default(),
        stderr: stderr.as_ref().map(take).unwrap_or_default(),
        exit_code: status.code().unwrap_or(-1),
    })
}

type Captured = Arc<Mutex<Vec<u8>>>;

/// Read `reader` to its end on a thread; the buffer fills as data arrives
fn drain<R: Read + Send + 'static>(mut reader: R, done: mpsc::Sender<()>) -> Captured {
    let captured = Captured::default();
    let sink = Arc::clone(&captured);
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        let _ = done.send(());
    });
    captured
}

fn take(captured: &Captured) -> Vec<u8> {
    captured
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default()
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

/// Kill the command and everything it started in its group
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    match libc::pid_t::try_from(child.id()) {
        // SAFETY: the child leads its own group and is not reaped yet, so
        // the group id cannot have been reused
        Ok(pgid) => unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        },
        Err(_) => {
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}
