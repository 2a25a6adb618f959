use std::io;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::task::TaskTracker;

use crate::logs::{LogSink, PrefixedLineWriter};

/// The user-supplied application command, with its fully constructed
/// environment.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ChildSpec {
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Builds the child environment: the inherited environment minus any
/// verification keys (function calls come from an authenticated endpoint
/// here, and a stale key would conflict with the session), plus the session
/// coordinates the SDK reads at startup.
pub fn child_env(
    inherited: impl Iterator<Item = (String, String)>,
    api_key: &str,
    session_id: &str,
    local_endpoint: &str,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = inherited
        .filter(|(name, _)| !name.starts_with("DISPATCH_VERIFICATION_KEY"))
        .collect();
    env.push(("DISPATCH_API_KEY".to_string(), api_key.to_string()));
    env.push((
        "DISPATCH_ENDPOINT_URL".to_string(),
        format!("bridge://{session_id}"),
    ));
    env.push((
        "DISPATCH_ENDPOINT_ADDR".to_string(),
        local_endpoint.to_string(),
    ));
    env
}

/// Spawns the child with piped stdout/stderr. Each stream is drained by a
/// task that prefixes lines and funnels them into the log sink; draining is
/// continuous so a full pipe never blocks the child.
pub(crate) fn spawn(
    spec: &ChildSpec,
    sink: Arc<dyn LogSink>,
    prefix: &str,
    tracker: &TaskTracker,
) -> io::Result<Child> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .env_clear()
        .envs(spec.env.iter().cloned())
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    configure_platform(&mut command);

    let mut child = command.spawn()?;

    if let Some(stdout) = child.stdout.take() {
        tracker.spawn(drain_lines(stdout, PrefixedLineWriter::new(sink.clone(), prefix)));
    }
    if let Some(stderr) = child.stderr.take() {
        tracker.spawn(drain_lines(stderr, PrefixedLineWriter::new(sink, prefix)));
    }

    Ok(child)
}

async fn drain_lines(stream: impl AsyncRead + Unpin, writer: PrefixedLineWriter) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        writer.write_line(&line);
    }
}

/// Places the child in its own process group so signals reach the whole
/// group; on Linux the child additionally receives SIGTERM if the agent
/// dies first.
#[cfg(unix)]
fn configure_platform(command: &mut Command) {
    unsafe {
        command.pre_exec(|| {
            use nix::unistd::{setpgid, Pid};
            let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
            #[cfg(target_os = "linux")]
            let _ = nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGTERM);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn configure_platform(_command: &mut Command) {}

/// Asks the child (and its process group, where supported) to shut down.
#[cfg(unix)]
pub(crate) fn terminate(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    match child.id() {
        Some(pid) => {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Forcibly kills the child (and its process group, where supported).
#[cfg(unix)]
pub(crate) fn kill(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    match child.id() {
        Some(pid) => {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn kill(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_env_strips_verification_keys_and_adds_session() {
        let inherited = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("DISPATCH_VERIFICATION_KEY".to_string(), "k1".to_string()),
            ("DISPATCH_VERIFICATION_KEY_NEXT".to_string(), "k2".to_string()),
        ];
        let env = child_env(inherited.into_iter(), "key", "session-1", "127.0.0.1:8000");

        assert!(env.iter().any(|(k, v)| k == "PATH" && v == "/usr/bin"));
        assert!(!env.iter().any(|(k, _)| k.starts_with("DISPATCH_VERIFICATION_KEY")));
        assert!(env
            .iter()
            .any(|(k, v)| k == "DISPATCH_API_KEY" && v == "key"));
        assert!(env
            .iter()
            .any(|(k, v)| k == "DISPATCH_ENDPOINT_URL" && v == "bridge://session-1"));
        assert!(env
            .iter()
            .any(|(k, v)| k == "DISPATCH_ENDPOINT_ADDR" && v == "127.0.0.1:8000"));
    }
}
