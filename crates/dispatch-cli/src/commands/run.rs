use std::io::{self, IsTerminal, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Args;
use crossterm::style::Stylize;
use dispatch_relay::{
    child_env, new_session_id, probe_endpoint, run_session, ChildSpec, LogSink,
    PrefixedLineWriter, SessionConfig, StderrSink, POLL_TIMEOUT,
};
use dispatch_tui::Tui;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::{resolve_api_key, Settings};
use crate::style;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Optional session to resume
    #[arg(short = 's', long = "session")]
    pub session: Option<String>,

    /// Host:port that the local application endpoint is listening on
    #[arg(short = 'e', long = "endpoint", default_value = dispatch_relay::DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Load environment variables from the given file before starting
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Command that starts the local application endpoint
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub async fn run(api_key_flag: Option<String>, args: RunArgs) -> anyhow::Result<()> {
    let env_file = match &args.env_file {
        Some(path) => {
            load_env_file(path)?;
            Some(path.clone())
        }
        None => None,
    };
    // Environment-derived settings are resolved after the env file so its
    // values are honoured.
    let settings = Settings::from_env();
    let resolved_key = resolve_api_key(api_key_flag.as_deref(), &settings)?;

    let arg0 = Path::new(&args.command[0])
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.command[0].clone());
    let prefix_width = "dispatch".len().max(arg0.len());

    if probe_endpoint(&args.endpoint, Duration::from_secs(1)).await {
        bail!(
            "cannot start local application on address that's already in use: {}",
            args.endpoint
        );
    }

    // Enable the TUI if this is an interactive session and stdout/stderr
    // aren't redirected.
    let interactive = io::stdin().is_terminal()
        && io::stdout().is_terminal()
        && io::stderr().is_terminal();
    let tui = interactive.then(|| Arc::new(Tui::new()));

    let sink: Arc<dyn LogSink> = match &tui {
        Some(tui) => tui.log_sink(),
        None => Arc::new(StderrSink),
    };
    init_logging(sink.clone(), &log_prefix("dispatch", prefix_width), args.verbose);
    if let Some(path) = env_file {
        tracing::info!(path = %path.display(), "loaded environment variables from file");
    }

    let session_id = args
        .session
        .clone()
        .unwrap_or_else(new_session_id);

    if !args.verbose && tui.is_none() {
        style::dialog(&format!(
            "Starting Dispatch session: {session_id}\n\n\
             Run 'dispatch help run' to learn about Dispatch sessions."
        ));
    }
    tracing::info!(session_id = %session_id, "starting session");

    let config = SessionConfig {
        session_id: session_id.clone(),
        bridge_url: settings.bridge_url.clone(),
        bridge_host_header: settings.bridge_host_header.clone(),
        api_key: resolved_key.key.clone(),
        auth_error_message: resolved_key.auth_error_message(),
        local_endpoint: args.endpoint.clone(),
        child: ChildSpec {
            program: args.command[0].clone(),
            args: args.command[1..].to_vec(),
            env: child_env(
                std::env::vars(),
                &resolved_key.key,
                &session_id,
                &args.endpoint,
            ),
        },
        child_log_prefix: app_log_prefix(&arg0, prefix_width),
    };

    let http = reqwest::Client::builder()
        .timeout(POLL_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let cancel = CancellationToken::new();
    let (interrupt_tx, interrupt_rx) = mpsc::channel(2);

    let tui_task = tui.clone().map(|tui| {
        let cancel = cancel.clone();
        let interrupt_tx = interrupt_tx.clone();
        tokio::task::spawn_blocking(move || tui.run(cancel, interrupt_tx))
    });

    let outcome = run_session(
        config,
        http,
        tui.as_ref().map(|tui| tui.observer()),
        sink,
        interrupt_rx,
        cancel.clone(),
    )
    .await;

    // Make sure the TUI releases the terminal before anything is printed.
    cancel.cancel();
    if let Some(task) = tui_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "TUI exited with an error"),
            Err(err) => tracing::warn!(error = %err, "TUI task failed"),
        }
    }

    let outcome = outcome?;
    let command_line = args.command.join(" ");

    if outcome.auth_failed {
        dump_logs(&tui).await;
        bail!(resolved_key.auth_error_message());
    }

    if outcome.signaled {
        // The command was halted by a forwarded signal; assume the operator
        // may want to resume this session.
        if outcome.successful_polls > 0 && !args.verbose {
            style::dialog(&resumption_hint(&session_id, &command_line));
        }
        return Ok(());
    }

    if outcome.successful_polls == 0 {
        // Catches misconfiguration: wrong command, immediate crash.
        dump_logs(&tui).await;
        bail!("command '{command_line}' exited unexpectedly");
    }
    if !outcome.child_status.success() {
        dump_logs(&tui).await;
        return Err(anyhow!(
            "failed to invoke command '{command_line}': {}",
            outcome.child_status
        ));
    }
    Ok(())
}

fn load_env_file(path: &Path) -> anyhow::Result<()> {
    let absolute = std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf());
    dotenvy::from_path(path)
        .map_err(|err| anyhow!("failed to load env file from {}: {err}", absolute.display()))
}

fn log_prefix(name: &str, width: usize) -> String {
    format!(
        "{}{}",
        format!("{name:<width$}").green(),
        " | ".dark_grey()
    )
}

fn app_log_prefix(name: &str, width: usize) -> String {
    format!(
        "{}{}",
        format!("{name:<width$}").magenta(),
        " | ".dark_grey()
    )
}

fn resumption_hint(session_id: &str, command_line: &str) -> String {
    let arg0 = std::env::args()
        .next()
        .unwrap_or_else(|| "dispatch".to_string());
    format!("To resume this Dispatch session:\n\n\t{arg0} run --session {session_id} -- {command_line}")
}

fn init_logging(sink: Arc<dyn LogSink>, prefix: &str, verbose: bool) {
    let writer = PrefixedLineWriter::new(sink, prefix);
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(move || writer.clone())
        .with_target(false)
        .with_ansi(false)
        .init();
}

async fn dump_logs(tui: &Option<Arc<Tui>>) {
    let Some(tui) = tui else {
        return;
    };
    // Give the pipe scanners a moment to flush trailing output.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let logs = tui.dump_logs();
    if !logs.is_empty() {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(&logs);
        let _ = stderr.write_all(b"\n");
    }
}
