use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use dispatch_proto::{run_request, run_response, RunRequest, Status};
use prost::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bridge::{BridgeClient, BridgeError, PendingRequest};
use crate::child::{self, ChildSpec};
use crate::forward;
use crate::logs::LogSink;
use crate::observer::FunctionCallObserver;
use crate::wire;

/// External interrupt, equivalent to an operator signal. Sent by the TUI
/// when the user quits.
#[derive(Debug, Clone, Copy)]
pub struct Interrupt;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub bridge_url: String,
    pub bridge_host_header: Option<String>,
    pub api_key: String,
    /// Wording of the fatal banner on auth failure; depends on where the
    /// key came from, so the caller formats it.
    pub auth_error_message: String,
    pub local_endpoint: String,
    pub child: ChildSpec,
    /// Prefix prepended to every line of child output.
    pub child_log_prefix: String,
}

pub struct SessionOutcome {
    /// The child was halted by a forwarded signal (or TUI quit).
    pub signaled: bool,
    pub successful_polls: u64,
    /// The bridge rejected the API key; the session was wound down.
    pub auth_failed: bool,
    pub child_status: std::process::ExitStatus,
}

/// Checks whether something is already listening on the local endpoint.
/// The agent refuses to overlap with an already-running server.
pub async fn probe_endpoint(addr: &str, timeout: Duration) -> bool {
    tracing::debug!(addr, "checking endpoint");
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
        Ok(Ok(_)) => {
            tracing::debug!(addr, "endpoint contacted successfully");
            true
        }
        _ => {
            tracing::debug!(addr, "endpoint could not be contacted");
            false
        }
    }
}

enum KillLevel {
    Terminate,
    Kill,
}

struct InvocationContext {
    bridge: BridgeClient,
    http: reqwest::Client,
    local_endpoint: String,
    observer: Option<Arc<dyn FunctionCallObserver>>,
}

/// Runs a relay session to completion: spawns the child, polls the bridge,
/// dispatches invocations, and coordinates shutdown. Every task spawned
/// here is joined before the function returns.
pub async fn run_session(
    config: SessionConfig,
    http: reqwest::Client,
    observer: Option<Arc<dyn FunctionCallObserver>>,
    sink: Arc<dyn LogSink>,
    interrupts: mpsc::Receiver<Interrupt>,
    cancel: CancellationToken,
) -> anyhow::Result<SessionOutcome> {
    let bridge = BridgeClient::new(
        http.clone(),
        &config.bridge_url,
        &config.session_id,
        &config.api_key,
        config.bridge_host_header.clone(),
    );

    let tracker = TaskTracker::new();
    let signaled = Arc::new(AtomicBool::new(false));
    let auth_failed = Arc::new(AtomicBool::new(false));
    let successful_polls = Arc::new(AtomicU64::new(0));
    let (kill_tx, mut kill_rx) = mpsc::channel::<KillLevel>(2);

    let mut child = child::spawn(&config.child, sink, &config.child_log_prefix, &tracker)
        .with_context(|| format!("failed to start {}", config.child.command_line()))?;

    tracker.spawn(signal_task(
        cancel.clone(),
        interrupts,
        kill_tx.clone(),
        signaled.clone(),
    ));

    let context = Arc::new(InvocationContext {
        bridge,
        http,
        local_endpoint: config.local_endpoint.clone(),
        observer,
    });
    tracker.spawn(poll_loop(
        context,
        config.auth_error_message.clone(),
        cancel.clone(),
        tracker.clone(),
        successful_polls.clone(),
        auth_failed.clone(),
        kill_tx,
    ));

    // The child is owned here: signals and kill requests funnel through the
    // kill channel so they are applied between waits.
    let child_status = loop {
        let level = tokio::select! {
            status = child.wait() => break status.context("failed to wait for command")?,
            Some(level) = kill_rx.recv() => level,
        };
        match level {
            KillLevel::Terminate => child::terminate(&mut child),
            KillLevel::Kill => child::kill(&mut child),
        }
    };

    cancel.cancel();
    tracker.close();
    tracker.wait().await;

    Ok(SessionOutcome {
        signaled: signaled.load(Ordering::SeqCst),
        successful_polls: successful_polls.load(Ordering::SeqCst),
        auth_failed: auth_failed.load(Ordering::SeqCst),
        child_status,
    })
}

#[cfg(unix)]
struct Signals {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.hangup.recv() => {}
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

/// On platforms without POSIX signals the set shrinks to Ctrl-C.
#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// First signal asks the child to terminate; any further signal kills it.
async fn signal_task(
    cancel: CancellationToken,
    mut interrupts: mpsc::Receiver<Interrupt>,
    kill_tx: mpsc::Sender<KillLevel>,
    signaled: Arc<AtomicBool>,
) {
    let mut signals = match Signals::new() {
        Ok(signals) => signals,
        Err(err) => {
            tracing::error!(error = %err, "failed to install signal handlers");
            return;
        }
    };
    let mut interrupts_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = signals.recv() => {}
            received = interrupts.recv(), if interrupts_open => {
                if received.is_none() {
                    interrupts_open = false;
                    continue;
                }
            }
        }

        if !signaled.swap(true, Ordering::SeqCst) {
            let _ = kill_tx.send(KillLevel::Terminate).await;
        } else {
            let _ = kill_tx.send(KillLevel::Kill).await;
        }
    }
}

async fn poll_loop(
    context: Arc<InvocationContext>,
    auth_error_message: String,
    cancel: CancellationToken,
    tracker: TaskTracker,
    successful_polls: Arc<AtomicU64>,
    auth_failed: Arc<AtomicBool>,
    kill_tx: mpsc::Sender<KillLevel>,
) {
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => return,
            polled = context.bridge.poll() => polled,
        };

        match polled {
            Ok(Some(pending)) => {
                successful_polls.fetch_add(1, Ordering::SeqCst);
                let context = context.clone();
                let cancel = cancel.clone();
                tracker.spawn(async move {
                    invoke_and_cleanup(context, pending, cancel).await;
                });
            }
            // No work within the long-poll window; ask again immediately.
            Ok(None) => {}
            Err(BridgeError::Unauthorized) => {
                tracing::error!("{auth_error_message}");
                if let Some(observer) = &context.observer {
                    observer.set_error(auth_error_message);
                }
                auth_failed.store(true, Ordering::SeqCst);
                let _ = kill_tx.send(KillLevel::Terminate).await;
                cancel.cancel();
                return;
            }
            Err(err) => {
                tracing::warn!("{err}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }
}

/// Runs one invocation. Failures never tear down the session: the request
/// is abandoned upstream with a bounded cleanup call instead.
async fn invoke_and_cleanup(
    context: Arc<InvocationContext>,
    pending: PendingRequest,
    cancel: CancellationToken,
) {
    let result = match cancel.run_until_cancelled(invoke(&context, &pending)).await {
        Some(result) => result,
        None => Err(anyhow::anyhow!("invocation aborted by shutdown")),
    };

    if let Err(err) = result {
        if !cancel.is_cancelled() {
            tracing::warn!("{err:#}");
        }
        // Notify upstream that no response is coming, so the request can be
        // re-issued promptly. Runs on a fresh, bounded timeout.
        if let Err(err) = context.bridge.cleanup(&pending.request_id).await {
            tracing::debug!("{err}");
        }
    }
}

async fn invoke(context: &InvocationContext, pending: &PendingRequest) -> anyhow::Result<()> {
    tracing::debug!(
        request_id = %pending.request_id,
        endpoint = %context.local_endpoint,
        "sending request to local application"
    );

    // Extract the nested request and its fully buffered body.
    let embedded = wire::parse_request(&pending.body)
        .context("invalid response from Dispatch API")?;
    let request = RunRequest::decode(embedded.body.clone())
        .context("invalid response from Dispatch API")?;

    tracing::debug!(
        function = %request.function,
        dispatch_id = %request.dispatch_id,
        "parsed request"
    );
    match &request.directive {
        Some(run_request::Directive::Input(_)) => {
            tracing::info!(function = %request.function, "calling function");
        }
        Some(run_request::Directive::PollResult(_)) => {
            tracing::info!(function = %request.function, "resuming function");
        }
        None => {}
    }
    if let Some(observer) = &context.observer {
        observer.observe_request(Utc::now(), &request);
    }

    let response = match forward::forward(&context.http, &context.local_endpoint, &embedded).await
    {
        Ok(response) => response,
        Err(err) => {
            if let Some(observer) = &context.observer {
                observer.observe_response(Utc::now(), &request, Some(&err.to_string()), None, None);
            }
            return Err(err.into());
        }
    };

    let http_status = response.status.as_u16();
    if response.is_proto() {
        match response.decode_run_response() {
            Ok(run_response) => {
                log_response(&request, &run_response);
                if let Some(observer) = &context.observer {
                    observer.observe_response(
                        Utc::now(),
                        &request,
                        None,
                        Some(http_status),
                        Some(&run_response),
                    );
                }
            }
            Err(err) => {
                // A response that fails to parse is still forwarded to the
                // bridge verbatim; the bridge owns retry policy.
                tracing::warn!(
                    function = %request.function,
                    error = %err,
                    "invalid function call response from local application"
                );
                if let Some(observer) = &context.observer {
                    observer.observe_response(
                        Utc::now(),
                        &request,
                        Some(&err.to_string()),
                        Some(http_status),
                        None,
                    );
                }
            }
        }
    } else {
        // E.g. a 404 when the function is not found by the local app.
        tracing::warn!(function = %request.function, http_status, "function call failed");
        if let Some(observer) = &context.observer {
            observer.observe_response(Utc::now(), &request, None, Some(http_status), None);
        }
    }

    let body = wire::serialize_response(response.status, &response.headers, &response.body);
    context
        .bridge
        .post_response(&pending.request_id, body)
        .await?;
    Ok(())
}

fn log_response(request: &RunRequest, response: &dispatch_proto::RunResponse) {
    match response.status() {
        Status::Ok => match &response.directive {
            Some(run_response::Directive::Exit(exit)) => {
                if let Some(tail_call) = &exit.tail_call {
                    tracing::info!(
                        function = %request.function,
                        tail_call = %tail_call.function,
                        "function tail-called"
                    );
                } else {
                    tracing::info!(function = %request.function, "function call succeeded");
                }
            }
            Some(run_response::Directive::Poll(poll)) => {
                tracing::info!(
                    function = %request.function,
                    calls = poll.calls.len(),
                    "function yielded"
                );
            }
            None => {}
        },
        status => {
            let error = match &response.directive {
                Some(run_response::Directive::Exit(exit)) => {
                    exit.result.as_ref().and_then(|r| r.error.as_ref())
                }
                _ => None,
            };
            tracing::warn!(
                function = %request.function,
                status = dispatch_proto::status_string(status),
                error_type = error.map(|e| e.r#type.as_str()).unwrap_or(""),
                error_message = error.map(|e| e.message.as_str()).unwrap_or(""),
                "function call failed"
            );
        }
    }
}
