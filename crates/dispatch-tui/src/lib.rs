//! Terminal UI for the Dispatch development agent.
//!
//! The TUI is driven from two sides: the relay feeds it request/response
//! pairs through the [`FunctionCallObserver`] handle and log bytes through
//! the log sink, while a tick-driven render loop owns the terminal. Both
//! sides meet in a mutex-guarded [`CallModel`].

mod app;
mod logs;
mod model;
mod text;
mod ui;

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use dispatch_proto::{RunRequest, RunResponse};
use dispatch_relay::{FunctionCallObserver, Interrupt, LogSink};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use app::{App, Tab};
pub use logs::LogBuffer;
pub use model::{CallModel, DispatchId, FunctionCall, RoundTrip, StatusClass};

const TICK_RATE: Duration = Duration::from_millis(100);

/// Shared state of one TUI session: handed to the relay as observer and log
/// sink, and to the render loop via [`Tui::run`].
pub struct Tui {
    model: Arc<Mutex<CallModel>>,
    logs: Arc<LogBuffer>,
    error: Arc<Mutex<Option<String>>>,
}

impl Default for Tui {
    fn default() -> Self {
        Self::new()
    }
}

impl Tui {
    pub fn new() -> Self {
        Self {
            model: Arc::new(Mutex::new(CallModel::new())),
            logs: Arc::new(LogBuffer::new()),
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn observer(&self) -> Arc<dyn FunctionCallObserver> {
        Arc::new(Observer {
            model: self.model.clone(),
            error: self.error.clone(),
        })
    }

    pub fn log_sink(&self) -> Arc<dyn LogSink> {
        self.logs.clone()
    }

    /// Takes the logs captured while the TUI owned the terminal, so the
    /// caller can flush them to stderr after teardown.
    pub fn dump_logs(&self) -> Vec<u8> {
        self.logs.drain()
    }

    /// Runs the render loop until the session is cancelled or the user
    /// quits. Quitting sends an [`Interrupt`], making it equivalent to an
    /// operator signal. Blocking; intended for a dedicated thread.
    pub fn run(
        &self,
        cancel: CancellationToken,
        interrupts: mpsc::Sender<Interrupt>,
    ) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal, &cancel, &interrupts);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop(
        &self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        cancel: &CancellationToken,
        interrupts: &mpsc::Sender<Interrupt>,
    ) -> anyhow::Result<()> {
        let mut app = App::new(self.model.clone(), self.logs.clone(), self.error.clone());
        let mut last_tick = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            terminal.draw(|frame| ui::draw(frame, &mut app))?;

            let timeout = TICK_RATE.saturating_sub(last_tick.elapsed());
            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        app.handle_key(key);
                    }
                }
            }

            if last_tick.elapsed() >= TICK_RATE {
                app.tick();
                last_tick = Instant::now();
            }

            if app.should_quit {
                // Quitting the TUI is an implicit interrupt.
                let _ = interrupts.try_send(Interrupt);
                return Ok(());
            }
        }
    }
}

struct Observer {
    model: Arc<Mutex<CallModel>>,
    error: Arc<Mutex<Option<String>>>,
}

impl FunctionCallObserver for Observer {
    fn observe_request(&self, now: DateTime<Utc>, request: &RunRequest) {
        self.model.lock().unwrap().observe_request(now, request);
    }

    fn observe_response(
        &self,
        now: DateTime<Utc>,
        request: &RunRequest,
        error: Option<&str>,
        http_status: Option<u16>,
        response: Option<&RunResponse>,
    ) {
        self.model
            .lock()
            .unwrap()
            .observe_response(now, request, error, http_status, response);
    }

    fn set_error(&self, message: String) {
        *self.error.lock().unwrap() = Some(message);
    }
}
