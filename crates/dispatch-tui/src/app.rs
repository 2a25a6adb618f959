use std::sync::{Arc, Mutex};

use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::logs::LogBuffer;
use crate::model::{CallModel, DispatchId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Functions,
    Logs,
    Detail,
}

/// Interactive state of the TUI. The function-call model and the log buffer
/// are shared with the relay through the observer and log sink handles; the
/// rest belongs to the render loop.
pub struct App {
    pub model: Arc<Mutex<CallModel>>,
    pub logs: Arc<LogBuffer>,
    pub error: Arc<Mutex<Option<String>>>,

    pub ticks: u64,
    pub active_tab: Tab,
    pub select_mode: bool,
    pub selection_input: String,
    pub tail: bool,
    pub selected: Option<DispatchId>,
    pub scroll: u16,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        model: Arc<Mutex<CallModel>>,
        logs: Arc<LogBuffer>,
        error: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Self {
            model,
            logs,
            error,
            ticks: 0,
            active_tab: Tab::Functions,
            select_mode: false,
            selection_input: String::new(),
            tail: true,
            selected: None,
            scroll: 0,
            should_quit: false,
        }
    }

    pub fn tick(&mut self) {
        self.ticks += 1;
        self.model.lock().unwrap().expire_overdue(Utc::now());
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if self.select_mode {
            self.handle_select_key(key);
        } else {
            self.handle_normal_key(key);
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => self.should_quit = true,
                KeyCode::Char('u') => self.scroll_by(-10),
                KeyCode::Char('d') => self.scroll_by(10),
                _ => {}
            }
            return;
        }
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Esc => {
                // Esc leaves the detail view rather than quitting.
                if self.active_tab == Tab::Detail {
                    self.reset_view(Tab::Functions);
                } else {
                    self.should_quit = true;
                }
            }
            KeyCode::Tab => self.next_tab(),
            KeyCode::Char('s') => {
                let has_calls = !self.model.lock().unwrap().is_empty();
                let has_error = self.error.lock().unwrap().is_some();
                if has_calls && !has_error {
                    self.select_mode = true;
                    self.selection_input.clear();
                }
            }
            KeyCode::Char('t') => self.tail = true,
            KeyCode::Up => self.scroll_by(-1),
            KeyCode::Down => self.scroll_by(1),
            KeyCode::PageUp => self.scroll_by(-10),
            KeyCode::PageDown => self.scroll_by(10),
            _ => {}
        }
    }

    fn handle_select_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if key.code == KeyCode::Char('c') {
                self.should_quit = true;
            }
            return;
        }
        match key.code {
            KeyCode::Esc => self.select_mode = false,
            KeyCode::Tab => {
                self.select_mode = false;
                self.reset_view(Tab::Functions);
            }
            KeyCode::Enter => {
                if self.selected.is_some() {
                    self.select_mode = false;
                    self.reset_view(Tab::Detail);
                }
            }
            KeyCode::Backspace => {
                self.selection_input.pop();
            }
            KeyCode::Char(c) if c.is_ascii_digit() => self.selection_input.push(c),
            _ => {}
        }
    }

    fn next_tab(&mut self) {
        self.select_mode = false;
        let next = match self.active_tab {
            Tab::Functions => Tab::Logs,
            Tab::Logs if self.selected.is_some() => Tab::Detail,
            Tab::Logs => Tab::Functions,
            Tab::Detail => Tab::Functions,
        };
        self.reset_view(next);
    }

    fn reset_view(&mut self, tab: Tab) {
        self.active_tab = tab;
        self.scroll = 0;
        self.tail = true;
    }

    fn scroll_by(&mut self, delta: i32) {
        self.tail = false;
        self.scroll = self.scroll.saturating_add_signed(delta as i16);
    }
}
