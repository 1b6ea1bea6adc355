//! Interactive raw-mode REPL
//!
//! A single-thread cooperative input decoder: edit buffer, bounded history
//! with index, one key event at a time. Enter dispatches the line:
//! `quit`/`exit` fire the completion signal, `ls` lists playbook names, any
//! other line is a playbook lookup whose payload goes to the send driver
//! over a channel. The terminal mode is restored exactly once on every exit
//! path by an RAII guard.

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use restfile_core::Result;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Input units the editor understands, decoupled from the terminal backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Key {
    Char(char),
    Enter,
    Backspace,
    Up,
    Down,
    Interrupt,
    Eof,
}

/// Whether the editor loop keeps going after a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Quit,
}

/// The line editor state
#[derive(Debug)]
pub struct Repl {
    playbook: BTreeMap<String, String>,
    no_special_cmds: bool,
    input: String,
    history: Vec<String>,
    history_idx: usize,
    history_limit: usize,
    done: CancellationToken,
    tx: UnboundedSender<String>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

impl Repl {
    /// New editor over the session's playbook. Payloads for matched lines
    /// go out through `tx`; `done` is the session's completion signal.
    pub fn new(
        playbook: BTreeMap<String, String>,
        no_special_cmds: bool,
        history_limit: usize,
        done: CancellationToken,
        tx: UnboundedSender<String>,
    ) -> Self {
        Self {
            playbook,
            no_special_cmds,
            input: String::new(),
            history: Vec::new(),
            history_idx: 0,
            history_limit,
            done,
            tx,
        }
    }

    /// Blocking editor loop; run it on a blocking task. Polls so the loop
    /// also ends promptly when the session signal fires from elsewhere.
    pub fn run(mut self) -> Result<()> {
        let _guard = RawModeGuard::enable()?;
        self.prompt();

        loop {
            if self.done.is_cancelled() {
                break;
            }
            if !event::poll(Duration::from_millis(100))? {
                continue;
            }
            let Some(key) = map_event(event::read()?) else {
                continue;
            };
            if self.handle_key(key) == Flow::Quit {
                break;
            }
        }
        print!("\r\n");
        flush();
        Ok(())
    }

    pub(crate) fn handle_key(&mut self, key: Key) -> Flow {
        match key {
            Key::Char(c) => {
                self.input.push(c);
                print!("{}", c);
                flush();
                Flow::Continue
            }
            Key::Backspace => {
                if self.input.pop().is_some() {
                    print!("\x08 \x08");
                    flush();
                }
                Flow::Continue
            }
            Key::Up => {
                self.previous_cmd();
                Flow::Continue
            }
            Key::Down => {
                self.next_cmd();
                Flow::Continue
            }
            Key::Interrupt | Key::Eof => {
                self.done.cancel();
                Flow::Quit
            }
            Key::Enter => self.dispatch(),
        }
    }

    fn dispatch(&mut self) -> Flow {
        let line = std::mem::take(&mut self.input);

        if !self.no_special_cmds && (line == "quit" || line == "exit") {
            // cancel is idempotent: a rapid second quit fires nothing new
            self.done.cancel();
            return Flow::Quit;
        }
        if line.is_empty() {
            self.prompt();
            return Flow::Continue;
        }

        self.push_history(line.clone());

        if !self.no_special_cmds && line == "ls" {
            print!("\r\n");
            for name in self.playbook.keys() {
                print!("{} ", name);
            }
            self.prompt();
            return Flow::Continue;
        }

        match self.playbook.get(&line) {
            Some(payload) => {
                if self.tx.send(payload.clone()).is_ok() {
                    print!("\r\nsent({})", line);
                }
            }
            None => {
                print!("\r\nno such playbook entry: {}", line);
            }
        }
        self.prompt();
        Flow::Continue
    }

    fn push_history(&mut self, line: String) {
        if self.history_limit > 0 && self.history.len() == self.history_limit {
            self.history.remove(0);
        }
        self.history.push(line);
        self.history_idx = self.history.len();
    }

    fn previous_cmd(&mut self) {
        if !self.history.is_empty() && self.history_idx > 0 {
            self.history_idx -= 1;
            self.input = self.history[self.history_idx].clone();
            self.redraw();
        }
    }

    fn next_cmd(&mut self) {
        if self.history_idx < self.history.len() {
            self.history_idx += 1;
            if self.history_idx == self.history.len() {
                self.input.clear();
            } else {
                self.input = self.history[self.history_idx].clone();
            }
            self.redraw();
        }
    }

    fn prompt(&self) {
        print!("\r\n> ");
        flush();
    }

    fn redraw(&self) {
        print!("\x1b[2K\r> {}", self.input);
        flush();
    }

    #[cfg(test)]
    pub(crate) fn input(&self) -> &str {
        &self.input
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &[String] {
        &self.history
    }
}

fn map_event(event: Event) -> Option<Key> {
    let Event::Key(key) = event else {
        return None;
    };
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match (key.code, key.modifiers) {
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Key::Interrupt),
        (KeyCode::Char('d'), KeyModifiers::CONTROL) => Some(Key::Eof),
        (KeyCode::Char(c), _) => Some(Key::Char(c)),
        (KeyCode::Enter, _) => Some(Key::Enter),
        (KeyCode::Backspace, _) => Some(Key::Backspace),
        (KeyCode::Up, _) => Some(Key::Up),
        (KeyCode::Down, _) => Some(Key::Down),
        _ => None,
    }
}

fn flush() {
    let _ = std::io::stdout().flush();
}
