//! User interaction during capture loops.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use facegate_core::Identity;
use std::io::{self, BufRead, Write};
use std::time::Duration;

/// A key press that matters to a capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Capture,
    Quit,
    Other,
}

impl Key {
    pub fn from_event(key: &KeyEvent) -> Self {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Key::Quit,
            KeyCode::Char('s') | KeyCode::Char(' ') | KeyCode::Enter => Key::Capture,
            KeyCode::Char('q') | KeyCode::Esc => Key::Quit,
            _ => Key::Other,
        }
    }
}

/// What capture flows need from the person in front of the camera.
pub trait Console {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    /// Ask for the name to enroll. `None` when input was closed.
    fn prompt_name(&mut self) -> io::Result<Option<String>>;
    /// Non-blocking check for a key press.
    fn poll_key(&mut self) -> io::Result<Option<Key>>;
    /// Show the labels recognized in the current frame.
    fn show_labels(&mut self, labels: &[Identity]);
}

/// Console on the controlling terminal. Raw mode is held only while polling keys.
#[derive(Default)]
pub struct TerminalConsole {
    raw: bool,
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self::default()
    }

    fn line(&mut self, text: &str) {
        // raw mode needs an explicit carriage return. Status lines are best
        // effort: a closed stdout must not abort a capture loop.
        let mut out = io::stdout().lock();
        let _ = write!(out, "{text}\r\n");
        let _ = out.flush();
    }

    fn leave_raw(&mut self) -> io::Result<()> {
        if self.raw {
            terminal::disable_raw_mode()?;
            self.raw = false;
        }
        Ok(())
    }
}

impl Console for TerminalConsole {
    fn info(&mut self, msg: &str) {
        self.line(&format!("[INFO] {msg}"));
    }

    fn warn(&mut self, msg: &str) {
        self.line(&format!("[WARN] {msg}"));
    }

    fn prompt_name(&mut self) -> io::Result<Option<String>> {
        self.leave_raw()?;
        print!("Please enter the name for the new person: ");
        io::stdout().flush()?;

        let mut name = String::new();
        if io::stdin().lock().read_line(&mut name)? == 0 {
            return Ok(None);
        }
        Ok(Some(name.trim().to_string()))
    }

    fn poll_key(&mut self) -> io::Result<Option<Key>> {
        if !self.raw {
            terminal::enable_raw_mode()?;
            self.raw = true;
        }
        while event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(Key::from_event(&key)));
                }
            }
        }
        Ok(None)
    }

    fn show_labels(&mut self, labels: &[Identity]) {
        let text = labels.iter().map(Identity::label).collect::<Vec<_>>().join(", ");
        self.line(&format!("[FACES] {text}"));
    }
}

impl Drop for TerminalConsole {
    fn drop(&mut self) {
        let _ = self.leave_raw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(Key::from_event(&press(KeyCode::Char('s'), KeyModifiers::NONE)), Key::Capture);
        assert_eq!(Key::from_event(&press(KeyCode::Enter, KeyModifiers::NONE)), Key::Capture);
        assert_eq!(Key::from_event(&press(KeyCode::Char('q'), KeyModifiers::NONE)), Key::Quit);
        assert_eq!(Key::from_event(&press(KeyCode::Esc, KeyModifiers::NONE)), Key::Quit);
        assert_eq!(Key::from_event(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)), Key::Quit);
        assert_eq!(Key::from_event(&press(KeyCode::Char('x'), KeyModifiers::NONE)), Key::Other);
    }
}
