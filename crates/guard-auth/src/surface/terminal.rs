//! Full-screen terminal surface (crossterm + ratatui).
//!
//! Reads keys from stdin and draws on stderr: stdout carries the JSON
//! report to the daemon.

use std::io::{self, Stderr};
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::debug;

use super::dialog::{self, DialogView, InputLine};
use super::{ensure_unprivileged, PromptSurface, SurfaceReply};
use crate::backend::Prompt;
use crate::error::SurfaceError;
use crate::privilege::{Dropped, PrivilegeGuard};

/// Redraw interval while waiting for keys (drives the countdown).
const TICK: Duration = Duration::from_millis(250);

/// How long a final message stays up before the surface closes.
const MESSAGE_HOLD: Duration = Duration::from_secs(2);

/// What a key press did to the line being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Edited,
    Submit,
    Cancel,
    Ignored,
}

/// Applies one key press to `input`.
pub fn apply_key(key: KeyEvent, input: &mut InputLine) -> KeyOutcome {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => KeyOutcome::Submit,
        KeyCode::Esc => KeyOutcome::Cancel,
        KeyCode::Char('c') | KeyCode::Char('d') if ctrl => KeyOutcome::Cancel,
        KeyCode::Char('u') if ctrl => {
            input.clear();
            KeyOutcome::Edited
        }
        KeyCode::Char(_) if ctrl => KeyOutcome::Ignored,
        KeyCode::Char(c) => {
            input.push(c);
            KeyOutcome::Edited
        }
        KeyCode::Backspace => {
            input.backspace();
            KeyOutcome::Edited
        }
        _ => KeyOutcome::Ignored,
    }
}

pub struct TerminalSurface {
    terminal: Terminal<CrosstermBackend<Stderr>>,
    title: String,
    user_line: String,
    message: Option<String>,
    /// The prompt last shown, redrawn under a message.
    last_prompt: Option<Prompt>,
}

impl TerminalSurface {
    /// Takes over the terminal. Restored when the surface is dropped.
    ///
    /// # Errors
    ///
    /// `SurfaceError::NotATerminal` when stdin is not a terminal, e.g. a
    /// daemon without one started the authenticator.
    pub fn new(guard: &PrivilegeGuard<Dropped>, user_line: &str) -> Result<Self, SurfaceError> {
        ensure_unprivileged(guard)?;

        if !io::stdin().is_tty() {
            return Err(SurfaceError::NotATerminal);
        }

        enable_raw_mode()?;
        let mut stderr = io::stderr();
        if let Err(e) = execute!(stderr, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e.into());
        }

        let terminal = match Terminal::new(CrosstermBackend::new(stderr)) {
            Ok(t) => t,
            Err(e) => {
                restore_terminal();
                return Err(e.into());
            }
        };

        Ok(Self {
            terminal,
            title: "saverguard".to_string(),
            user_line: user_line.to_string(),
            message: None,
            last_prompt: None,
        })
    }

    fn draw(&mut self, prompt: &Prompt, input: &InputLine, remaining: Duration, timeout: Duration) -> io::Result<()> {
        let view = DialogView {
            title: &self.title,
            user_line: &self.user_line,
            prompt,
            input,
            message: self.message.as_deref(),
            remaining,
            timeout,
        };
        self.terminal.draw(|frame| dialog::render(frame, &view))?;
        Ok(())
    }
}

impl PromptSurface for TerminalSurface {
    fn prompt(&mut self, prompt: &Prompt, timeout: Duration) -> Result<SurfaceReply, SurfaceError> {
        self.last_prompt = Some(prompt.clone());
        let mut input = InputLine::default();
        let mut deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("Prompt timed out");
                return Ok(SurfaceReply::TimedOut);
            }

            self.draw(prompt, &input, remaining, timeout)?;

            if !event::poll(remaining.min(TICK))? {
                continue;
            }

            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            deadline = Instant::now() + timeout;
            match apply_key(key, &mut input) {
                KeyOutcome::Submit => return Ok(SurfaceReply::Submitted(input.take())),
                KeyOutcome::Cancel => return Ok(SurfaceReply::Cancelled),
                KeyOutcome::Edited => self.message = None,
                KeyOutcome::Ignored => {}
            }
        }
    }

    /// Draws `message` under the last prompt and keeps it up briefly.
    fn show_message(&mut self, message: &str) -> Result<(), SurfaceError> {
        self.message = Some(message.to_string());
        let Some(prompt) = self.last_prompt.clone() else {
            return Ok(());
        };
        self.draw(&prompt, &InputLine::default(), Duration::ZERO, Duration::ZERO)?;
        std::thread::sleep(MESSAGE_HOLD);
        Ok(())
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        restore_terminal();
        let _ = self.terminal.show_cursor();
    }
}

fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stderr(), LeaveAlternateScreen);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[test]
    fn test_typing_and_submit() {
        let mut input = InputLine::default();
        for c in "abc".chars() {
            assert_eq!(apply_key(key(KeyCode::Char(c)), &mut input), KeyOutcome::Edited);
        }
        assert_eq!(apply_key(key(KeyCode::Backspace), &mut input), KeyOutcome::Edited);
        assert_eq!(apply_key(key(KeyCode::Enter), &mut input), KeyOutcome::Submit);
        assert_eq!(input.take().as_str(), "ab");
    }

    #[test]
    fn test_cancel_keys() {
        let mut input = InputLine::default();
        assert_eq!(apply_key(key(KeyCode::Esc), &mut input), KeyOutcome::Cancel);
        assert_eq!(apply_key(ctrl('c'), &mut input), KeyOutcome::Cancel);
        assert_eq!(apply_key(ctrl('d'), &mut input), KeyOutcome::Cancel);
    }

    #[test]
    fn test_ctrl_u_clears_and_other_ctrl_ignored() {
        let mut input = InputLine::default();
        apply_key(key(KeyCode::Char('x')), &mut input);
        assert_eq!(apply_key(ctrl('a'), &mut input), KeyOutcome::Ignored);
        assert_eq!(input.len(), 1);
        assert_eq!(apply_key(ctrl('u'), &mut input), KeyOutcome::Edited);
        assert!(input.is_empty());
        assert_eq!(apply_key(key(KeyCode::F(1)), &mut input), KeyOutcome::Ignored);
    }
}
