//! Rendering of the unlock dialog.
//!
//! ```text
//! ┌ saverguard ─────────────────────────────┐
//! │ alice@workstation                       │
//! │                                         │
//! │ Password: ********                      │
//! │                                         │
//! │ Authentication failed                   │
//! │ ████████████░░░░░░░░░░░░░░░░  14s       │
//! └─────────────────────────────────────────┘
//! ```

use std::time::Duration;

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph},
    Frame,
};
use zeroize::Zeroizing;

use crate::backend::{EchoPolicy, Prompt};

const DIALOG_WIDTH: u16 = 48;
const DIALOG_HEIGHT: u16 = 9;
const MASK_CHAR: char = '*';

/// The line being typed. Wiped on drop.
#[derive(Default)]
pub struct InputLine {
    text: Zeroizing<String>,
}

impl InputLine {
    pub fn push(&mut self, c: char) {
        self.text.push(c);
    }

    pub fn backspace(&mut self) {
        self.text.pop();
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// What the dialog shows for the current text.
    pub fn display(&self, echo: EchoPolicy) -> String {
        match echo {
            EchoPolicy::Echo => self.text.to_string(),
            EchoPolicy::Mask => MASK_CHAR.to_string().repeat(self.len()),
            EchoPolicy::Hidden => String::new(),
        }
    }

    /// Hands the text over, leaving the line empty.
    pub fn take(&mut self) -> Zeroizing<String> {
        std::mem::take(&mut self.text)
    }
}

/// Everything one frame of the dialog shows.
pub struct DialogView<'a> {
    pub title: &'a str,
    pub user_line: &'a str,
    pub prompt: &'a Prompt,
    pub input: &'a InputLine,
    pub message: Option<&'a str>,
    pub remaining: Duration,
    pub timeout: Duration,
}

impl DialogView<'_> {
    /// Fraction of the timeout still left, in `0.0..=1.0`.
    pub fn remaining_ratio(&self) -> f64 {
        if self.timeout.is_zero() {
            return 0.0;
        }
        (self.remaining.as_secs_f64() / self.timeout.as_secs_f64()).clamp(0.0, 1.0)
    }
}

/// Returns a rectangle of at most `width` x `height` centred in `area`.
pub fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

pub fn render(frame: &mut Frame, view: &DialogView<'_>) {
    let area = centered_rect(DIALOG_WIDTH, DIALOG_HEIGHT, frame.area());
    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(Span::styled(
            format!(" {} ", view.title),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let [user, _, prompt, _, message, countdown] = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(inner);

    frame.render_widget(
        Paragraph::new(Span::styled(view.user_line, Style::default().fg(Color::Gray))),
        user,
    );

    let prompt_line = Line::from(vec![
        Span::styled(
            format!("{} ", view.prompt.label),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(view.input.display(view.prompt.echo)),
        Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
    ]);
    frame.render_widget(Paragraph::new(prompt_line), prompt);

    if let Some(text) = view.message {
        frame.render_widget(
            Paragraph::new(Span::styled(text, Style::default().fg(Color::Red))),
            message,
        );
    }

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(view.remaining_ratio())
        .label(format!("{}s", view.remaining.as_secs()));
    frame.render_widget(gauge, countdown);
}
