//! Parsing and formatting of dotfile time values.
//!
//! Accepted forms:
//! - `H:MM:SS` (e.g. `1:30:00`)
//! - `M:SS` (e.g. `10:00`)
//! - a bare integer, interpreted in the key's default unit
//!
//! Values are carried as `Duration`; the dotfile itself always writes
//! `H:MM:SS`.

use std::time::Duration;

use crate::error::{DomainError, DomainResult};

/// Unit applied to a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Minutes,
    Seconds,
}

impl TimeUnit {
    fn seconds(&self, n: u64) -> u64 {
        match self {
            Self::Minutes => n.saturating_mul(60),
            Self::Seconds => n,
        }
    }
}

/// Parses a time value.
pub fn parse_time(input: &str, unit: TimeUnit) -> DomainResult<Duration> {
    let text = input.trim();
    if text.is_empty() {
        return Err(DomainError::ParseError {
            field: "time".to_string(),
            reason: "empty value".to_string(),
        });
    }

    let fields = text
        .split(':')
        .map(|part| parse_field(part, text))
        .collect::<DomainResult<Vec<u64>>>()?;

    let seconds = match fields.as_slice() {
        [n] => unit.seconds(*n),
        [m, s] => {
            check_sixty(*s, text)?;
            m.saturating_mul(60).saturating_add(*s)
        }
        [h, m, s] => {
            check_sixty(*m, text)?;
            check_sixty(*s, text)?;
            h.saturating_mul(3600)
                .saturating_add(m.saturating_mul(60))
                .saturating_add(*s)
        }
        _ => return Err(DomainError::invalid("time", text, "H:MM:SS, M:SS or a number")),
    };

    Ok(Duration::from_secs(seconds))
}

fn parse_field(part: &str, whole: &str) -> DomainResult<u64> {
    let part = part.trim();
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::invalid("time", whole, "H:MM:SS, M:SS or a number"));
    }
    part.parse::<u64>()
        .map_err(|e| DomainError::ParseError {
            field: "time".to_string(),
            reason: e.to_string(),
        })
}

fn check_sixty(value: u64, whole: &str) -> DomainResult<()> {
    if value >= 60 {
        return Err(DomainError::invalid("time", whole, "minutes and seconds below 60"));
    }
    Ok(())
}

/// Formats a duration as `H:MM:SS`, truncating sub-second precision.
pub fn format_time(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}
