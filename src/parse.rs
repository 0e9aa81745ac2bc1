//! Classification of the simulation's stdout lines.
//!
//! The code prints a `time=` token whenever it reports simulation time.
//! Plain progress chatter carries it among other tokens; snapshot
//! announcements are exactly two tokens (`time=` and the value). Everything
//! reaches the run log verbatim regardless of classification.

use crate::error::MalformedLogLine;

/// Structured interpretation of a single output line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedLine {
    /// A snapshot announcement; the caller assigns the running index.
    Snapshot { sim_time: f64 },
    /// A progress report carrying the current simulation time.
    Progress { sim_time: f64 },
    /// No structured event.
    Plain,
}

/// Classify one raw line, tokenized on whitespace.
pub fn classify(line: &str) -> Result<ParsedLine, MalformedLogLine> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "time=") else {
        return Ok(ParsedLine::Plain);
    };
    let value = tokens.get(pos + 1).copied().unwrap_or_default();
    let sim_time: f64 = value.parse().map_err(|_| MalformedLogLine {
        value: value.to_string(),
    })?;
    if tokens.len() == 2 {
        Ok(ParsedLine::Snapshot { sim_time })
    } else {
        Ok(ParsedLine::Progress { sim_time })
    }
}
