//! Captured `console.*` output of a mounted mini-app.

use std::collections::VecDeque;

use serde::Serialize;

use crate::{config::limits::MAX_CONSOLE_MESSAGE_CHARS, core::LOG_TARGET};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "info" => ConsoleLevel::Info,
            "warn" => ConsoleLevel::Warn,
            "error" => ConsoleLevel::Error,
            "debug" => ConsoleLevel::Debug,
            _ => ConsoleLevel::Log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
    pub at_ms: u64,
}

/// Ring buffer of console entries; the oldest entry goes first when full.
#[derive(Debug)]
pub struct ConsoleLog {
    entries: VecDeque<ConsoleEntry>,
    capacity: usize,
    dropped: usize,
}

impl ConsoleLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, level: ConsoleLevel, message: &str, at_ms: u64) {
        let message: String = if message.chars().count() > MAX_CONSOLE_MESSAGE_CHARS {
            let mut cut: String = message.chars().take(MAX_CONSOLE_MESSAGE_CHARS).collect();
            cut.push('…');
            cut
        } else {
            message.to_string()
        };
        match level {
            ConsoleLevel::Error => tracing::warn!(target: LOG_TARGET, console = %message, "mini-app console"),
            _ => tracing::debug!(target: LOG_TARGET, console = %message, "mini-app console"),
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(ConsoleEntry {
            level,
            message,
            at_ms,
        });
    }

    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
