// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers plug environment-specific services into the engine.
//!
//! The filter engine runs inside a driver in production and inside
//! test binaries and `rxfadm` otherwise. Logging is the only service
//! that differs between them today. If a service doesn't have at
//! least two obvious implementations, it doesn't need to be a
//! provider.

use alloc::boxed::Box;
use core::fmt;
use core::fmt::Display;

/// The set of all platform-specific providers required by a device.
pub struct Providers {
    pub log: Box<dyn LogProvider>,
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`].
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[cfg(any(feature = "std", test))]
#[derive(Clone, Copy)]
pub struct PrintlnLog;

#[cfg(any(feature = "std", test))]
impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Drops every message.
#[derive(Clone, Copy)]
pub struct NullLog;

impl LogProvider for NullLog {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

/// Records every message so tests can assert on what was logged.
#[cfg(any(feature = "test-help", test))]
#[derive(Default)]
pub struct CaptureLog {
    msgs: std::sync::Mutex<alloc::vec::Vec<(LogLevel, alloc::string::String)>>,
}

#[cfg(any(feature = "test-help", test))]
impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.msgs.lock().unwrap().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.msgs.lock().unwrap().iter().any(|(_, m)| m.contains(needle))
    }
}

#[cfg(any(feature = "test-help", test))]
impl LogProvider for CaptureLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.msgs.lock().unwrap().push((level, msg.into()));
    }
}

#[cfg(any(feature = "test-help", test))]
impl LogProvider for std::sync::Arc<CaptureLog> {
    fn log(&self, level: LogLevel, msg: &str) {
        self.as_ref().log(level, msg)
    }
}
