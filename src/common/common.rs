// SPDX-License-Identifier: GPL-2.0-or-later

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Severity of a log message.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Something requires attention.
    Error,

    /// Something may require attention.
    Warning,

    /// Standard information.
    Info,

    /// Verbose debugging information.
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            LogLevel::Error => 16,
            LogLevel::Warning => 24,
            LogLevel::Info => 32,
            LogLevel::Debug => 48,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseLogLevelError {
    #[error("invalid value: '{0}'")]
    InvalidValue(u8),

    #[error("unknown log level: '{0}'")]
    UnknownLevel(String),
}

impl TryFrom<u8> for LogLevel {
    type Error = ParseLogLevelError;

    fn try_from(value: u8) -> Result<Self, ParseLogLevelError> {
        match value {
            16 => Ok(Self::Error),
            24 => Ok(Self::Warning),
            32 => Ok(Self::Info),
            48 => Ok(Self::Debug),
            _ => Err(ParseLogLevelError::InvalidValue(value)),
        }
    }
}

impl TryFrom<&str> for LogLevel {
    type Error = ParseLogLevelError;

    fn try_from(value: &str) -> Result<Self, ParseLogLevelError> {
        match value {
            "error" => Ok(Self::Error),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            _ => Err(ParseLogLevelError::UnknownLevel(value.to_owned())),
        }
    }
}

// Thread safe dyn `MsgLogger`.
pub type ArcMsgLogger = Arc<dyn MsgLogger + Send + Sync>;

pub trait MsgLogger {
    fn log(&self, level: LogLevel, msg: &str);
}

pub struct DummyMsgLogger;

impl DummyMsgLogger {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(DummyMsgLogger {})
    }
}

impl MsgLogger for DummyMsgLogger {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

/// Prints each message to stdout, prefixed with the severity.
pub struct StdoutMsgLogger;

impl StdoutMsgLogger {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(StdoutMsgLogger {})
    }
}

impl MsgLogger for StdoutMsgLogger {
    fn log(&self, level: LogLevel, msg: &str) {
        let mut level = level.as_str().to_owned();
        level.make_ascii_uppercase();
        println!("[{level}] {msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(16, LogLevel::Error; "error")]
    #[test_case(24, LogLevel::Warning; "warning")]
    #[test_case(32, LogLevel::Info; "info")]
    #[test_case(48, LogLevel::Debug; "debug")]
    fn log_level_from_u8(input: u8, want: LogLevel) {
        assert_eq!(want, LogLevel::try_from(input).expect("valid level"));
        assert_eq!(input, want.as_u8());
    }

    #[test]
    fn log_level_from_u8_invalid() {
        assert_eq!(
            ParseLogLevelError::InvalidValue(0),
            LogLevel::try_from(0).expect_err("expected error")
        );
    }

    #[test_case("error", LogLevel::Error; "error")]
    #[test_case("debug", LogLevel::Debug; "debug")]
    fn log_level_from_str(input: &str, want: LogLevel) {
        assert_eq!(want, LogLevel::try_from(input).expect("valid level"));
        assert_eq!(input, want.as_str());
    }
}
