use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// Failures that abort the current operation.
#[derive(Debug, Error)]
pub enum MftError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid partition boot sector: {0}")]
    InvalidBootSector(String),
    #[error("record {record}: {what} attribute not found")]
    MissingAttribute { record: u64, what: String },
    #[error("record {0} is outside the table")]
    RecordOutOfRange(u64),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MftError>;

/// Recoverable problems met while parsing or reading. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Warning {
    /// Bad signature, truncated attribute, lengths exceeding the buffer.
    StructuralCorruption { record: u64, message: String },
    /// A parent or attribute-list target pointing outside the table.
    DanglingReference { record: u64, target: u64, message: String },
    /// A disk read that would go past the reported disk size.
    IoOutOfRange { record: u64, offset: u64, message: String },
}

impl Warning {
    pub fn corruption(record: u64, message: impl Into<String>) -> Self {
        Warning::StructuralCorruption {
            record,
            message: message.into(),
        }
    }

    pub fn record(&self) -> u64 {
        match self {
            Warning::StructuralCorruption { record, .. }
            | Warning::DanglingReference { record, .. }
            | Warning::IoOutOfRange { record, .. } => *record,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::StructuralCorruption { record, message } => {
                write!(f, "record {}: corrupted structure: {}", record, message)
            }
            Warning::DanglingReference {
                record,
                target,
                message,
            } => write!(
                f,
                "record {}: dangling reference to {}: {}",
                record, target, message
            ),
            Warning::IoOutOfRange {
                record,
                offset,
                message,
            } => write!(
                f,
                "record {}: read at 0x{:X} out of range: {}",
                record, offset, message
            ),
        }
    }
}

/// Destination for warnings. Owned by the caller and injected into the
/// table builder and the content locator.
pub trait WarningSink: Sync {
    fn warn(&self, warning: Warning);
}

/// Forwards every warning to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl WarningSink for LogSink {
    fn warn(&self, warning: Warning) {
        log::warn!("{}", warning);
    }
}

/// Keeps every warning in memory (and still logs it at debug level).
#[derive(Debug, Default)]
pub struct CollectSink {
    warnings: Mutex<Vec<Warning>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

impl WarningSink for CollectSink {
    fn warn(&self, warning: Warning) {
        log::debug!("{}", warning);
        if let Ok(mut w) = self.warnings.lock() {
            w.push(warning);
        }
    }
}
