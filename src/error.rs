// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Error kinds shared by backup, restore and migration
//!
//! Each step has its own error enum; `kind()` on those collapses them to
//! the categories callers map to responses.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Nothing selected, or an archive without files
    EmptyInput,
    /// Not a ZIP container, or not declared as one
    MalformedContainer,
    /// A file that must be JSON does not parse
    MalformedContent,
    /// A document fails its schema
    SchemaViolation,
    UnsupportedInitSystem,
    /// The live tree was being replaced when something failed
    PartialApply,
    /// Another operation holds the configuration root
    Busy,
    Internal,
}

impl ErrorKind {
    /// True if the live configuration tree is known to be untouched
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::PartialApply)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "empty-input"),
            Self::MalformedContainer => write!(f, "malformed-container"),
            Self::MalformedContent => write!(f, "malformed-content"),
            Self::SchemaViolation => write!(f, "schema-violation"),
            Self::UnsupportedInitSystem => write!(f, "unsupported-init-system"),
            Self::PartialApply => write!(f, "partial-apply"),
            Self::Busy => write!(f, "busy"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
