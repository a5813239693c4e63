// diag.rs — Error taxonomy and diagnostic codes
//
// Provides the shared error type used across all compiler phases. Every
// variant maps to a stable diagnostic code; once assigned, a code must never
// be reassigned to a different semantic meaning.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::id::Sid;

// ── Source span ──────────────────────────────────────────────────────────

/// Byte range into the model text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// 1-based line number of `start` within `source`.
    pub fn line_in(&self, source: &str) -> usize {
        let end = self.start.min(source.len());
        source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span::new(r.start, r.end)
    }
}

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Model loading
    pub const E0001: DiagCode = DiagCode("E0001");
    pub const E0002: DiagCode = DiagCode("E0002");
    pub const E0003: DiagCode = DiagCode("E0003");

    // Block construction
    pub const E0100: DiagCode = DiagCode("E0100");
    pub const E0101: DiagCode = DiagCode("E0101");
    pub const E0102: DiagCode = DiagCode("E0102");
    pub const E0103: DiagCode = DiagCode("E0103");

    // Wiring
    pub const E0200: DiagCode = DiagCode("E0200");
    pub const E0201: DiagCode = DiagCode("E0201");
    pub const E0202: DiagCode = DiagCode("E0202");
    pub const E0203: DiagCode = DiagCode("E0203");
    pub const E0204: DiagCode = DiagCode("E0204");

    // Emission
    pub const E0300: DiagCode = DiagCode("E0300");

    // Scheduling
    pub const E0400: DiagCode = DiagCode("E0400");

    // Templates
    pub const E0500: DiagCode = DiagCode("E0500");
}

// ── Error ────────────────────────────────────────────────────────────────

/// Every way a compilation run can fail. All of them abort the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("failed to load model: {message}")]
    Load { message: String },

    #[error("{element} is missing required {what} '{name}'")]
    MissingAttribute {
        element: &'static str,
        what: &'static str,
        name: &'static str,
        span: Option<Span>,
    },

    #[error("{element} has invalid {name} '{value}'")]
    InvalidAttribute {
        element: &'static str,
        name: String,
        value: String,
        span: Option<Span>,
    },

    #[error("unknown block type '{kind}' for block '{name}' (SID {sid})")]
    UnknownBlockKind {
        kind: String,
        name: String,
        sid: Sid,
        span: Option<Span>,
    },

    #[error("invalid sum operator string '{ops}' in block '{name}': {reason}")]
    InvalidOperator {
        ops: String,
        name: String,
        reason: String,
        span: Option<Span>,
    },

    #[error("duplicate SID {sid}: '{first}' and '{second}'")]
    DuplicateSid {
        sid: Sid,
        first: String,
        second: String,
        span: Option<Span>,
    },

    #[error("blocks with SID {first} and {second} both use the variable name '{name}'")]
    DuplicateName {
        name: String,
        first: Sid,
        second: Sid,
        span: Option<Span>,
    },

    #[error("invalid socket '{text}': {reason}")]
    InvalidSocketFormat {
        text: String,
        reason: &'static str,
        span: Option<Span>,
    },

    #[error("line references undeclared block SID {sid}")]
    UnknownReference { sid: Sid, span: Option<Span> },

    #[error("block '{name}' has {arity} input(s), but a line targets input {port}")]
    InvalidPort {
        name: String,
        port: usize,
        arity: usize,
        span: Option<Span>,
    },

    #[error("input {port} of block '{name}' is driven by more than one line")]
    SlotAlreadyBound {
        name: String,
        port: usize,
        span: Option<Span>,
    },

    #[error("line from '{source_text}' has no destination")]
    UnconnectedLine {
        source_text: String,
        span: Option<Span>,
    },

    #[error("input {port} of block '{name}' is not connected")]
    UnresolvedSlot { name: String, port: usize },

    #[error("algebraic loop without a delay: {}", .blocks.join(" -> "))]
    AlgebraicLoop { blocks: Vec<String> },

    #[error("invalid template placeholder '{placeholder}' (only {{0}} is supported)")]
    InvalidTemplate { placeholder: String },
}

impl Error {
    /// The stable diagnostic code for this error.
    pub fn code(&self) -> DiagCode {
        match self {
            Error::Load { .. } => codes::E0001,
            Error::MissingAttribute { .. } => codes::E0002,
            Error::InvalidAttribute { .. } => codes::E0003,
            Error::UnknownBlockKind { .. } => codes::E0100,
            Error::InvalidOperator { .. } => codes::E0101,
            Error::DuplicateSid { .. } => codes::E0102,
            Error::DuplicateName { .. } => codes::E0103,
            Error::InvalidSocketFormat { .. } => codes::E0200,
            Error::UnknownReference { .. } => codes::E0201,
            Error::InvalidPort { .. } => codes::E0202,
            Error::SlotAlreadyBound { .. } => codes::E0203,
            Error::UnconnectedLine { .. } => codes::E0204,
            Error::UnresolvedSlot { .. } => codes::E0300,
            Error::AlgebraicLoop { .. } => codes::E0400,
            Error::InvalidTemplate { .. } => codes::E0500,
        }
    }

    /// Location in the model text, when the failing element is known.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::MissingAttribute { span, .. }
            | Error::InvalidAttribute { span, .. }
            | Error::UnknownBlockKind { span, .. }
            | Error::InvalidOperator { span, .. }
            | Error::DuplicateSid { span, .. }
            | Error::DuplicateName { span, .. }
            | Error::InvalidSocketFormat { span, .. }
            | Error::UnknownReference { span, .. }
            | Error::InvalidPort { span, .. }
            | Error::SlotAlreadyBound { span, .. }
            | Error::UnconnectedLine { span, .. } => *span,
            Error::Load { .. }
            | Error::UnresolvedSlot { .. }
            | Error::AlgebraicLoop { .. }
            | Error::InvalidTemplate { .. } => None,
        }
    }

    /// Attach a span if the error does not carry one yet.
    pub fn with_span(mut self, at: Span) -> Self {
        match &mut self {
            Error::MissingAttribute { span, .. }
            | Error::InvalidAttribute { span, .. }
            | Error::UnknownBlockKind { span, .. }
            | Error::InvalidOperator { span, .. }
            | Error::DuplicateSid { span, .. }
            | Error::DuplicateName { span, .. }
            | Error::InvalidSocketFormat { span, .. }
            | Error::UnknownReference { span, .. }
            | Error::InvalidPort { span, .. }
            | Error::SlotAlreadyBound { span, .. }
            | Error::UnconnectedLine { span, .. } => {
                span.get_or_insert(at);
            }
            Error::Load { .. }
            | Error::UnresolvedSlot { .. }
            | Error::AlgebraicLoop { .. }
            | Error::InvalidTemplate { .. } => {}
        }
        self
    }

    /// Render as a single diagnostic line, with a line number when `source`
    /// is available and the error carries a span.
    pub fn render(&self, source: Option<&str>) -> String {
        match (self.span(), source) {
            (Some(span), Some(src)) => format!(
                "error[{}]: {} (line {})",
                self.code(),
                self,
                span.line_in(src)
            ),
            _ => format!("error[{}]: {}", self.code(), self),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
