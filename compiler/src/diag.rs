// diag.rs — Code generation errors and stable diagnostic codes
//
// Every failure is fatal: the first error aborts the pass and is returned
// to the caller. There is no degraded-output path.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    pub const E0100: DiagCode = DiagCode("E0100"); // unsupported statement
    pub const E0101: DiagCode = DiagCode("E0101"); // unsupported task type
    pub const E0102: DiagCode = DiagCode("E0102"); // unsupported operator
    pub const E0103: DiagCode = DiagCode("E0103"); // unsupported primitive type
    pub const E0200: DiagCode = DiagCode("E0200"); // IR contract violation
    pub const E0300: DiagCode = DiagCode("E0300"); // AOT packaging
    pub const E0400: DiagCode = DiagCode("E0400"); // I/O
    pub const E0401: DiagCode = DiagCode("E0401"); // JSON
}

// ── Error ────────────────────────────────────────────────────────────────

pub type Result<T, E = CodegenError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// A statement kind outside the subset this backend lowers.
    #[error("unsupported statement `{stmt}` in task {task}")]
    UnsupportedStmt { task: String, stmt: String },

    /// A task kind outside serial / range_for / vertex_for / fragment_for.
    #[error("unsupported task type `{kind}` in kernel {kernel}")]
    UnsupportedTask { kernel: String, kind: String },

    #[error("unsupported {what} `{op}` in task {task}")]
    UnsupportedOp {
        task: String,
        what: &'static str,
        op: String,
    },

    #[error("unsupported primitive type `{ty}` in {context} (task {task})")]
    UnsupportedType {
        task: String,
        ty: String,
        context: &'static str,
    },

    /// The upstream IR broke an invariant the emitter relies on.
    #[error("IR contract violation in {scope}: {reason}")]
    ContractViolation { scope: String, reason: String },

    #[error("AOT: {reason}")]
    Aot { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CodegenError {
    pub fn code(&self) -> DiagCode {
        match self {
            CodegenError::UnsupportedStmt { .. } => codes::E0100,
            CodegenError::UnsupportedTask { .. } => codes::E0101,
            CodegenError::UnsupportedOp { .. } => codes::E0102,
            CodegenError::UnsupportedType { .. } => codes::E0103,
            CodegenError::ContractViolation { .. } => codes::E0200,
            CodegenError::Aot { .. } => codes::E0300,
            CodegenError::Io(_) => codes::E0400,
            CodegenError::Json(_) => codes::E0401,
        }
    }

    pub fn contract(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        CodegenError::ContractViolation {
            scope: scope.into(),
            reason: reason.into(),
        }
    }

    /// `error[CODE]: message`, the CLI rendering.
    pub fn render(&self) -> String {
        format!("error[{}]: {}", self.code(), self)
    }
}
