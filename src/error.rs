//! Error types shared by every pass: precondition failure and missing
//! dependency. Resource exhaustion is not given a variant here — it isn't
//! expected at this layer and simply propagates upward (an allocation
//! failure still just aborts the process). A `thiserror`-derived enum lets
//! a host compiler's diagnostics engine match on these programmatically.

use crate::ir::Instruction;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PassError {
    /// A malformed IR shape the pass is not designed to handle: e.g.
    /// thread-local *multi-qual* storage, or an
    /// ill-formed store whose value operand is not produced by an
    /// `InsertField`.
    #[error("{pass}: precondition failed: {message}{}", instruction.as_ref().map(|i| format!(" (at `{i}`)")).unwrap_or_default())]
    Precondition { pass: &'static str, message: String, instruction: Option<Instruction> },

    /// A required analysis result is absent at the point a later pass needs
    /// it (e.g. Check-Removal requires Block-Splitter to have already run).
    #[error("{pass}: missing required dependency `{dependency}`")]
    MissingDependency { pass: &'static str, dependency: &'static str },
}

pub type PassResult<T> = Result<T, PassError>;
