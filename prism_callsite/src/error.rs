//! Hard Failures and Inline Aborts
//!
//! Soft verdicts (why a call was not devirtualized, not inlined, not tail
//! called) are ordinary values defined next to the stage that produces them.
//! This module holds the two categories that are not:
//!
//! - [`CompileError`]: malformed input; compilation of the enclosing method
//!   is abandoned.
//! - [`InlineAbort`]: the call site cannot be compiled inside an inlinee; the
//!   enclosing inline attempt is abandoned and the call stays a call.

use crate::handles::CallSiteId;
use thiserror::Error;

/// Malformed-input conditions that abort compilation of the method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// `tail.` prefixed call with values left on the evaluation stack.
    #[error("explicit tail call at {site} with {depth} value(s) left on the evaluation stack")]
    TailCallStackNotEmpty { site: CallSiteId, depth: usize },

    /// Call flags that the importer can never legitimately produce.
    #[error("inconsistent call flags at {site}: {detail}")]
    InconsistentCallFlags {
        site: CallSiteId,
        detail: &'static str,
    },

    /// Virtual call with no receiver.
    #[error("virtual call at {site} has no receiver")]
    MissingReceiver { site: CallSiteId },

    /// Call with neither a method token nor a function pointer.
    #[error("call at {site} names no target")]
    MissingCallTarget { site: CallSiteId },

    /// The type system could not resolve the call token.
    #[error("call token at {site} could not be resolved")]
    UnresolvedToken { site: CallSiteId },

    /// Indirect call needs a convention cookie the runtime cannot provide.
    #[error("calling-convention cookie unavailable for indirect call at {site}")]
    CookieUnavailable { site: CallSiteId },
}

/// Result type for operations that may hit a hard failure.
pub type CompileResult<T> = Result<T, CompileError>;

/// Why a call site forces the enclosing inline attempt to be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InlineAbort {
    /// The callee's generic context needs a runtime lookup that cannot be
    /// embedded in an inlinee.
    #[error("generic context lookup cannot be embedded in an inlinee")]
    ContextNotEmbeddable,
}
