//! Tail-Call Legality
//!
//! Decides whether a call in tail position may reuse the caller's frame.
//! Local checks run first, in a fixed order, and the first one that fails
//! becomes the recorded reason; the runtime is only asked when every local
//! check passed.
//!
//! An explicit `tail.` call with values still on the evaluation stack is
//! malformed input and fails compilation rather than producing a verdict.

mod returns;

pub use returns::returns_compatible;

use crate::config::PipelineConfig;
use crate::error::{CompileError, CompileResult};
use crate::services::Runtime;
use crate::signature::CallConv;
use crate::site::{CallKind, CallSite, CallerContext};
use tracing::{debug, trace};

/// Why a call is not dispatched as a tail call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TailCallReason {
    /// No tail call was requested.
    NotRequested,
    /// Implicit tail calls are disabled.
    ImplicitDisabled,
    /// The caller is synchronized.
    CallerSynchronized,
    /// The caller is a reverse native-interop entry point.
    CallerReversePInvoke,
    /// Caller or callee uses the caller-pop varargs convention.
    CallerPopVarArgs,
    /// The callee is native code.
    CalleeNative,
    /// The indirect call needs a convention cookie.
    IndirectCookie,
    /// The callee's return type cannot stand in for the caller's.
    ReturnTypeMismatch,
    /// The runtime refused.
    RuntimeVeto,
}

impl TailCallReason {
    /// Human-readable reason.
    pub fn description(self) -> &'static str {
        match self {
            Self::NotRequested => "no tail call requested",
            Self::ImplicitDisabled => "implicit tail calls disabled",
            Self::CallerSynchronized => "caller is synchronized",
            Self::CallerReversePInvoke => "caller is reverse p/invoke",
            Self::CallerPopVarArgs => "caller-pop varargs",
            Self::CalleeNative => "callee is native",
            Self::IndirectCookie => "indirect call needs cookie",
            Self::ReturnTypeMismatch => "return types incompatible",
            Self::RuntimeVeto => "runtime veto",
        }
    }
}

/// Tail-call decision for one call site.
///
/// Once denied a verdict stays denied, and the first reason is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailCallVerdict {
    allowed: bool,
    reason: Option<TailCallReason>,
    /// Whether the request was an explicit `tail.` prefix.
    pub explicit: bool,
}

impl TailCallVerdict {
    /// An allowed verdict.
    pub fn allowed(explicit: bool) -> Self {
        Self {
            allowed: true,
            reason: None,
            explicit,
        }
    }

    /// Verdict for a call that asked for nothing.
    pub fn not_requested() -> Self {
        let mut verdict = Self::allowed(false);
        verdict.deny(TailCallReason::NotRequested);
        verdict
    }

    /// Deny the tail call. A second denial keeps the first reason.
    pub fn deny(&mut self, reason: TailCallReason) {
        if self.allowed {
            self.allowed = false;
            self.reason = Some(reason);
        }
    }

    /// Whether the tail call is allowed.
    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Reason for denial.
    #[inline]
    pub fn reason(&self) -> Option<TailCallReason> {
        self.reason
    }
}

/// Checks tail-call legality.
#[derive(Debug, Clone, Copy)]
pub struct TailCallChecker<'a> {
    config: &'a PipelineConfig,
    runtime: &'a dyn Runtime,
}

impl<'a> TailCallChecker<'a> {
    /// Create a checker.
    pub fn new(config: &'a PipelineConfig, runtime: &'a dyn Runtime) -> Self {
        Self { config, runtime }
    }

    /// Check `site` with `stack_depth` values left on the evaluation stack
    /// beneath the call's arguments.
    pub fn check(
        &self,
        site: &CallSite,
        caller: &CallerContext,
        stack_depth: usize,
    ) -> CompileResult<TailCallVerdict> {
        let explicit = site.is_explicit_tail;
        if explicit && stack_depth > 0 {
            return Err(CompileError::TailCallStackNotEmpty {
                site: site.id,
                depth: stack_depth,
            });
        }
        if !site.has_tail_request() {
            return Ok(TailCallVerdict::not_requested());
        }

        let mut verdict = TailCallVerdict::allowed(explicit);
        if !explicit && !self.config.enable_implicit_tail_calls {
            verdict.deny(TailCallReason::ImplicitDisabled);
        }

        let callee_native = site.callee_attrs.is_some_and(|a| a.is_native_interop);
        if caller.is_synchronized {
            verdict.deny(TailCallReason::CallerSynchronized);
        }
        if caller.is_reverse_pinvoke {
            verdict.deny(TailCallReason::CallerReversePInvoke);
        }
        if caller.signature.conv == CallConv::VarArgs || site.signature.conv == CallConv::VarArgs {
            verdict.deny(TailCallReason::CallerPopVarArgs);
        }
        if callee_native {
            verdict.deny(TailCallReason::CalleeNative);
        }
        if site.kind() == CallKind::IndirectCalli && site.signature.conv.needs_cookie() {
            verdict.deny(TailCallReason::IndirectCookie);
        }

        let both_managed = !callee_native
            && caller.signature.conv == CallConv::Managed
            && site.signature.conv == CallConv::Managed;
        if !returns_compatible(
            caller.signature.ret,
            site.signature.ret,
            explicit,
            both_managed,
            self.config.target_abi,
        ) {
            verdict.deny(TailCallReason::ReturnTypeMismatch);
        }

        if verdict.is_allowed() {
            let exact = match site.kind() {
                CallKind::Direct => site.callee,
                _ => None,
            };
            let declared = site.declared_callee();
            if !self.runtime.can_tail_call(caller.method, declared, exact, explicit) {
                verdict.deny(TailCallReason::RuntimeVeto);
            }
        } else {
            trace!(site = %site.id, "skipping runtime tail-call query");
        }

        debug!(
            site = %site.id,
            explicit,
            allowed = verdict.is_allowed(),
            reason = verdict.reason().map(|r| r.description()),
            "tail call checked"
        );
        Ok(verdict)
    }
}
