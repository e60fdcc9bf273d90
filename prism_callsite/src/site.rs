//! Call Site Records
//!
//! A [`CallSite`] is one call instruction's resolved state. It is owned by
//! the importer that built it and passed by exclusive reference through the
//! pipeline stages, each of which updates it in place.
//!
//! # Invariants
//!
//! - Once devirtualization commits a call to [`CallKind::Direct`] the kind is
//!   frozen; nothing moves it back to a dispatch kind.
//! - A guard is only attached while its candidate set is non-empty.
//! - Inline candidate info only exists for an eligible target.

use crate::error::{CompileError, CompileResult, InlineAbort};
use crate::guarded::GuardedDevirtualization;
use crate::handles::{CallSiteId, ClassHandle, ExactContext, ExprId, LocalId, MethodHandle};
use crate::inline::InlineCandidateInfo;
use crate::services::MethodAttributes;
use crate::signature::Signature;
use crate::tailcall::TailCallVerdict;
use smallvec::SmallVec;
use std::mem;

// =============================================================================
// Call Kind
// =============================================================================

/// Where a virtual stub's address comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubAddress {
    /// Known when compiling.
    Known,
    /// Computed by a runtime lookup tree.
    RuntimeLookup,
}

/// How the target of a call is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Direct call to a known entry point.
    Direct,
    /// Interface or virtual dispatch through a stub.
    VirtualDispatchStub { address: StubAddress },
    /// Virtual dispatch through a fixed vtable slot.
    VirtualDispatchVTable { slot: u16 },
    /// Call through a runtime-computed code pointer (shared generic code).
    IndirectThroughResolvedFunctionPointer,
    /// Call through a function pointer on the evaluation stack.
    IndirectCalli,
}

impl CallKind {
    /// Whether the call dispatches on the receiver's runtime type.
    #[inline]
    pub fn is_virtual_dispatch(self) -> bool {
        matches!(
            self,
            CallKind::VirtualDispatchStub { .. } | CallKind::VirtualDispatchVTable { .. }
        )
    }

    /// Whether the call goes through a function pointer.
    #[inline]
    pub fn is_indirect(self) -> bool {
        matches!(
            self,
            CallKind::IndirectThroughResolvedFunctionPointer | CallKind::IndirectCalli
        )
    }

    /// Whether two kinds are the same classification, ignoring how a stub
    /// address or vtable slot is obtained.
    #[inline]
    pub fn same_kind(self, other: CallKind) -> bool {
        mem::discriminant(&self) == mem::discriminant(&other)
    }

    /// Short name for logging.
    pub fn name(self) -> &'static str {
        match self {
            CallKind::Direct => "direct",
            CallKind::VirtualDispatchStub { .. } => "vsd",
            CallKind::VirtualDispatchVTable { .. } => "vtable",
            CallKind::IndirectThroughResolvedFunctionPointer => "indirect-fptr",
            CallKind::IndirectCalli => "calli",
        }
    }
}

// =============================================================================
// Receiver
// =============================================================================

/// How precisely the receiver's class is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Exactness {
    /// Nothing is known.
    Unknown,
    /// The class is a lower bound; the object may be a subclass.
    KnownNotExact,
    /// The class is exact, or sealed so no subclass exists.
    ExactOrSealed,
}

/// Best-effort type fact about a call's receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverInfo {
    /// Declared or observed class of the receiver.
    pub class: Option<ClassHandle>,
    /// Precision of `class`.
    pub exactness: Exactness,
    /// Whether the receiver is proven non-null.
    pub proven_non_null: bool,
}

impl ReceiverInfo {
    /// No information at all.
    pub const UNKNOWN: ReceiverInfo = ReceiverInfo {
        class: None,
        exactness: Exactness::Unknown,
        proven_non_null: false,
    };

    /// An exact (or sealed) receiver class.
    pub fn exact(class: ClassHandle) -> Self {
        Self {
            class: Some(class),
            exactness: Exactness::ExactOrSealed,
            proven_non_null: false,
        }
    }

    /// A lower-bound receiver class.
    pub fn not_exact(class: ClassHandle) -> Self {
        Self {
            class: Some(class),
            exactness: Exactness::KnownNotExact,
            proven_non_null: false,
        }
    }

    /// Mark the receiver as proven non-null.
    pub fn non_null(mut self) -> Self {
        self.proven_non_null = true;
        self
    }

    /// Whether the class is known to be exact.
    #[inline]
    pub fn is_exact(&self) -> bool {
        self.exactness == Exactness::ExactOrSealed && self.class.is_some()
    }
}

/// A visible boxing operation feeding the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxExpr {
    /// The value being boxed.
    pub value: ExprId,
    /// The value type being boxed.
    pub class: ClassHandle,
    /// Consumers of the box other than this call.
    pub other_uses: u32,
}

/// The receiver expression of an instance call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverExpr {
    /// Opaque importer expression with whatever static facts it carries.
    Value {
        expr: ExprId,
        class: Option<ClassHandle>,
        exact: bool,
        non_null: bool,
    },
    /// Result of a visible box.
    Boxed(BoxExpr),
    /// Local copy of a value produced when a box is eliminated.
    UnboxedLocal { local: LocalId, value: ExprId, class: ClassHandle },
    /// Address of the payload within a box that is kept alive.
    BoxPayload { boxed: Box<ReceiverExpr>, class: ClassHandle },
}

impl ReceiverExpr {
    /// An opaque receiver with no static facts.
    pub fn opaque(expr: ExprId) -> Self {
        ReceiverExpr::Value {
            expr,
            class: None,
            exact: false,
            non_null: false,
        }
    }

    /// An opaque receiver with a static class.
    pub fn typed(expr: ExprId, class: ClassHandle, exact: bool) -> Self {
        ReceiverExpr::Value {
            expr,
            class: Some(class),
            exact,
            non_null: false,
        }
    }

    /// Facts readable from the expression alone.
    pub fn intrinsic_fact(&self) -> ReceiverInfo {
        match *self {
            ReceiverExpr::Value {
                class,
                exact,
                non_null,
                ..
            } => {
                let exactness = match (class, exact) {
                    (None, _) => Exactness::Unknown,
                    (Some(_), true) => Exactness::ExactOrSealed,
                    (Some(_), false) => Exactness::KnownNotExact,
                };
                ReceiverInfo {
                    class,
                    exactness,
                    proven_non_null: non_null,
                }
            }
            ReceiverExpr::Boxed(BoxExpr { class, .. })
            | ReceiverExpr::UnboxedLocal { class, .. }
            | ReceiverExpr::BoxPayload { class, .. } => ReceiverInfo::exact(class).non_null(),
        }
    }
}

/// An explicit (non-receiver) call argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallArg {
    /// Importer expression.
    Expr(ExprId),
    /// Owning type handle for shared generic code.
    TypeHandle(ClassHandle),
    /// Exact method handle for shared generic methods.
    MethodHandle(MethodHandle),
}

// =============================================================================
// Call Descriptor
// =============================================================================

/// What the call instruction names as its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// A method token.
    Token(MethodHandle),
    /// No token; the target comes from the evaluation stack.
    Indirect {
        /// Whether a function pointer value is on the stack.
        fn_ptr_on_stack: bool,
    },
}

/// Raw call instruction as decoded by the importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    /// Named target.
    pub target: CallTarget,
    /// Call-site signature.
    pub sig: Signature,
    /// Instruction requests virtual dispatch.
    pub is_virtual: bool,
    /// Target is an interface method.
    pub is_interface: bool,
    /// Target is a delegate's `Invoke`.
    pub is_delegate_invoke: bool,
    /// `tail.` prefix present.
    pub explicit_tail: bool,
    /// Call is in tail position without a prefix.
    pub implicit_tail: bool,
}

impl CallDescriptor {
    /// A call naming `method`.
    pub fn token(method: MethodHandle, sig: Signature) -> Self {
        Self {
            target: CallTarget::Token(method),
            sig,
            is_virtual: false,
            is_interface: false,
            is_delegate_invoke: false,
            explicit_tail: false,
            implicit_tail: false,
        }
    }

    /// An indirect call through a stack function pointer.
    pub fn calli(sig: Signature) -> Self {
        Self {
            target: CallTarget::Indirect {
                fn_ptr_on_stack: true,
            },
            ..Self::token(MethodHandle::new(0), sig)
        }
    }

    /// The method token, if any.
    #[inline]
    pub fn method(&self) -> Option<MethodHandle> {
        match self.target {
            CallTarget::Token(m) => Some(m),
            CallTarget::Indirect { .. } => None,
        }
    }
}

// =============================================================================
// Caller Context
// =============================================================================

/// Facts about the method being compiled that contains the call.
#[derive(Debug, Clone)]
pub struct CallerContext {
    /// The caller.
    pub method: MethodHandle,
    /// Caller's own signature.
    pub signature: Signature,
    /// Optimizations are disabled for the caller.
    pub opts_disabled: bool,
    /// Inlining is disabled for the caller.
    pub inlining_disabled: bool,
    /// Caller uses a "capture next return address" construct.
    pub captures_return_address: bool,
    /// Caller acquires a monitor on entry.
    pub is_synchronized: bool,
    /// Caller is entered from native code.
    pub is_reverse_pinvoke: bool,
    /// Caller is itself being compiled as an inlinee.
    pub is_inlinee: bool,
    next_local: u32,
}

impl CallerContext {
    /// Create a context for `method` with default flags.
    pub fn new(method: MethodHandle, signature: Signature) -> Self {
        Self {
            method,
            signature,
            opts_disabled: false,
            inlining_disabled: false,
            captures_return_address: false,
            is_synchronized: false,
            is_reverse_pinvoke: false,
            is_inlinee: false,
            next_local: 0,
        }
    }

    /// Set the first temp number (the caller's declared local count).
    pub fn with_local_count(mut self, count: u32) -> Self {
        self.next_local = count;
        self
    }

    /// Allocate a fresh temporary.
    pub fn grab_temp(&mut self) -> LocalId {
        let local = LocalId(self.next_local);
        self.next_local += 1;
        local
    }

    /// Number of locals, including temps allocated so far.
    #[inline]
    pub fn local_count(&self) -> u32 {
        self.next_local
    }
}

// =============================================================================
// Call Site
// =============================================================================

/// One call instruction's resolved state.
#[derive(Debug, Clone)]
pub struct CallSite {
    /// Identity of the call instruction.
    pub id: CallSiteId,
    kind: CallKind,
    /// Receiver fact, filled in once by the type-fact oracle.
    pub receiver: Option<ReceiverInfo>,
    /// Receiver expression for instance calls.
    pub receiver_expr: Option<ReceiverExpr>,
    /// Explicit arguments, excluding the receiver.
    pub args: SmallVec<[CallArg; 4]>,
    /// Call requests virtual dispatch.
    pub is_virtual: bool,
    /// Call targets an interface method.
    pub is_interface_call: bool,
    /// Call is a delegate `Invoke`.
    pub is_delegate_invoke: bool,
    /// `tail.` prefix present.
    pub is_explicit_tail: bool,
    /// Call sits in tail position without a prefix.
    pub is_implicit_tail: bool,
    /// Nominal or resolved target.
    pub callee: Option<MethodHandle>,
    declared_callee: Option<MethodHandle>,
    /// Attributes of `callee`.
    pub callee_attrs: Option<MethodAttributes>,
    /// Call-site signature, including its calling convention.
    pub signature: Signature,
    /// Generic context the callee runs under.
    pub generic_context: Option<ExactContext>,
    /// Call is a runtime helper call.
    pub is_helper: bool,
    /// Call is a cast helper whose object class is profiled.
    pub is_cast_helper: bool,
    /// Call sits in a rarely executed block.
    pub is_rarely_run: bool,
    /// Call sits inside an exception handler region.
    pub in_handler_region: bool,
    /// Delegate binding supports closed static targets.
    pub delegate_binds_static: bool,
    /// Receiver must be null-checked before a direct call.
    pub requires_null_check: bool,
    devirtualized: bool,
    guard: Option<GuardedDevirtualization>,
    inline_info: Option<InlineCandidateInfo>,
    tail_call: Option<TailCallVerdict>,
    inline_abort: Option<InlineAbort>,
}

impl CallSite {
    /// Create a call site with the given classification.
    pub fn new(
        id: CallSiteId,
        kind: CallKind,
        callee: Option<MethodHandle>,
        signature: Signature,
    ) -> Self {
        Self {
            id,
            kind,
            receiver: None,
            receiver_expr: None,
            args: SmallVec::new(),
            is_virtual: false,
            is_interface_call: false,
            is_delegate_invoke: false,
            is_explicit_tail: false,
            is_implicit_tail: false,
            callee,
            declared_callee: callee,
            callee_attrs: None,
            signature,
            generic_context: None,
            is_helper: false,
            is_cast_helper: false,
            is_rarely_run: false,
            in_handler_region: false,
            delegate_binds_static: false,
            requires_null_check: false,
            devirtualized: false,
            guard: None,
            inline_info: None,
            tail_call: None,
            inline_abort: None,
        }
    }

    /// Mark as a virtual call.
    pub fn virtual_call(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Mark as an interface call (implies virtual).
    pub fn interface_call(mut self) -> Self {
        self.is_virtual = true;
        self.is_interface_call = true;
        self
    }

    /// Mark as a delegate invoke.
    pub fn delegate_invoke(mut self) -> Self {
        self.is_delegate_invoke = true;
        self
    }

    /// Set the receiver expression.
    pub fn with_receiver_expr(mut self, expr: ReceiverExpr) -> Self {
        self.receiver_expr = Some(expr);
        self
    }

    /// Set the receiver fact directly.
    pub fn with_receiver(mut self, info: ReceiverInfo) -> Self {
        self.receiver = Some(info);
        self
    }

    /// Set callee attributes.
    pub fn with_callee_attrs(mut self, attrs: MethodAttributes) -> Self {
        self.callee_attrs = Some(attrs);
        self
    }

    /// Set explicit arguments.
    pub fn with_args(mut self, args: &[CallArg]) -> Self {
        self.args = args.iter().copied().collect();
        self
    }

    /// Request an explicit tail call.
    pub fn explicit_tail(mut self) -> Self {
        self.is_explicit_tail = true;
        self
    }

    /// Mark as an implicit tail call candidate.
    pub fn implicit_tail(mut self) -> Self {
        self.is_implicit_tail = true;
        self
    }

    /// Current classification.
    #[inline]
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// Whether devirtualization committed this call to a direct call.
    #[inline]
    pub fn is_devirtualized(&self) -> bool {
        self.devirtualized
    }

    /// Target named by the call instruction, before any rewrite.
    #[inline]
    pub fn declared_callee(&self) -> Option<MethodHandle> {
        self.declared_callee
    }

    /// Attached guarded devirtualization, if any.
    #[inline]
    pub fn guard(&self) -> Option<&GuardedDevirtualization> {
        self.guard.as_ref()
    }

    /// Mutable access to the attached guard.
    #[inline]
    pub(crate) fn guard_mut(&mut self) -> Option<&mut GuardedDevirtualization> {
        self.guard.as_mut()
    }

    /// Attached inline candidate info, if any.
    #[inline]
    pub fn inline_info(&self) -> Option<&InlineCandidateInfo> {
        self.inline_info.as_ref()
    }

    /// Tail-call verdict, once computed.
    #[inline]
    pub fn tail_call(&self) -> Option<&TailCallVerdict> {
        self.tail_call.as_ref()
    }

    /// Inline abort recorded while evaluating this site.
    #[inline]
    pub fn inline_abort(&self) -> Option<InlineAbort> {
        self.inline_abort
    }

    /// Whether any tail call was requested.
    #[inline]
    pub fn has_tail_request(&self) -> bool {
        self.is_explicit_tail || self.is_implicit_tail
    }

    /// Check the flag combination is one the importer can produce.
    pub fn validate(&self) -> CompileResult<()> {
        if self.is_interface_call && !self.is_virtual {
            return Err(CompileError::InconsistentCallFlags {
                site: self.id,
                detail: "interface call without virtual dispatch",
            });
        }
        if self.is_explicit_tail && self.is_implicit_tail {
            return Err(CompileError::InconsistentCallFlags {
                site: self.id,
                detail: "both explicit and implicit tail call",
            });
        }
        if self.kind.is_virtual_dispatch() && !self.is_virtual && !self.devirtualized {
            return Err(CompileError::InconsistentCallFlags {
                site: self.id,
                detail: "dispatch kind on a non-virtual call",
            });
        }
        if self.is_virtual && self.callee.is_none() {
            return Err(CompileError::InconsistentCallFlags {
                site: self.id,
                detail: "virtual call without a method token",
            });
        }
        if self.is_virtual && self.receiver_expr.is_none() && self.receiver.is_none() {
            return Err(CompileError::MissingReceiver { site: self.id });
        }
        Ok(())
    }

    /// Commit the call to a direct call of `method`.
    pub(crate) fn retarget_direct(&mut self, method: MethodHandle, context: ExactContext) {
        self.kind = CallKind::Direct;
        self.callee = Some(method);
        self.generic_context = Some(context);
        self.is_virtual = false;
        self.is_interface_call = false;
        self.devirtualized = true;
    }

    /// Move the call back to `kind`.
    ///
    /// Refused (returns `false`) once the call has been devirtualized and
    /// `kind` is not `Direct`.
    pub(crate) fn restore_kind(&mut self, kind: CallKind) -> bool {
        if self.devirtualized && kind != CallKind::Direct {
            return false;
        }
        self.kind = kind;
        true
    }

    /// Drop any attached guard and inline info.
    pub(crate) fn discard_attached(&mut self) {
        self.guard = None;
        self.inline_info = None;
    }

    pub(crate) fn set_guard(&mut self, guard: GuardedDevirtualization) {
        self.guard = Some(guard);
    }

    pub(crate) fn take_guard(&mut self) -> Option<GuardedDevirtualization> {
        self.guard.take()
    }

    pub(crate) fn set_inline_info(&mut self, info: Option<InlineCandidateInfo>) {
        self.inline_info = info;
    }

    pub(crate) fn set_tail_call(&mut self, verdict: TailCallVerdict) {
        self.tail_call = Some(verdict);
    }

    pub(crate) fn mark_inline_abort(&mut self, abort: InlineAbort) {
        self.inline_abort = Some(abort);
    }
}
