//! Collaborator Service Interfaces
//!
//! The resolution stage consumes four services it does not own:
//!
//! - **Type system**: metadata queries (attributes, signatures, overrides)
//! - **Profile store**: per-call-site histograms of observed targets
//! - **Runtime**: inlining and tail-call permission
//! - **Type-fact oracle**: best-effort receiver type facts
//!
//! # Contract
//!
//! Every query is synchronous, side-effect free from this stage's point of
//! view, and answers "not found" with `None` rather than a fault. A guess
//! that is later pruned must therefore leave no trace in any service.

use crate::handles::{CallSiteId, ClassHandle, ExactContext, MethodHandle};
use crate::signature::{CallConv, Signature};
use crate::site::{ReceiverExpr, ReceiverInfo};
use std::fmt::Debug;

// =============================================================================
// Attribute Records
// =============================================================================

/// Class-level facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassAttributes {
    /// Class cannot be subclassed.
    pub is_sealed: bool,
    /// Class is an interface.
    pub is_interface: bool,
    /// Class is a value type.
    pub is_value_type: bool,
    /// Class is abstract.
    pub is_abstract: bool,
}

/// Method-level facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodAttributes {
    /// Class that declares (or for overrides, implements) the method.
    pub owner: ClassHandle,
    /// Method is virtual.
    pub is_virtual: bool,
    /// Method cannot be overridden further.
    pub is_sealed: bool,
    /// Method is static.
    pub is_static: bool,
    /// Method is abstract (no body).
    pub is_abstract: bool,
    /// Method must never be inlined.
    pub is_no_inline: bool,
    /// Method should always be inlined.
    pub is_force_inline: bool,
    /// Method acquires a monitor on entry.
    pub is_synchronized: bool,
    /// Method is a native-interop stub.
    pub is_native_interop: bool,
    /// Method is shared generic code needing an extra type-handle argument.
    pub requires_inst_arg: bool,
}

impl MethodAttributes {
    /// Attributes of a plain, non-virtual instance method on `owner`.
    pub fn instance(owner: ClassHandle) -> Self {
        Self {
            owner,
            is_virtual: false,
            is_sealed: false,
            is_static: false,
            is_abstract: false,
            is_no_inline: false,
            is_force_inline: false,
            is_synchronized: false,
            is_native_interop: false,
            requires_inst_arg: false,
        }
    }

    /// Attributes of a virtual method on `owner`.
    pub fn virtual_method(owner: ClassHandle) -> Self {
        Self {
            is_virtual: true,
            ..Self::instance(owner)
        }
    }

    /// Attributes of a static method on `owner`.
    pub fn static_method(owner: ClassHandle) -> Self {
        Self {
            is_static: true,
            ..Self::instance(owner)
        }
    }
}

/// Facts about a method body that inlining needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodBodyInfo {
    /// Bytecode size in bytes.
    pub il_size: u32,
    /// Maximum evaluation stack depth.
    pub max_stack: u16,
    /// Number of locals.
    pub local_count: u16,
    /// Whether the body contains exception handlers.
    pub has_eh: bool,
}

/// How a call token resolves, as reported by the type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResolution {
    /// Call the method's entry point directly.
    Direct,
    /// Dispatch through a virtual stub.
    VirtualStub {
        /// Whether the stub address is known at compile time.
        address_known: bool,
    },
    /// Dispatch through a fixed vtable slot.
    VTableSlot {
        /// Slot number.
        slot: u16,
    },
    /// Target is a runtime-computed code pointer (shared generic code).
    RuntimeCodePointer,
}

/// Outcome of a speculative class-initialization query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassInitResult {
    /// No initialization needed, or it can be performed at the call site.
    Ok,
    /// Initialization cannot be proven safe; do not inline.
    DontInline,
}

/// Runtime answer to an inlining request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlinePermission {
    /// Inlining allowed.
    Allow,
    /// Inlining denied for this caller.
    Deny,
    /// Inlining denied for every caller; the callee is never inlineable.
    DenyPermanently,
}

// =============================================================================
// Type System
// =============================================================================

/// Metadata queries provided by the type system.
pub trait TypeSystem: Send + Sync + Debug {
    /// Resolve which method `receiver_class` actually invokes for `base_method`.
    fn resolve_virtual_target(
        &self,
        base_method: MethodHandle,
        receiver_class: ClassHandle,
    ) -> Option<(MethodHandle, ExactContext)>;

    /// Class-level attributes.
    fn class_attributes(&self, class: ClassHandle) -> Option<ClassAttributes>;

    /// Method-level attributes.
    fn method_attributes(&self, method: MethodHandle) -> Option<MethodAttributes>;

    /// Method signature.
    fn method_signature(&self, method: MethodHandle) -> Option<Signature>;

    /// Entry point that takes the unboxed `this` for a value-type method.
    fn unboxed_entry(&self, method: MethodHandle) -> Option<MethodHandle>;

    /// Enumerate the complete set of concrete classes implementing `base`.
    ///
    /// Returns `None` when the hierarchy is open or has more than `limit`
    /// members.
    fn enumerate_implementors(
        &self,
        _base: ClassHandle,
        _limit: usize,
    ) -> Option<Vec<ClassHandle>> {
        None
    }

    /// How a call to `method` is reached.
    fn call_resolution(&self, method: MethodHandle) -> Option<CallResolution>;

    /// Bytecode-level body facts, `None` when unavailable.
    fn method_body(&self, method: MethodHandle) -> Option<MethodBodyInfo>;

    /// Whether running `method` under `context` needs class initialization
    /// that cannot be hoisted into the caller.
    fn speculative_class_init(
        &self,
        _method: MethodHandle,
        _context: ExactContext,
    ) -> ClassInitResult {
        ClassInitResult::Ok
    }

    /// Whether the generic context can be embedded as a constant in the
    /// caller rather than looked up at run time.
    fn can_embed_context(&self, _context: ExactContext) -> bool {
        true
    }
}

// =============================================================================
// Profile Store
// =============================================================================

/// Observed-target histograms per call site.
pub trait ProfileStore: Send + Sync + Debug {
    /// Up to `limit` receiver classes, descending by likelihood (0..=100).
    fn likely_classes(&self, site: CallSiteId, limit: usize) -> Vec<(ClassHandle, u32)>;

    /// Up to `limit` target methods, descending by likelihood (0..=100).
    fn likely_methods(&self, site: CallSiteId, limit: usize) -> Vec<(MethodHandle, u32)>;

    /// Whether any profile data exists for the site.
    fn has_profile(&self, site: CallSiteId) -> bool {
        !self.likely_classes(site, 1).is_empty() || !self.likely_methods(site, 1).is_empty()
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Permission queries answered by the runtime.
pub trait Runtime: Send + Sync + Debug {
    /// May `callee` be inlined into `caller`?
    fn can_inline(&self, caller: MethodHandle, callee: MethodHandle) -> InlinePermission;

    /// May the call be dispatched as a tail call?
    ///
    /// `declared` is the nominal callee, `exact` the resolved one when known.
    fn can_tail_call(
        &self,
        caller: MethodHandle,
        declared: Option<MethodHandle>,
        exact: Option<MethodHandle>,
        explicit: bool,
    ) -> bool;

    /// Whether a calling-convention cookie can be materialized for `conv`.
    fn has_convention_cookie(&self, _conv: CallConv) -> bool {
        true
    }
}

// =============================================================================
// Type-Fact Oracle
// =============================================================================

/// Best-effort receiver type facts computed from the receiver expression.
pub trait TypeFactOracle: Debug {
    /// Facts about the receiver of a call.
    fn receiver_fact(&self, receiver: &ReceiverExpr) -> ReceiverInfo;
}

/// Oracle that knows nothing beyond what the receiver expression itself
/// carries.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionOracle;

impl TypeFactOracle for ExpressionOracle {
    fn receiver_fact(&self, receiver: &ReceiverExpr) -> ReceiverInfo {
        receiver.intrinsic_fact()
    }
}
