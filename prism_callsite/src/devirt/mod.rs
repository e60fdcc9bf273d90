//! Devirtualization
//!
//! Rewrites a virtual call into a direct call when the receiver's type facts
//! prove that only one method can be invoked.
//!
//! # Algorithm
//!
//! 1. Reject calls whose nominal method is not actually virtual
//! 2. Without a receiver type, hand the call to guarded devirtualization
//!    (early pass) or give up (late pass)
//! 3. An interface receiver class is only a lower bound; hand off
//! 4. Resolve the method the receiver class would dispatch to
//! 5. Commit if the receiver class is exact or sealed, or the resolved method
//!    is sealed on a class-virtual call
//! 6. For value-type targets, switch to the unboxed entry and rewrite the
//!    receiver (see [`unbox`])
//!
//! Every "hand off" builds guarded-devirtualization candidates and attaches
//! them to the call site when any survive.

mod unbox;

pub use unbox::UnboxRewrite;
pub(crate) use unbox::unboxed_entry_for;

use crate::config::PipelineConfig;
use crate::error::{CompileError, CompileResult};
use crate::guarded::{GuardBuilder, GuardedDevirtualization};
use crate::handles::{ExactContext, MethodHandle};
use crate::services::TypeSystem;
use crate::site::{CallSite, CallerContext, Exactness, ReceiverInfo};
use tracing::{debug, trace};

// =============================================================================
// Results
// =============================================================================

/// Which devirtualization opportunity is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevirtPass {
    /// While importing the call.
    Early,
    /// Second chance after later optimizations sharpened type facts.
    Late,
}

/// Why a virtual call stayed virtual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotDevirtualizedReason {
    /// Devirtualization is disabled by configuration.
    Disabled,
    /// The call does not request virtual dispatch.
    NotVirtualCall,
    /// Metadata says the nominal method is not virtual.
    NotActuallyVirtual,
    /// No metadata for the nominal method.
    MissingMetadata,
    /// Nothing is known about the receiver type.
    NoTypeInfo,
    /// Nothing is known about the receiver type on the late pass.
    NoTypeInfoLatePass,
    /// The receiver class is an interface.
    InterfaceLowerBound,
    /// The type system could not resolve the target.
    ResolutionFailed,
    /// The target resolved but nothing proves it is the only one.
    NoProof,
}

impl NotDevirtualizedReason {
    /// Human-readable reason.
    pub fn description(self) -> &'static str {
        match self {
            Self::Disabled => "devirtualization disabled",
            Self::NotVirtualCall => "not a virtual call",
            Self::NotActuallyVirtual => "not actually virtual",
            Self::MissingMetadata => "no metadata for base method",
            Self::NoTypeInfo => "no type info",
            Self::NoTypeInfoLatePass => "no type info, late pass",
            Self::InterfaceLowerBound => "receiver class is an interface",
            Self::ResolutionFailed => "could not resolve target",
            Self::NoProof => "target not proven unique",
        }
    }

    /// Whether guarded devirtualization should be attempted instead.
    pub fn delegates_to_guard(self) -> bool {
        matches!(
            self,
            Self::NoTypeInfo | Self::InterfaceLowerBound | Self::ResolutionFailed | Self::NoProof
        )
    }
}

/// Outcome of one devirtualization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevirtualizationResult {
    /// The call stays virtual (a guard may have been attached).
    NotDevirtualized { reason: NotDevirtualizedReason },
    /// The call is now direct.
    Devirtualized {
        /// Method the call now targets (before unboxing).
        method: MethodHandle,
        /// Generic context of `method`.
        exact_context: ExactContext,
        /// Whether the receiver still needs a null check.
        requires_null_check: bool,
        /// Unboxed entry the call was retargeted to.
        unboxed_entry: Option<MethodHandle>,
        /// Whether the receiver's box allocation was removed.
        box_removed: bool,
    },
}

impl DevirtualizationResult {
    /// Whether the call was devirtualized.
    #[inline]
    pub fn is_devirtualized(&self) -> bool {
        matches!(self, DevirtualizationResult::Devirtualized { .. })
    }

    /// Failure reason, if the call stayed virtual.
    #[inline]
    pub fn reason(&self) -> Option<NotDevirtualizedReason> {
        match *self {
            DevirtualizationResult::NotDevirtualized { reason } => Some(reason),
            DevirtualizationResult::Devirtualized { .. } => None,
        }
    }
}

// =============================================================================
// Devirtualizer
// =============================================================================

/// Devirtualizes calls using receiver type facts.
#[derive(Debug, Clone, Copy)]
pub struct Devirtualizer<'a> {
    config: &'a PipelineConfig,
    types: &'a dyn TypeSystem,
    guards: Option<GuardBuilder<'a>>,
}

impl<'a> Devirtualizer<'a> {
    /// Create a devirtualizer that never attempts guarded devirtualization.
    pub fn new(config: &'a PipelineConfig, types: &'a dyn TypeSystem) -> Self {
        Self {
            config,
            types,
            guards: None,
        }
    }

    /// Hand unprovable calls to `guards`.
    pub fn with_guards(mut self, guards: GuardBuilder<'a>) -> Self {
        self.guards = Some(guards);
        self
    }

    /// Try to devirtualize `site` given what is known about its receiver.
    ///
    /// Soft failures are reported in the result; only a virtual call with no
    /// method token is an error.
    pub fn devirtualize(
        &self,
        site: &mut CallSite,
        receiver: &ReceiverInfo,
        pass: DevirtPass,
        caller: &mut CallerContext,
    ) -> CompileResult<DevirtualizationResult> {
        if !site.is_virtual {
            return Ok(self.fail(site, NotDevirtualizedReason::NotVirtualCall, pass, caller));
        }
        let Some(base) = site.callee else {
            return Err(CompileError::InconsistentCallFlags {
                site: site.id,
                detail: "virtual call without a method token",
            });
        };
        site.receiver = Some(*receiver);

        if !self.config.enable_devirtualization {
            return Ok(self.fail(site, NotDevirtualizedReason::Disabled, pass, caller));
        }
        let Some(base_attrs) = self.types.method_attributes(base) else {
            return Ok(self.fail(site, NotDevirtualizedReason::MissingMetadata, pass, caller));
        };
        if !base_attrs.is_virtual {
            return Ok(self.fail(site, NotDevirtualizedReason::NotActuallyVirtual, pass, caller));
        }

        let class = match (receiver.exactness, receiver.class) {
            (Exactness::Unknown, _) | (_, None) => {
                let reason = match pass {
                    DevirtPass::Early => NotDevirtualizedReason::NoTypeInfo,
                    DevirtPass::Late => NotDevirtualizedReason::NoTypeInfoLatePass,
                };
                return Ok(self.fail(site, reason, pass, caller));
            }
            (_, Some(class)) => class,
        };

        let Some(class_attrs) = self.types.class_attributes(class) else {
            return Ok(self.fail(site, NotDevirtualizedReason::ResolutionFailed, pass, caller));
        };
        if class_attrs.is_interface {
            return Ok(self.fail(site, NotDevirtualizedReason::InterfaceLowerBound, pass, caller));
        }

        let resolved = self
            .types
            .resolve_virtual_target(base, class)
            .and_then(|(m, ctx)| self.types.method_attributes(m).map(|a| (m, ctx, a)));
        let Some((method, context, method_attrs)) = resolved else {
            return Ok(self.fail(site, NotDevirtualizedReason::ResolutionFailed, pass, caller));
        };

        let proven = receiver.is_exact()
            || class_attrs.is_sealed
            || (!site.is_interface_call && method_attrs.is_sealed);
        if !proven {
            trace!(site = %site.id, %class, %method, "devirtualization target not proven unique");
            return Ok(self.fail(site, NotDevirtualizedReason::NoProof, pass, caller));
        }

        // Commit. Anything attached for the old classification is stale.
        site.discard_attached();
        site.retarget_direct(method, context);
        site.callee_attrs = Some(method_attrs);
        site.requires_null_check = !receiver.proven_non_null;

        let mut unboxed_entry = None;
        let mut box_removed = false;
        if let Some(entry) = unboxed_entry_for(self.types, method) {
            let owner = method_attrs.owner;
            let rewrite =
                unbox::retarget_to_unboxed_entry(site, entry, owner, self.types, caller);
            unboxed_entry = Some(entry);
            box_removed = rewrite == UnboxRewrite::BoxEliminated;
            trace!(site = %site.id, %method, %entry, ?rewrite, "retargeted to unboxed entry");
        }

        debug!(
            site = %site.id,
            %base,
            %method,
            ?pass,
            null_check = site.requires_null_check,
            "devirtualized call"
        );
        Ok(DevirtualizationResult::Devirtualized {
            method,
            exact_context: context,
            requires_null_check: site.requires_null_check,
            unboxed_entry,
            box_removed,
        })
    }

    /// Record a soft failure, handing the call to guarded devirtualization
    /// when the reason allows it.
    fn fail(
        &self,
        site: &mut CallSite,
        reason: NotDevirtualizedReason,
        pass: DevirtPass,
        caller: &CallerContext,
    ) -> DevirtualizationResult {
        debug!(site = %site.id, reason = reason.description(), ?pass, "call not devirtualized");
        if pass == DevirtPass::Early && reason.delegates_to_guard() {
            if let Some(guards) = self.guards {
                let candidates = guards.build_candidates(site, caller);
                if let Some(guard) = GuardedDevirtualization::attach(candidates, site.kind()) {
                    site.set_guard(guard);
                }
            }
        }
        DevirtualizationResult::NotDevirtualized { reason }
    }
}
