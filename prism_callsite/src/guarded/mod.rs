//! Guarded Devirtualization
//!
//! When a virtual call cannot be proven monomorphic, profile data often shows
//! that a few receiver classes dominate. Guarded devirtualization emits a
//! cheap run-time test for each likely target, calls it directly on the fast
//! path, and keeps the original dispatch as the fallback:
//!
//! ```text
//! if obj.class == Cat      → Cat.Speak(obj)        (inline candidate)
//! else if obj.class == Dog → Dog.Speak(obj)        (inline candidate)
//! else                     → obj.Speak()           (virtual dispatch)
//! ```
//!
//! # Guess Sources
//!
//! 1. **Class guesses** (preferred, cheapest test): most likely receiver
//!    classes from the profile, admitted while above the likelihood threshold
//! 2. **Method guesses**: the single most likely target method, for vtable
//!    calls with no admissible class guess and for delegate invokes
//! 3. **Exhaustive guesses**: with no profile at all, one guess per class of a
//!    closed hierarchy the runtime can enumerate
//!
//! Class and method guesses never mix within one call site.

mod candidate;

pub use candidate::{Candidate, CandidateSet, GuardTest, GuardedDevirtualization, GuessKind};

use crate::config::PipelineConfig;
use crate::devirt::unboxed_entry_for;
use crate::handles::{ClassHandle, ExactContext, MethodHandle};
use crate::services::{ProfileStore, TypeSystem};
use crate::site::{CallKind, CallSite, CallerContext};
use tracing::{debug, trace};

// =============================================================================
// Site Kind
// =============================================================================

/// Call category used to pick the class-guess likelihood threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardSiteKind {
    /// Cast helper with a profiled object class.
    CastHelper,
    /// Interface call.
    Interface,
    /// Virtual call.
    Virtual,
}

impl GuardSiteKind {
    /// Categorize a call site.
    pub fn of(site: &CallSite) -> Self {
        if site.is_cast_helper {
            GuardSiteKind::CastHelper
        } else if site.is_interface_call {
            GuardSiteKind::Interface
        } else {
            GuardSiteKind::Virtual
        }
    }
}

/// Why no guesses were attempted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardGate {
    /// Guarded devirtualization is disabled by configuration.
    Disabled,
    /// Optimizations are disabled for the caller.
    OptsDisabled,
    /// The call sits in a rarely executed block.
    RarelyRun,
    /// The indirect call carries a convention cookie a guard cannot keep.
    ConventionCookie,
    /// The call has nothing to guess about.
    NotGuardable,
}

// =============================================================================
// Guard Builder
// =============================================================================

/// Builds the ordered candidate set for one call site.
#[derive(Debug, Clone, Copy)]
pub struct GuardBuilder<'a> {
    config: &'a PipelineConfig,
    types: &'a dyn TypeSystem,
    profile: &'a dyn ProfileStore,
}

impl<'a> GuardBuilder<'a> {
    /// Create a builder.
    pub fn new(
        config: &'a PipelineConfig,
        types: &'a dyn TypeSystem,
        profile: &'a dyn ProfileStore,
    ) -> Self {
        Self {
            config,
            types,
            profile,
        }
    }

    /// Build candidates for `site`. An empty set means "do not guard".
    pub fn build_candidates(&self, site: &CallSite, caller: &CallerContext) -> CandidateSet {
        if let Some(gate) = self.gate(site, caller) {
            trace!(site = %site.id, ?gate, "guarded devirtualization gated");
            return CandidateSet::new();
        }
        let Some(base) = site.callee else {
            return CandidateSet::new();
        };

        let set = if !self.profile.has_profile(site.id) {
            self.exhaustive_guesses(site, base)
        } else if site.is_delegate_invoke {
            self.method_guess(site)
        } else {
            let classes = self.class_guesses(site, base);
            if classes.is_empty() && matches!(site.kind(), CallKind::VirtualDispatchVTable { .. }) {
                self.method_guess(site)
            } else {
                classes
            }
        };

        debug!(
            site = %site.id,
            candidates = set.len(),
            exhaustive = set.is_exhaustive(),
            "built guarded devirtualization candidates"
        );
        set
    }

    /// Preliminary checks; `Some` means no guesses are attempted.
    pub fn gate(&self, site: &CallSite, caller: &CallerContext) -> Option<GuardGate> {
        if !self.config.enable_guarded_devirtualization || self.config.max_guesses == 0 {
            return Some(GuardGate::Disabled);
        }
        if caller.opts_disabled {
            return Some(GuardGate::OptsDisabled);
        }
        if site.is_rarely_run {
            return Some(GuardGate::RarelyRun);
        }
        if site.kind() == CallKind::IndirectCalli && site.signature.conv.needs_cookie() {
            return Some(GuardGate::ConventionCookie);
        }
        let guardable = site.kind().is_virtual_dispatch()
            || site.is_delegate_invoke
            || site.is_cast_helper;
        if !guardable {
            return Some(GuardGate::NotGuardable);
        }
        None
    }

    /// Receiver-class guesses from the profile.
    fn class_guesses(&self, site: &CallSite, base: MethodHandle) -> CandidateSet {
        let max = self.config.max_guesses;
        let threshold = self.config.likelihood_threshold(GuardSiteKind::of(site));
        let mut likely = self.profile.likely_classes(site.id, max);
        likely.sort_by(|a, b| b.1.cmp(&a.1));

        let mut set = CandidateSet::new();
        for (class, likelihood) in likely {
            if set.len() >= max {
                break;
            }
            if likelihood < threshold {
                trace!(
                    site = %site.id,
                    %class,
                    likelihood,
                    threshold,
                    "class guess below threshold"
                );
                break;
            }
            let Some(attrs) = self.types.class_attributes(class) else {
                trace!(site = %site.id, %class, "class guess has no metadata");
                break;
            };
            if attrs.is_abstract || attrs.is_interface {
                // Stale profile; lower-ranked entries may still be good.
                trace!(site = %site.id, %class, "skipping abstract class guess");
                continue;
            }

            let (method, context) = if site.is_cast_helper {
                (base, ExactContext::Class(class))
            } else {
                match self.types.resolve_virtual_target(base, class) {
                    Some(resolved) => resolved,
                    None => {
                        trace!(site = %site.id, %class, "class guess did not resolve");
                        break;
                    }
                }
            };

            let unboxed = if attrs.is_value_type && !site.is_cast_helper {
                unboxed_entry_for(self.types, method)
            } else {
                None
            };
            trace!(site = %site.id, %class, %method, likelihood, "admitted class guess");
            set.push(
                Candidate::class_guess(class, method, context, likelihood)
                    .with_unboxed_entry(unboxed),
            );
        }
        set
    }

    /// Single most likely target method.
    fn method_guess(&self, site: &CallSite) -> CandidateSet {
        let mut set = CandidateSet::new();
        if !self.config.enable_method_guesses {
            return set;
        }
        let Some(&(method, likelihood)) = self.profile.likely_methods(site.id, 1).first() else {
            return set;
        };
        if likelihood < self.config.method_guess_threshold {
            trace!(site = %site.id, %method, likelihood, "method guess below threshold");
            return set;
        }
        let Some(attrs) = self.types.method_attributes(method) else {
            return set;
        };
        if attrs.is_static && !(site.is_delegate_invoke && site.delegate_binds_static) {
            trace!(site = %site.id, %method, "rejecting static method guess");
            return set;
        }
        if !attrs.is_static {
            let owner_is_value_type = self
                .types
                .class_attributes(attrs.owner)
                .map(|c| c.is_value_type)
                .unwrap_or(true);
            if owner_is_value_type {
                trace!(site = %site.id, %method, "rejecting value-type instance method guess");
                return set;
            }
        }
        if !self.signature_compatible(site, method, attrs.is_static) {
            trace!(site = %site.id, %method, "rejecting method guess with incompatible signature");
            return set;
        }

        set.push(Candidate::method_guess(
            method,
            ExactContext::Class(attrs.owner),
            likelihood,
        ));
        set
    }

    /// Whether `method` can stand in for the call's observed arguments.
    ///
    /// A closed static delegate target takes the bound first argument in
    /// addition to the invoke's parameters.
    fn signature_compatible(&self, site: &CallSite, method: MethodHandle, is_static: bool) -> bool {
        let Some(sig) = self.types.method_signature(method) else {
            return false;
        };
        if sig.ret != site.signature.ret {
            return false;
        }
        if is_static {
            sig.params.len() == site.signature.params.len() + 1
                && sig.params[1..] == site.signature.params[..]
        } else {
            sig.params_match(&site.signature)
        }
    }

    /// One guess per member of a closed hierarchy.
    fn exhaustive_guesses(&self, site: &CallSite, base: MethodHandle) -> CandidateSet {
        let mut set = CandidateSet::new();
        if !self.config.enable_exhaustive_guesses
            || site.is_delegate_invoke
            || site.is_cast_helper
        {
            return set;
        }
        let Some(root) = self.hierarchy_root(site, base) else {
            return set;
        };
        let Some(classes) = self.types.enumerate_implementors(root, self.config.max_guesses) else {
            return set;
        };
        if classes.is_empty() {
            return set;
        }

        let n = classes.len() as u32;
        let share = 100 / n;
        let remainder = 100 - share * n;
        let threshold = self.config.likelihood_threshold(GuardSiteKind::of(site));
        if share < threshold {
            return set;
        }

        for (i, &class) in classes.iter().enumerate() {
            let Some(attrs) = self.types.class_attributes(class) else {
                return CandidateSet::new();
            };
            if attrs.is_abstract || attrs.is_interface {
                return CandidateSet::new();
            }
            let Some((method, context)) = self.types.resolve_virtual_target(base, class) else {
                return CandidateSet::new();
            };
            let likelihood = if i == 0 { share + remainder } else { share };
            let unboxed = if attrs.is_value_type {
                unboxed_entry_for(self.types, method)
            } else {
                None
            };
            set.push(
                Candidate::class_guess(class, method, context, likelihood)
                    .with_unboxed_entry(unboxed),
            );
        }
        set.mark_exhaustive();
        set
    }

    /// Class whose implementors make up the closed set.
    fn hierarchy_root(&self, site: &CallSite, base: MethodHandle) -> Option<ClassHandle> {
        site.receiver
            .and_then(|r| r.class)
            .or_else(|| self.types.method_attributes(base).map(|a| a.owner))
    }
}
