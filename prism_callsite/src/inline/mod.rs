//! Inline Eligibility
//!
//! Decides whether a call target may be inlined at all. Profitability (size
//! budgets, hotness) is decided later; this stage only rules out targets that
//! cannot or must not be inlined and snapshots what the inliner will need.
//!
//! # Checks
//!
//! Evaluated in order; the first failure is the reported reason:
//!
//! 1. Inlining disabled for the caller
//! 2. Caller captures its return address
//! 3. Explicit tail call
//! 4. Delegate invoke thunk without a guessed target
//! 5. Recursive implicit tail call (becomes a loop instead)
//! 6. Unresolved virtual call that is not a guess
//! 7. Helper or indirect call
//! 8. Callee marked no-inline, known never-inline, synchronized, or an
//!    interop stub called from a handler region
//! 9. Callee body unavailable
//! 10. Class initialization vetoed
//! 11. Runtime veto
//!
//! # Guarded Calls
//!
//! Each guess is evaluated on its own. Failing guesses are pruned; when none
//! survive the guard is revoked and the call goes back to plain dispatch.

mod info;

pub use info::{InlineCandidateInfo, StructReturnShape};

use crate::config::PipelineConfig;
use crate::error::InlineAbort;
use crate::guarded::Candidate;
use crate::handles::{ExactContext, MethodHandle};
use crate::services::{ClassInitResult, InlinePermission, Runtime, TypeSystem};
use crate::site::{CallSite, CallerContext};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

// =============================================================================
// Verdicts
// =============================================================================

/// Why a target cannot be inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InlineFailure {
    /// Inlining is disabled for the caller.
    CallerInliningDisabled,
    /// The caller captures its own return address.
    CallerCapturesReturnAddress,
    /// The call carries an explicit tail-call request.
    ExplicitTailCall,
    /// The target is a delegate invoke thunk with no body.
    DelegateInvokeThunk,
    /// Recursive implicit tail call; it becomes a loop instead.
    RecursiveImplicitTail,
    /// The call still dispatches virtually.
    UnresolvedVirtual,
    /// Runtime helper or indirect call.
    HelperOrIndirect,
    /// The callee is marked no-inline.
    CalleeNoInline,
    /// The runtime permanently refused this callee earlier.
    CalleeNeverInline,
    /// The callee is synchronized.
    CalleeSynchronized,
    /// Interop stub called from an exception handler region.
    InteropInHandler,
    /// No body metadata for the callee.
    CalleeBodyUnavailable,
    /// Speculative class initialization was vetoed.
    ClassInitVetoed,
    /// The runtime refused.
    RuntimeVeto,
    /// The runtime refused for every caller.
    RuntimeVetoPermanent,
}

impl InlineFailure {
    /// Human-readable reason.
    pub fn description(self) -> &'static str {
        match self {
            Self::CallerInliningDisabled => "inlining disabled for caller",
            Self::CallerCapturesReturnAddress => "caller captures return address",
            Self::ExplicitTailCall => "explicit tail call",
            Self::DelegateInvokeThunk => "delegate invoke thunk",
            Self::RecursiveImplicitTail => "recursive implicit tail call",
            Self::UnresolvedVirtual => "unresolved virtual call",
            Self::HelperOrIndirect => "helper or indirect call",
            Self::CalleeNoInline => "callee marked no-inline",
            Self::CalleeNeverInline => "callee known never-inline",
            Self::CalleeSynchronized => "callee is synchronized",
            Self::InteropInHandler => "interop call in handler region",
            Self::CalleeBodyUnavailable => "callee body unavailable",
            Self::ClassInitVetoed => "class initialization vetoed",
            Self::RuntimeVeto => "runtime veto",
            Self::RuntimeVetoPermanent => "runtime veto (permanent)",
        }
    }
}

/// Result of evaluating one target.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineVerdict {
    /// The target may be inlined.
    Eligible(InlineCandidateInfo),
    /// The target may not be inlined.
    Ineligible(InlineFailure),
    /// The enclosing inline attempt must be abandoned.
    Abort(InlineAbort),
}

impl InlineVerdict {
    /// Whether the target is eligible.
    #[inline]
    pub fn is_eligible(&self) -> bool {
        matches!(self, InlineVerdict::Eligible(_))
    }

    /// Failure reason, if ineligible.
    #[inline]
    pub fn failure(&self) -> Option<InlineFailure> {
        match self {
            InlineVerdict::Ineligible(f) => Some(*f),
            _ => None,
        }
    }
}

/// The method being considered for inlining at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineTarget {
    /// Method whose body would be inlined.
    pub method: MethodHandle,
    /// Generic context, when known.
    pub exact_context: Option<ExactContext>,
    /// Whether the target is a guarded-devirtualization guess.
    pub from_guard: bool,
    /// Guess likelihood, for guesses.
    pub guard_likelihood: Option<u32>,
}

impl InlineTarget {
    /// The call's own callee.
    pub fn direct(site: &CallSite) -> Option<Self> {
        site.callee.map(|method| Self {
            method,
            exact_context: site.generic_context,
            from_guard: false,
            guard_likelihood: None,
        })
    }

    /// A guarded-devirtualization guess.
    pub fn from_candidate(candidate: &Candidate) -> Self {
        Self {
            method: candidate.call_target(),
            exact_context: Some(candidate.exact_context),
            from_guard: true,
            guard_likelihood: Some(candidate.likelihood),
        }
    }
}

/// What happened when a whole call site was evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteInlineOutcome {
    /// Targets evaluated.
    pub evaluated: usize,
    /// Targets found eligible.
    pub eligible: usize,
    /// Guesses removed from the guard.
    pub pruned: usize,
    /// Whether the guard was revoked.
    pub guard_revoked: bool,
    /// Last failure seen.
    pub failure: Option<InlineFailure>,
    /// Abort raised while evaluating.
    pub abort: Option<InlineAbort>,
}

// =============================================================================
// Never-Inline Cache
// =============================================================================

/// Callees the runtime has refused permanently.
///
/// Shared across call sites (and compilations) so a refused callee fails
/// fast without asking the runtime again.
#[derive(Debug, Default)]
pub struct NeverInlineCache {
    methods: RwLock<FxHashSet<MethodHandle>>,
}

impl NeverInlineCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `method` is known never-inline.
    #[inline]
    pub fn contains(&self, method: MethodHandle) -> bool {
        self.methods.read().contains(&method)
    }

    /// Remember `method` as never-inline.
    pub fn insert(&self, method: MethodHandle) {
        self.methods.write().insert(method);
    }

    /// Number of remembered methods.
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }
}

// =============================================================================
// Evaluator
// =============================================================================

/// Evaluates inline eligibility for call sites.
#[derive(Debug, Clone, Copy)]
pub struct InlineEvaluator<'a> {
    config: &'a PipelineConfig,
    types: &'a dyn TypeSystem,
    runtime: &'a dyn Runtime,
    never_inline: &'a NeverInlineCache,
}

impl<'a> InlineEvaluator<'a> {
    /// Create an evaluator.
    pub fn new(
        config: &'a PipelineConfig,
        types: &'a dyn TypeSystem,
        runtime: &'a dyn Runtime,
        never_inline: &'a NeverInlineCache,
    ) -> Self {
        Self {
            config,
            types,
            runtime,
            never_inline,
        }
    }

    /// Evaluate one target at `site`.
    pub fn evaluate(
        &self,
        site: &CallSite,
        target: &InlineTarget,
        caller: &CallerContext,
    ) -> InlineVerdict {
        let verdict = self.check(site, target, caller);
        match &verdict {
            InlineVerdict::Eligible(_) => {
                trace!(site = %site.id, callee = %target.method, "inline candidate eligible")
            }
            InlineVerdict::Ineligible(reason) => trace!(
                site = %site.id,
                callee = %target.method,
                reason = reason.description(),
                "inline candidate rejected"
            ),
            InlineVerdict::Abort(abort) => {
                debug!(site = %site.id, callee = %target.method, %abort, "inline attempt aborted")
            }
        }
        verdict
    }

    fn check(
        &self,
        site: &CallSite,
        target: &InlineTarget,
        caller: &CallerContext,
    ) -> InlineVerdict {
        use InlineFailure::*;
        let fail = InlineVerdict::Ineligible;
        let method = target.method;

        if !self.config.enable_inlining || caller.opts_disabled || caller.inlining_disabled {
            return fail(CallerInliningDisabled);
        }
        if caller.captures_return_address {
            return fail(CallerCapturesReturnAddress);
        }
        if site.is_explicit_tail {
            return fail(ExplicitTailCall);
        }
        if site.is_delegate_invoke && !target.from_guard {
            return fail(DelegateInvokeThunk);
        }
        if site.is_implicit_tail && method == caller.method {
            return fail(RecursiveImplicitTail);
        }
        if site.kind().is_virtual_dispatch() && !target.from_guard {
            return fail(UnresolvedVirtual);
        }
        if site.is_helper || (site.kind().is_indirect() && !target.from_guard) {
            return fail(HelperOrIndirect);
        }

        let Some(method_attrs) = self.types.method_attributes(method) else {
            return fail(CalleeBodyUnavailable);
        };
        if method_attrs.is_no_inline {
            return fail(CalleeNoInline);
        }
        if self.never_inline.contains(method) {
            return fail(CalleeNeverInline);
        }
        if method_attrs.is_synchronized {
            return fail(CalleeSynchronized);
        }
        if method_attrs.is_native_interop && site.in_handler_region {
            return fail(InteropInHandler);
        }

        let body = self.types.method_body(method);
        let class_attrs = self.types.class_attributes(method_attrs.owner);
        let (Some(body), Some(class_attrs)) = (body, class_attrs) else {
            return fail(CalleeBodyUnavailable);
        };

        let context = target
            .exact_context
            .unwrap_or(ExactContext::Class(method_attrs.owner));
        if caller.is_inlinee && !self.types.can_embed_context(context) {
            return InlineVerdict::Abort(InlineAbort::ContextNotEmbeddable);
        }

        if self.types.speculative_class_init(method, context) == ClassInitResult::DontInline {
            return fail(ClassInitVetoed);
        }

        match self.runtime.can_inline(caller.method, method) {
            InlinePermission::Allow => {}
            InlinePermission::Deny => return fail(RuntimeVeto),
            InlinePermission::DenyPermanently => {
                self.never_inline.insert(method);
                return fail(RuntimeVetoPermanent);
            }
        }

        let ret = self
            .types
            .method_signature(method)
            .map(|sig| sig.ret)
            .unwrap_or(site.signature.ret);
        InlineVerdict::Eligible(InlineCandidateInfo {
            callee: method,
            body,
            class_attrs,
            method_attrs,
            exact_context: context,
            struct_return: StructReturnShape::of(ret, self.config.target_abi),
            force_inline: method_attrs.is_force_inline,
            guard_likelihood: target.guard_likelihood,
        })
    }

    /// Evaluate every target at `site` and record the results on it.
    ///
    /// A direct call is evaluated once. A guarded call is evaluated once per
    /// guess; failing guesses are pruned and an emptied guard is revoked.
    pub fn evaluate_site(&self, site: &mut CallSite, caller: &CallerContext) -> SiteInlineOutcome {
        let mut outcome = SiteInlineOutcome::default();

        let Some(mut guard) = site.take_guard() else {
            let Some(target) = InlineTarget::direct(site) else {
                return outcome;
            };
            outcome.evaluated = 1;
            match self.evaluate(site, &target, caller) {
                InlineVerdict::Eligible(info) => {
                    outcome.eligible = 1;
                    site.set_inline_info(Some(info));
                }
                InlineVerdict::Ineligible(reason) => {
                    outcome.failure = Some(reason);
                    site.set_inline_info(None);
                }
                InlineVerdict::Abort(abort) => {
                    outcome.abort = Some(abort);
                    site.set_inline_info(None);
                    site.mark_inline_abort(abort);
                }
            }
            return outcome;
        };

        // Cast-helper guards stand on their own; the helper is never inlined
        // through them.
        if site.is_cast_helper {
            site.set_guard(guard);
            return outcome;
        }

        for candidate in guard.candidates.iter_mut() {
            let target = InlineTarget::from_candidate(candidate);
            outcome.evaluated += 1;
            match self.evaluate(site, &target, caller) {
                InlineVerdict::Eligible(info) => {
                    outcome.eligible += 1;
                    candidate.inline_info = Some(info);
                }
                InlineVerdict::Ineligible(reason) => {
                    outcome.failure = Some(reason);
                    candidate.inline_info = None;
                }
                InlineVerdict::Abort(abort) => {
                    outcome.abort = Some(abort);
                    break;
                }
            }
        }

        if let Some(abort) = outcome.abort {
            outcome.pruned = guard.candidates.len();
            outcome.eligible = 0;
            outcome.guard_revoked = true;
            site.restore_kind(guard.pre_guard_kind);
            site.set_inline_info(None);
            site.mark_inline_abort(abort);
            return outcome;
        }

        outcome.pruned = guard.candidates.retain(|c| c.inline_info.is_some());
        if guard.candidates.is_empty() {
            outcome.guard_revoked = true;
            site.restore_kind(guard.pre_guard_kind);
            site.set_inline_info(None);
            debug!(site = %site.id, pruned = outcome.pruned, "guard revoked, no inlineable guess");
        } else {
            debug!(
                site = %site.id,
                kept = guard.candidates.len(),
                pruned = outcome.pruned,
                "pruned guarded candidates"
            );
            site.set_guard(guard);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guarded::{CandidateSet, GuardedDevirtualization};
    use crate::handles::{CallSiteId, ClassHandle, ExprId};
    use crate::registry::{RuntimePolicy, TypeRegistry};
    use crate::services::{ClassAttributes, MethodAttributes};
    use crate::signature::{SigType, Signature};
    use crate::site::{CallKind, ReceiverExpr};

    struct Env {
        types: TypeRegistry,
        runtime: RuntimePolicy,
        cache: NeverInlineCache,
        config: PipelineConfig,
        class: ClassHandle,
        callee: MethodHandle,
    }

    impl Env {
        fn new() -> Self {
            let types = TypeRegistry::new();
            let class = types.define_class(ClassAttributes::default(), None);
            let callee = types.define_method(MethodAttributes::instance(class), sig());
            Self {
                types,
                runtime: RuntimePolicy::new(),
                cache: NeverInlineCache::new(),
                config: PipelineConfig::default(),
                class,
                callee,
            }
        }

        fn evaluator(&self) -> InlineEvaluator<'_> {
            InlineEvaluator::new(&self.config, &self.types, &self.runtime, &self.cache)
        }

        fn method(&self, attrs: impl FnOnce(&mut MethodAttributes)) -> MethodHandle {
            let mut a = MethodAttributes::instance(self.class);
            attrs(&mut a);
            self.types.define_method(a, sig())
        }
    }

    fn sig() -> Signature {
        Signature::new(&[], SigType::I4).with_this()
    }

    fn id() -> CallSiteId {
        CallSiteId::new(MethodHandle::new(500), 8)
    }

    fn caller() -> CallerContext {
        CallerContext::new(MethodHandle::new(500), Signature::new(&[], SigType::I4))
    }

    fn direct(callee: MethodHandle) -> CallSite {
        CallSite::new(id(), CallKind::Direct, Some(callee), sig())
            .with_receiver_expr(ReceiverExpr::opaque(ExprId(0)))
    }

    fn reason(env: &Env, site: &CallSite, caller: &CallerContext) -> Option<InlineFailure> {
        let target = InlineTarget::direct(site).unwrap();
        env.evaluator().evaluate(site, &target, caller).failure()
    }

    // =========================================================================
    // Check Order Tests
    // =========================================================================

    #[test]
    fn test_direct_call_eligible() {
        let env = Env::new();
        let site = direct(env.callee);
        let target = InlineTarget::direct(&site).unwrap();
        match env.evaluator().evaluate(&site, &target, &caller()) {
            InlineVerdict::Eligible(info) => {
                assert_eq!(info.callee, env.callee);
                assert_eq!(info.exact_context, ExactContext::Class(env.class));
                assert_eq!(info.struct_return, StructReturnShape::NotStruct);
                assert!(!info.force_inline);
                assert_eq!(info.guard_likelihood, None);
            }
            other => panic!("expected eligible, got {other:?}"),
        }
    }

    #[test]
    fn test_caller_checks_come_first() {
        let env = Env::new();
        let site = direct(env.callee).explicit_tail();

        let mut c = caller();
        c.inlining_disabled = true;
        c.captures_return_address = true;
        assert_eq!(reason(&env, &site, &c), Some(InlineFailure::CallerInliningDisabled));

        c.inlining_disabled = false;
        assert_eq!(reason(&env, &site, &c), Some(InlineFailure::CallerCapturesReturnAddress));

        c.captures_return_address = false;
        assert_eq!(reason(&env, &site, &c), Some(InlineFailure::ExplicitTailCall));
    }

    #[test]
    fn test_recursive_implicit_tail() {
        let env = Env::new();
        let site = direct(MethodHandle::new(500)).implicit_tail();
        assert_eq!(reason(&env, &site, &caller()), Some(InlineFailure::RecursiveImplicitTail));
    }

    #[test]
    fn test_call_shape_checks() {
        let env = Env::new();
        let site = CallSite::new(
            id(),
            CallKind::VirtualDispatchVTable { slot: 1 },
            Some(env.callee),
            sig(),
        )
        .virtual_call()
        .with_receiver_expr(ReceiverExpr::opaque(ExprId(0)));
        assert_eq!(reason(&env, &site, &caller()), Some(InlineFailure::UnresolvedVirtual));

        let mut helper = direct(env.callee);
        helper.is_helper = true;
        assert_eq!(reason(&env, &helper, &caller()), Some(InlineFailure::HelperOrIndirect));

        let fptr = CallSite::new(
            id(),
            CallKind::IndirectThroughResolvedFunctionPointer,
            Some(env.callee),
            sig(),
        );
        assert_eq!(reason(&env, &fptr, &caller()), Some(InlineFailure::HelperOrIndirect));

        let thunk = direct(env.callee).delegate_invoke();
        assert_eq!(reason(&env, &thunk, &caller()), Some(InlineFailure::DelegateInvokeThunk));
    }

    #[test]
    fn test_callee_attribute_checks() {
        let env = Env::new();
        let no_inline = env.method(|a| {
            a.is_no_inline = true;
            a.is_synchronized = true;
        });
        assert_eq!(
            reason(&env, &direct(no_inline), &caller()),
            Some(InlineFailure::CalleeNoInline)
        );

        let sync = env.method(|a| a.is_synchronized = true);
        assert_eq!(reason(&env, &direct(sync), &caller()), Some(InlineFailure::CalleeSynchronized));

        let interop = env.method(|a| a.is_native_interop = true);
        assert!(reason(&env, &direct(interop), &caller()).is_none());
        let mut in_handler = direct(interop);
        in_handler.in_handler_region = true;
        assert_eq!(reason(&env, &in_handler, &caller()), Some(InlineFailure::InteropInHandler));
    }

    #[test]
    fn test_body_and_runtime_checks() {
        let env = Env::new();
        let bodiless = env.method(|_| {});
        env.types.set_body(bodiless, None);
        assert_eq!(
            reason(&env, &direct(bodiless), &caller()),
            Some(InlineFailure::CalleeBodyUnavailable)
        );

        let needs_init = env.method(|_| {});
        env.types.set_class_init(needs_init, ClassInitResult::DontInline);
        assert_eq!(
            reason(&env, &direct(needs_init), &caller()),
            Some(InlineFailure::ClassInitVetoed)
        );

        let vetoed = env.method(|_| {});
        env.runtime.deny_inline(vetoed, false);
        assert_eq!(reason(&env, &direct(vetoed), &caller()), Some(InlineFailure::RuntimeVeto));
        assert_eq!(reason(&env, &direct(vetoed), &caller()), Some(InlineFailure::RuntimeVeto));
    }

    #[test]
    fn test_permanent_veto_is_cached() {
        let env = Env::new();
        env.runtime.deny_inline(env.callee, true);
        let site = direct(env.callee);

        assert_eq!(reason(&env, &site, &caller()), Some(InlineFailure::RuntimeVetoPermanent));
        assert!(env.cache.contains(env.callee));
        let queries = env.runtime.inline_queries();

        assert_eq!(reason(&env, &site, &caller()), Some(InlineFailure::CalleeNeverInline));
        assert_eq!(env.runtime.inline_queries(), queries);
    }

    #[test]
    fn test_force_inline_and_struct_return_recorded() {
        let env = Env::new();
        let layout = env.types.define_class(
            ClassAttributes {
                is_value_type: true,
                ..Default::default()
            },
            None,
        );
        let ret = SigType::Struct { layout, size: 16 };
        let mut attrs = MethodAttributes::instance(env.class);
        attrs.is_force_inline = true;
        let m = env.types.define_method(attrs, Signature::new(&[], ret).with_this());
        let site =
            CallSite::new(id(), CallKind::Direct, Some(m), Signature::new(&[], ret).with_this());
        let target = InlineTarget::direct(&site).unwrap();
        match env.evaluator().evaluate(&site, &target, &caller()) {
            InlineVerdict::Eligible(info) => {
                assert!(info.force_inline);
                assert_eq!(info.struct_return, StructReturnShape::MultiReg { size: 16 });
            }
            other => panic!("expected eligible, got {other:?}"),
        }
    }

    // =========================================================================
    // Abort Tests
    // =========================================================================

    #[test]
    fn test_unembeddable_context_aborts_only_in_inlinee() {
        let env = Env::new();
        env.types.set_context_not_embeddable(ExactContext::Class(env.class));
        let mut site = direct(env.callee);

        let outcome = env.evaluator().evaluate_site(&mut site, &caller());
        assert_eq!(outcome.eligible, 1);
        assert!(site.inline_abort().is_none());

        let mut inlinee = caller();
        inlinee.is_inlinee = true;
        let mut site = direct(env.callee);
        let outcome = env.evaluator().evaluate_site(&mut site, &inlinee);
        assert_eq!(outcome.abort, Some(InlineAbort::ContextNotEmbeddable));
        assert_eq!(site.inline_abort(), Some(InlineAbort::ContextNotEmbeddable));
        assert!(site.inline_info().is_none());
    }

    // =========================================================================
    // Guarded Site Tests
    // =========================================================================

    fn guarded_site(env: &Env, guesses: &[(MethodHandle, u32)]) -> CallSite {
        let kind = CallKind::VirtualDispatchVTable { slot: 2 };
        let mut site = CallSite::new(id(), kind, Some(env.callee), sig())
            .virtual_call()
            .with_receiver_expr(ReceiverExpr::opaque(ExprId(0)));
        let mut set = CandidateSet::new();
        for (i, &(m, likelihood)) in guesses.iter().enumerate() {
            let class = ClassHandle::new(900 + i as u32);
            set.push(Candidate::class_guess(class, m, ExactContext::Class(env.class), likelihood));
        }
        if let Some(guard) = GuardedDevirtualization::attach(set, kind) {
            site.set_guard(guard);
        }
        site
    }

    #[test]
    fn test_guarded_no_inline_candidate_pruned() {
        let env = Env::new();
        let good = env.method(|_| {});
        let bad = env.method(|a| a.is_no_inline = true);
        let mut site = guarded_site(&env, &[(good, 60), (bad, 30)]);

        let outcome = env.evaluator().evaluate_site(&mut site, &caller());
        assert_eq!(outcome.evaluated, 2);
        assert_eq!(outcome.pruned, 1);
        assert!(!outcome.guard_revoked);
        assert_eq!(outcome.failure, Some(InlineFailure::CalleeNoInline));

        let guard = site.guard().expect("guard kept");
        assert_eq!(guard.candidates.len(), 1);
        let kept = guard.candidates.get(0).unwrap();
        assert_eq!(kept.resolved_method, good);
        assert_eq!(kept.inline_info.as_ref().map(|i| i.guard_likelihood), Some(Some(60)));
    }

    #[test]
    fn test_guard_revoked_when_all_fail() {
        let env = Env::new();
        let a = env.method(|a| a.is_no_inline = true);
        let b = env.method(|a| a.is_synchronized = true);
        let mut site = guarded_site(&env, &[(a, 50), (b, 40)]);

        let outcome = env.evaluator().evaluate_site(&mut site, &caller());
        assert!(outcome.guard_revoked);
        assert_eq!(outcome.pruned, 2);
        assert!(site.guard().is_none());
        assert!(site.inline_info().is_none());
        assert_eq!(site.kind(), CallKind::VirtualDispatchVTable { slot: 2 });
    }

    #[test]
    fn test_guess_bypasses_unresolved_virtual_check() {
        let env = Env::new();
        let mut site = guarded_site(&env, &[(env.callee, 80)]);
        let outcome = env.evaluator().evaluate_site(&mut site, &caller());
        assert_eq!(outcome.eligible, 1);
        assert!(site.guard().is_some());
    }

    #[test]
    fn test_cast_helper_guard_untouched() {
        let env = Env::new();
        let bad = env.method(|a| a.is_no_inline = true);
        let mut site = guarded_site(&env, &[(bad, 70)]);
        site.is_cast_helper = true;
        let outcome = env.evaluator().evaluate_site(&mut site, &caller());
        assert_eq!(outcome.evaluated, 0);
        assert_eq!(site.guard().map(|g| g.candidates.len()), Some(1));
    }
}
