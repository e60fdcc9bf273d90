//! Call-Site Pipeline
//!
//! Drives one call site through every stage in order:
//!
//! ```text
//! validate → receiver fact → devirtualize / guess → inline eligibility → tail call
//! ```
//!
//! The pipeline owns the configuration and service handles for a compilation
//! session and can be shared across compiler threads; each call site is
//! still processed by exactly one thread.

use crate::classify::build_call_site;
use crate::config::PipelineConfig;
use crate::devirt::{DevirtPass, DevirtualizationResult, Devirtualizer};
use crate::error::{CompileError, CompileResult, InlineAbort};
use crate::guarded::{GuardBuilder, GuardedDevirtualization};
use crate::handles::CallSiteId;
use crate::inline::{InlineEvaluator, NeverInlineCache, SiteInlineOutcome};
use crate::services::{ExpressionOracle, ProfileStore, Runtime, TypeFactOracle, TypeSystem};
use crate::site::{CallDescriptor, CallKind, CallSite, CallerContext, ReceiverInfo};
use crate::tailcall::{TailCallChecker, TailCallVerdict};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Statistics
// =============================================================================

/// Counters accumulated across every processed call site.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Call sites processed.
    pub sites: AtomicU64,
    /// Calls devirtualized on the early pass.
    pub devirtualized: AtomicU64,
    /// Calls devirtualized on the late pass.
    pub late_devirtualized: AtomicU64,
    /// Sites that received a guard.
    pub guarded_sites: AtomicU64,
    /// Guesses emitted by the guard builder.
    pub candidates_emitted: AtomicU64,
    /// Guesses pruned by inline evaluation.
    pub candidates_pruned: AtomicU64,
    /// Guards revoked after pruning.
    pub guards_revoked: AtomicU64,
    /// Targets found eligible for inlining.
    pub inline_eligible: AtomicU64,
    /// Targets rejected for inlining.
    pub inline_ineligible: AtomicU64,
    /// Inline aborts raised.
    pub inline_aborts: AtomicU64,
    /// Tail calls allowed.
    pub tail_calls_allowed: AtomicU64,
    /// Requested tail calls denied.
    pub tail_calls_denied: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Call sites processed.
    pub sites: u64,
    /// Calls devirtualized on the early pass.
    pub devirtualized: u64,
    /// Calls devirtualized on the late pass.
    pub late_devirtualized: u64,
    /// Sites that received a guard.
    pub guarded_sites: u64,
    /// Guesses emitted by the guard builder.
    pub candidates_emitted: u64,
    /// Guesses pruned by inline evaluation.
    pub candidates_pruned: u64,
    /// Guards revoked after pruning.
    pub guards_revoked: u64,
    /// Targets found eligible for inlining.
    pub inline_eligible: u64,
    /// Targets rejected for inlining.
    pub inline_ineligible: u64,
    /// Inline aborts raised.
    pub inline_aborts: u64,
    /// Tail calls allowed.
    pub tail_calls_allowed: u64,
    /// Requested tail calls denied.
    pub tail_calls_denied: u64,
}

impl PipelineStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            sites: load(&self.sites),
            devirtualized: load(&self.devirtualized),
            late_devirtualized: load(&self.late_devirtualized),
            guarded_sites: load(&self.guarded_sites),
            candidates_emitted: load(&self.candidates_emitted),
            candidates_pruned: load(&self.candidates_pruned),
            guards_revoked: load(&self.guards_revoked),
            inline_eligible: load(&self.inline_eligible),
            inline_ineligible: load(&self.inline_ineligible),
            inline_aborts: load(&self.inline_aborts),
            tail_calls_allowed: load(&self.tail_calls_allowed),
            tail_calls_denied: load(&self.tail_calls_denied),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        if by > 0 {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    fn record_inline(&self, outcome: &SiteInlineOutcome) {
        Self::bump(&self.inline_eligible, outcome.eligible as u64);
        Self::bump(
            &self.inline_ineligible,
            (outcome.evaluated - outcome.eligible) as u64,
        );
        Self::bump(&self.candidates_pruned, outcome.pruned as u64);
        Self::bump(&self.guards_revoked, outcome.guard_revoked as u64);
        Self::bump(&self.inline_aborts, outcome.abort.is_some() as u64);
    }

    fn record_tail_call(&self, verdict: &TailCallVerdict, requested: bool) {
        if verdict.is_allowed() {
            Self::bump(&self.tail_calls_allowed, 1);
        } else if requested {
            Self::bump(&self.tail_calls_denied, 1);
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Everything decided about one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSiteOutcome {
    /// Final classification.
    pub kind: CallKind,
    /// Devirtualization result, for virtual calls.
    pub devirtualization: Option<DevirtualizationResult>,
    /// Guesses left on the site after inline pruning.
    pub guard_candidates: usize,
    /// Inline evaluation summary.
    pub inline: SiteInlineOutcome,
    /// Tail-call verdict.
    pub tail_call: TailCallVerdict,
    /// Inline abort, if one was raised.
    pub abort: Option<InlineAbort>,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Call-site resolution for one compilation session.
#[derive(Debug)]
pub struct CallSitePipeline {
    config: PipelineConfig,
    types: Arc<dyn TypeSystem>,
    profile: Arc<dyn ProfileStore>,
    runtime: Arc<dyn Runtime>,
    oracle: Box<dyn TypeFactOracle + Send + Sync>,
    never_inline: NeverInlineCache,
    stats: PipelineStats,
}

impl CallSitePipeline {
    /// Create a pipeline whose receiver facts come from the receiver
    /// expressions alone.
    pub fn new(
        config: PipelineConfig,
        types: Arc<dyn TypeSystem>,
        profile: Arc<dyn ProfileStore>,
        runtime: Arc<dyn Runtime>,
    ) -> Self {
        Self {
            config,
            types,
            profile,
            runtime,
            oracle: Box::new(ExpressionOracle),
            never_inline: NeverInlineCache::new(),
            stats: PipelineStats::new(),
        }
    }

    /// Use `oracle` for receiver facts.
    pub fn with_oracle(mut self, oracle: impl TypeFactOracle + Send + Sync + 'static) -> Self {
        self.oracle = Box::new(oracle);
        self
    }

    /// The configuration.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Accumulated statistics.
    #[inline]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Callees the runtime refused permanently.
    #[inline]
    pub fn never_inline(&self) -> &NeverInlineCache {
        &self.never_inline
    }

    /// Build and classify a call site from a decoded call instruction.
    pub fn build(&self, id: CallSiteId, desc: &CallDescriptor) -> CompileResult<CallSite> {
        build_call_site(id, desc, &*self.types)
    }

    fn guards(&self) -> GuardBuilder<'_> {
        GuardBuilder::new(&self.config, &*self.types, &*self.profile)
    }

    fn devirtualizer(&self) -> Devirtualizer<'_> {
        Devirtualizer::new(&self.config, &*self.types).with_guards(self.guards())
    }

    fn inliner(&self) -> InlineEvaluator<'_> {
        InlineEvaluator::new(&self.config, &*self.types, &*self.runtime, &self.never_inline)
    }

    /// Run every stage on `site`.
    ///
    /// `stack_depth` is the number of evaluation-stack values below the
    /// call's own operands.
    pub fn process(
        &self,
        site: &mut CallSite,
        caller: &mut CallerContext,
        stack_depth: usize,
    ) -> CompileResult<CallSiteOutcome> {
        site.validate()?;
        self.check_cookie(site)?;
        self.stats.sites.fetch_add(1, Ordering::Relaxed);

        let receiver = self.receiver_fact(site);
        let mut devirtualization = None;
        if site.is_virtual {
            let result = self
                .devirtualizer()
                .devirtualize(site, &receiver, DevirtPass::Early, caller)?;
            if result.is_devirtualized() {
                PipelineStats::bump(&self.stats.devirtualized, 1);
            }
            devirtualization = Some(result);
        } else if site.is_delegate_invoke || site.is_cast_helper {
            let candidates = self.guards().build_candidates(site, caller);
            if let Some(guard) = GuardedDevirtualization::attach(candidates, site.kind()) {
                site.set_guard(guard);
            }
        }

        if let Some(guard) = site.guard() {
            PipelineStats::bump(&self.stats.guarded_sites, 1);
            PipelineStats::bump(&self.stats.candidates_emitted, guard.candidates.len() as u64);
        }

        let inline = self.inliner().evaluate_site(site, caller);
        self.stats.record_inline(&inline);

        let tail_call =
            TailCallChecker::new(&self.config, &*self.runtime).check(site, caller, stack_depth)?;
        self.stats.record_tail_call(&tail_call, site.has_tail_request());
        site.set_tail_call(tail_call);

        let outcome = CallSiteOutcome {
            kind: site.kind(),
            devirtualization,
            guard_candidates: site.guard().map_or(0, |g| g.candidates.len()),
            inline,
            tail_call,
            abort: site.inline_abort(),
        };
        debug!(
            site = %site.id,
            kind = outcome.kind.name(),
            guesses = outcome.guard_candidates,
            inline_eligible = outcome.inline.eligible,
            tail_call = outcome.tail_call.is_allowed(),
            "call site resolved"
        );
        Ok(outcome)
    }

    /// Second-chance devirtualization once later optimizations sharpened
    /// the receiver fact. Never attempts guarded devirtualization.
    ///
    /// A successful rewrite re-runs inline evaluation, since the old
    /// attachments were discarded, and re-checks any tail-call verdict
    /// against the now exact callee.
    pub fn late_devirtualize(
        &self,
        site: &mut CallSite,
        receiver: &ReceiverInfo,
        caller: &mut CallerContext,
    ) -> CompileResult<DevirtualizationResult> {
        let result = self
            .devirtualizer()
            .devirtualize(site, receiver, DevirtPass::Late, caller)?;
        if result.is_devirtualized() {
            PipelineStats::bump(&self.stats.late_devirtualized, 1);
            let inline = self.inliner().evaluate_site(site, caller);
            self.stats.record_inline(&inline);
            if site.tail_call().is_some() {
                // A site holding a verdict already passed the stack-depth check.
                let checker = TailCallChecker::new(&self.config, &*self.runtime);
                let verdict = checker.check(site, caller, 0)?;
                site.set_tail_call(verdict);
            }
        }
        Ok(result)
    }

    fn check_cookie(&self, site: &CallSite) -> CompileResult<()> {
        let conv = site.signature.conv;
        if site.kind() == CallKind::IndirectCalli
            && conv.needs_cookie()
            && !self.runtime.has_convention_cookie(conv)
        {
            return Err(CompileError::CookieUnavailable { site: site.id });
        }
        Ok(())
    }

    fn receiver_fact(&self, site: &mut CallSite) -> ReceiverInfo {
        if let Some(info) = site.receiver {
            return info;
        }
        let info = site
            .receiver_expr
            .as_ref()
            .map(|expr| self.oracle.receiver_fact(expr))
            .unwrap_or(ReceiverInfo::UNKNOWN);
        site.receiver = Some(info);
        info
    }
}
