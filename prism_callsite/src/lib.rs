//! Prism Call-Site Resolution
//!
//! Decides, for every call instruction the importer meets, how the call will
//! be dispatched and whether it may be inlined or turned into a tail call.
//!
//! # Stages
//!
//! Each call site flows through the stages in order:
//!
//! - **Classification** (`classify`): direct, stub dispatch, vtable dispatch,
//!   resolved function pointer, or `calli`
//! - **Devirtualization** (`devirt`): prove a virtual call monomorphic and
//!   rewrite it to a direct call, including unboxed entry points
//! - **Guarded devirtualization** (`guarded`): when no proof exists, build
//!   profile-driven guesses guarded by a cheap run-time test
//! - **Inline eligibility** (`inline`): rule out targets that cannot be
//!   inlined, prune guesses, revoke guards that lost every guess
//! - **Tail calls** (`tailcall`): decide whether the call may reuse the
//!   caller's frame
//!
//! [`CallSitePipeline`] runs all of them against the collaborator services
//! in [`services`]; [`registry`] holds in-memory implementations of those.
//!
//! # Usage
//!
//! ```ignore
//! use prism_callsite::{CallSitePipeline, PipelineConfig};
//!
//! let pipeline = CallSitePipeline::new(PipelineConfig::tier2(), types, profile, runtime);
//! let mut site = pipeline.build(id, &descriptor)?;
//! let outcome = pipeline.process(&mut site, &mut caller, stack_depth)?;
//! ```

#![warn(clippy::all)]

pub mod classify;
pub mod config;
pub mod devirt;
pub mod error;
pub mod guarded;
pub mod handles;
pub mod inline;
pub mod pipeline;
pub mod registry;
pub mod services;
pub mod signature;
pub mod site;
pub mod tailcall;

// Re-exports for convenient access
pub use classify::{build_call_site, classify};
pub use config::PipelineConfig;
pub use devirt::{DevirtPass, DevirtualizationResult, Devirtualizer, NotDevirtualizedReason};
pub use error::{CompileError, CompileResult, InlineAbort};
pub use guarded::{Candidate, CandidateSet, GuardBuilder, GuardedDevirtualization};
pub use handles::{CallSiteId, ClassHandle, ExactContext, MethodHandle};
pub use inline::{
    InlineCandidateInfo, InlineEvaluator, InlineFailure, InlineVerdict, NeverInlineCache,
    SiteInlineOutcome,
};
pub use pipeline::{CallSiteOutcome, CallSitePipeline, PipelineStats, StatsSnapshot};
pub use registry::{ProfileRegistry, RuntimePolicy, TypeRegistry};
pub use services::{ProfileStore, Runtime, TypeFactOracle, TypeSystem};
pub use signature::{CallConv, SigType, Signature, TargetAbi};
pub use site::{CallDescriptor, CallKind, CallSite, CallerContext, Exactness, ReceiverInfo};
pub use tailcall::{TailCallChecker, TailCallReason, TailCallVerdict};
