//! Guess Candidates
//!
//! A [`Candidate`] is one guess for a guarded call: the run-time test to
//! emit (class or method), the method to call directly when it passes, and
//! how likely the profile says it is.

use crate::handles::{ClassHandle, ExactContext, MethodHandle};
use crate::inline::InlineCandidateInfo;
use crate::site::CallKind;
use smallvec::SmallVec;

// =============================================================================
// Guard Test
// =============================================================================

/// What the emitted guard compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardTest {
    /// Compare the receiver's class.
    Class(ClassHandle),
    /// Compare the dispatched target method.
    Method(MethodHandle),
}

/// Whether a set guesses classes or methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessKind {
    /// Receiver-class guesses.
    Class,
    /// Target-method guesses.
    Method,
}

impl GuardTest {
    /// Kind of guess this test belongs to.
    #[inline]
    pub fn kind(self) -> GuessKind {
        match self {
            GuardTest::Class(_) => GuessKind::Class,
            GuardTest::Method(_) => GuessKind::Method,
        }
    }
}

// =============================================================================
// Candidate
// =============================================================================

/// One guess in a guarded devirtualization.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    guard: GuardTest,
    /// Method called on the fast path.
    pub resolved_method: MethodHandle,
    /// Generic context of `resolved_method`.
    pub exact_context: ExactContext,
    /// Likelihood in percent (0..=100).
    pub likelihood: u32,
    /// Unboxed entry when the guard class is a value type.
    pub unboxed_entry: Option<MethodHandle>,
    /// Inline info once the candidate has been found eligible.
    pub inline_info: Option<InlineCandidateInfo>,
}

impl Candidate {
    /// A receiver-class guess.
    pub fn class_guess(
        class: ClassHandle,
        resolved_method: MethodHandle,
        exact_context: ExactContext,
        likelihood: u32,
    ) -> Self {
        Self {
            guard: GuardTest::Class(class),
            resolved_method,
            exact_context,
            likelihood: likelihood.min(100),
            unboxed_entry: None,
            inline_info: None,
        }
    }

    /// A target-method guess.
    pub fn method_guess(
        method: MethodHandle,
        exact_context: ExactContext,
        likelihood: u32,
    ) -> Self {
        Self {
            guard: GuardTest::Method(method),
            resolved_method: method,
            exact_context,
            likelihood: likelihood.min(100),
            unboxed_entry: None,
            inline_info: None,
        }
    }

    /// Set the unboxed entry.
    pub fn with_unboxed_entry(mut self, entry: Option<MethodHandle>) -> Self {
        self.unboxed_entry = entry;
        self
    }

    /// The guard test.
    #[inline]
    pub fn guard(&self) -> GuardTest {
        self.guard
    }

    /// Guard class, for class guesses.
    #[inline]
    pub fn guard_class(&self) -> Option<ClassHandle> {
        match self.guard {
            GuardTest::Class(c) => Some(c),
            GuardTest::Method(_) => None,
        }
    }

    /// Guard method, for method guesses.
    #[inline]
    pub fn guard_method(&self) -> Option<MethodHandle> {
        match self.guard {
            GuardTest::Method(m) => Some(m),
            GuardTest::Class(_) => None,
        }
    }

    /// Method the fast path actually calls.
    #[inline]
    pub fn call_target(&self) -> MethodHandle {
        self.unboxed_entry.unwrap_or(self.resolved_method)
    }
}

// =============================================================================
// Candidate Set
// =============================================================================

/// Ordered guesses for one call site, most likely first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    candidates: SmallVec<[Candidate; 4]>,
    exhaustive: bool,
}

impl CandidateSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a candidate, keeping the set sorted by descending likelihood.
    ///
    /// Returns `false` (and drops the candidate) when it would mix class and
    /// method guesses.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        if let Some(kind) = self.guess_kind() {
            if kind != candidate.guard.kind() {
                return false;
            }
        }
        let pos = self
            .candidates
            .iter()
            .position(|c| c.likelihood < candidate.likelihood)
            .unwrap_or(self.candidates.len());
        self.candidates.insert(pos, candidate);
        true
    }

    /// Number of candidates.
    #[inline]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Iterate candidates, most likely first.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    /// Iterate candidates mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Candidate> {
        self.candidates.iter_mut()
    }

    /// Candidate at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.candidates.get(index)
    }

    /// Keep only candidates matching `keep`; returns how many were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&Candidate) -> bool) -> usize {
        let before = self.candidates.len();
        self.candidates.retain(|c| keep(c));
        before - self.candidates.len()
    }

    /// Kind of guesses held, `None` when empty.
    pub fn guess_kind(&self) -> Option<GuessKind> {
        self.candidates.first().map(|c| c.guard.kind())
    }

    /// Mark the set as covering every possible receiver class.
    pub fn mark_exhaustive(&mut self) {
        self.exhaustive = true;
    }

    /// Whether the set covers every possible receiver class.
    #[inline]
    pub fn is_exhaustive(&self) -> bool {
        self.exhaustive
    }

    /// Sum of candidate likelihoods.
    pub fn total_likelihood(&self) -> u32 {
        self.candidates.iter().map(|c| c.likelihood).sum()
    }

    /// Whether candidates are in descending likelihood order.
    pub fn is_sorted(&self) -> bool {
        self.candidates
            .windows(2)
            .all(|w| w[0].likelihood >= w[1].likelihood)
    }
}

// =============================================================================
// Guarded Devirtualization
// =============================================================================

/// A guard attached to a call site.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedDevirtualization {
    /// Surviving guesses.
    pub candidates: CandidateSet,
    /// Classification to restore if the guard is revoked.
    pub pre_guard_kind: CallKind,
}

impl GuardedDevirtualization {
    /// Wrap a non-empty candidate set; `None` for an empty one.
    pub fn attach(candidates: CandidateSet, pre_guard_kind: CallKind) -> Option<Self> {
        if candidates.is_empty() {
            return None;
        }
        Some(Self {
            candidates,
            pre_guard_kind,
        })
    }

    /// Whether the fallback dispatch is expected to be unreachable.
    #[inline]
    pub fn fallback_expected_unreachable(&self) -> bool {
        self.candidates.is_exhaustive()
    }
}
