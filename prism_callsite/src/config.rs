//! Pipeline Configuration
//!
//! One immutable [`PipelineConfig`] is built per compilation and passed by
//! reference to every stage. Nothing in the crate reads configuration from
//! anywhere else.

use crate::guarded::GuardSiteKind;
use crate::signature::TargetAbi;
use serde::Deserialize;

/// Configuration for call-site resolution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Try to prove virtual calls monomorphic.
    pub enable_devirtualization: bool,
    /// Use profile data to speculate on likely targets.
    pub enable_guarded_devirtualization: bool,
    /// Maximum number of guesses per call site.
    pub max_guesses: usize,
    /// Allow guessing a target method when no class guess is admitted.
    pub enable_method_guesses: bool,
    /// Minimum likelihood (percent) for a method guess.
    pub method_guess_threshold: u32,
    /// Allow exhaustive guesses over a closed class hierarchy.
    pub enable_exhaustive_guesses: bool,
    /// Evaluate inline candidates.
    pub enable_inlining: bool,
    /// Consider calls in tail position that carry no `tail.` prefix.
    pub enable_implicit_tail_calls: bool,
    /// Target ABI for struct return compatibility.
    pub target_abi: TargetAbi,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_devirtualization: true,
            enable_guarded_devirtualization: true,
            max_guesses: 1,
            enable_method_guesses: true,
            method_guess_threshold: 30,
            enable_exhaustive_guesses: true,
            enable_inlining: true,
            enable_implicit_tail_calls: true,
            target_abi: TargetAbi::default(),
        }
    }
}

impl PipelineConfig {
    /// Minimal-optimization configuration: classify and honour explicit
    /// tail calls only.
    pub fn minopts() -> Self {
        Self {
            enable_devirtualization: false,
            enable_guarded_devirtualization: false,
            enable_method_guesses: false,
            enable_exhaustive_guesses: false,
            enable_inlining: false,
            enable_implicit_tail_calls: false,
            ..Self::default()
        }
    }

    /// Tier-1 configuration: exact devirtualization and inlining, no
    /// speculation.
    pub fn tier1() -> Self {
        Self {
            enable_guarded_devirtualization: false,
            enable_exhaustive_guesses: false,
            ..Self::default()
        }
    }

    /// Tier-2 configuration.
    pub fn tier2() -> Self {
        Self::default()
    }

    /// Aggressive speculation with up to three guesses per site.
    pub fn aggressive() -> Self {
        Self {
            max_guesses: 3,
            ..Self::default()
        }
    }

    /// Set the maximum number of guesses.
    pub fn with_max_guesses(mut self, max_guesses: usize) -> Self {
        self.max_guesses = max_guesses;
        self
    }

    /// Minimum likelihood (percent) a class guess needs for a call of `kind`.
    pub fn likelihood_threshold(&self, kind: GuardSiteKind) -> u32 {
        match (self.max_guesses, kind) {
            (0 | 1, GuardSiteKind::CastHelper) => 50,
            (0 | 1, GuardSiteKind::Interface) => 25,
            (0 | 1, GuardSiteKind::Virtual) => 30,
            (2, GuardSiteKind::CastHelper) => 40,
            (2, GuardSiteKind::Interface) => 15,
            (2, GuardSiteKind::Virtual) => 20,
            _ => 10,
        }
    }

    /// Parse a configuration from TOML; missing keys take default values.
    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}
