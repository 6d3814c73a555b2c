use std::fmt;

use qa_core::phase::names;

/// Which subset of the pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Every phase.
    #[default]
    Full,
    /// Lint and unit tests only, no live services.
    Fast,
    /// Workflow tests against an already running environment.
    E2eOnly,
    /// Load tests against an already running environment.
    LoadOnly,
}

impl RunMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Fast => "fast",
            Self::E2eOnly => "e2e-only",
            Self::LoadOnly => "load-only",
        }
    }

    /// Whether the named phase belongs to this mode. Environment start and
    /// teardown are governed by their own flags.
    pub fn runs(self, phase: &str) -> bool {
        match self {
            Self::Full => true,
            Self::Fast => matches!(phase, names::LINT | names::UNIT_TESTS),
            Self::E2eOnly => matches!(phase, names::READINESS | names::E2E | names::INFRA_STATS),
            Self::LoadOnly => matches!(phase, names::READINESS | names::LOAD | names::INFRA_STATS),
        }
    }

    /// Whether the mode talks to live services at all.
    pub fn needs_services(self) -> bool {
        self.runs(names::READINESS)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_mode_skips_live_phases() {
        let mode = RunMode::Fast;
        assert!(mode.runs(names::LINT));
        assert!(mode.runs(names::UNIT_TESTS));
        assert!(!mode.runs(names::READINESS));
        assert!(!mode.runs(names::E2E));
        assert!(!mode.runs(names::LOAD));
        assert!(!mode.needs_services());
    }

    #[test]
    fn live_only_modes_exclude_each_other() {
        assert!(RunMode::E2eOnly.runs(names::E2E));
        assert!(!RunMode::E2eOnly.runs(names::LOAD));
        assert!(RunMode::LoadOnly.runs(names::LOAD));
        assert!(!RunMode::LoadOnly.runs(names::E2E));
        assert!(!RunMode::LoadOnly.runs(names::LINT));
        assert!(RunMode::Full.runs(names::INFRA_STATS));
    }
}
