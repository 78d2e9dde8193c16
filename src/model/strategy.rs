//! Strategy kinds and the records produced when one is set up.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Free-form, strategy-specific facts about a setup (link counts, roots, ids).
pub type Details = BTreeMap<String, String>;

/// One of the four interchangeable ways staging can reach production.
///
/// The declaration order is the default fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Verify production paths and rely on relative imports.
    #[serde(rename = "path-resolver")]
    PathResolver,

    /// Copy validated artifacts into production, with backup and rollback.
    #[serde(rename = "auto-deploy")]
    Deploy,

    /// Link production subpaths into staging.
    #[serde(rename = "symlink")]
    Symlink,

    /// Redirect imports through a per-environment resolver.
    #[serde(rename = "virtual")]
    VirtualEnv,
}

impl StrategyKind {
    /// The default fallback chain, cheapest first.
    pub const CHAIN: [Self; 4] = [
        Self::PathResolver,
        Self::Deploy,
        Self::Symlink,
        Self::VirtualEnv,
    ];

    /// The external name used on the command line and in persisted records.
    pub fn name(self) -> &'static str {
        match self {
            Self::PathResolver => "path-resolver",
            Self::Deploy => "auto-deploy",
            Self::Symlink => "symlink",
            Self::VirtualEnv => "virtual",
        }
    }

    /// Attempt order for a setup: the preference first, then the rest of the chain.
    pub fn attempt_order(preferred: Self) -> Vec<Self> {
        let mut order = vec![preferred];
        order.extend(Self::CHAIN.into_iter().filter(|k| *k != preferred));
        order
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::CHAIN
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown strategy '{s}'"))
    }
}

/// The result of one successful setup attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupOutcome {
    pub success: bool,
    pub strategy: StrategyKind,

    /// Whether this strategy was the one asked for, rather than a fallback.
    pub is_primary_choice: bool,
    pub details: Details,
}

/// A strategy that was tried and failed during a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupAttempt {
    pub strategy: StrategyKind,
    pub error: String,
}

/// What the caller gets back from a successful setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupReport {
    pub success: bool,
    pub solution: StrategyKind,
    pub is_primary: bool,
    pub outcome: SetupOutcome,

    /// Strategies tried before `solution`, in order.
    pub failed_attempts: Vec<SetupAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_order_puts_preference_first() {
        let order = StrategyKind::attempt_order(StrategyKind::Symlink);
        assert_eq!(
            order,
            vec![
                StrategyKind::Symlink,
                StrategyKind::PathResolver,
                StrategyKind::Deploy,
                StrategyKind::VirtualEnv,
            ]
        );
    }

    #[test]
    fn attempt_order_for_head_of_chain_is_the_chain() {
        let order = StrategyKind::attempt_order(StrategyKind::PathResolver);
        assert_eq!(order, StrategyKind::CHAIN.to_vec());
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in StrategyKind::CHAIN {
            assert_eq!(kind.name().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("hardlink".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn serializes_with_external_names() {
        let json = serde_json::to_string(&StrategyKind::Deploy).unwrap();
        assert_eq!(json, "\"auto-deploy\"");
    }
}
