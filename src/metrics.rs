//! Per-strategy setup metrics and the report derived from them.
//!
//! The ledger only ever informs a human. Nothing reads it to pick a strategy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::StrategyKind;

/// Below this success rate a strategy is flagged.
const LOW_SUCCESS_PERCENT: f64 = 80.0;

/// Attempts needed before a success rate is worth flagging.
const MIN_ATTEMPTS_FOR_FLAG: u64 = 5;

/// Running totals for one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyMetrics {
    pub usage_count: u64,
    pub success_count: u64,
    pub total_duration_ms: u64,
}

impl StrategyMetrics {
    fn success_percent(self) -> f64 {
        if self.usage_count == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.success_count as f64 / self.usage_count as f64 * 100.0;
        pct
    }

    fn average_duration_ms(self) -> u64 {
        self.total_duration_ms
            .checked_div(self.usage_count)
            .unwrap_or_default()
    }
}

/// Accumulated setup metrics, one entry per strategy that was ever attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsLedger {
    entries: BTreeMap<StrategyKind, StrategyMetrics>,
}

/// A strategy's success rate, formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessRate {
    /// Percentage with one decimal, e.g. `"66.7%"`.
    pub rate: String,
    pub successes: u64,
    pub attempts: u64,
}

/// Read-only view over the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub usage: BTreeMap<StrategyKind, u64>,
    pub success_rates: BTreeMap<StrategyKind, SuccessRate>,
    pub average_duration_ms: BTreeMap<StrategyKind, u64>,
    pub recommendations: Vec<String>,
}

impl MetricsLedger {
    pub fn from_entries(
        entries: impl IntoIterator<Item = (StrategyKind, StrategyMetrics)>,
    ) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (StrategyKind, StrategyMetrics)> + '_ {
        self.entries.iter().map(|(k, m)| (*k, *m))
    }

    #[cfg(test)]
    pub fn get(&self, kind: StrategyKind) -> Option<StrategyMetrics> {
        self.entries.get(&kind).copied()
    }

    /// Record one setup attempt.
    pub fn record(&mut self, kind: StrategyKind, success: bool, duration_ms: u64) {
        let entry = self.entries.entry(kind).or_default();
        entry.usage_count += 1;
        if success {
            entry.success_count += 1;
        }
        entry.total_duration_ms += duration_ms;
    }

    /// Derive rates and recommendations. `active` is the strategy in use, if any.
    pub fn report(&self, active: Option<StrategyKind>) -> MetricsReport {
        let mut usage = BTreeMap::new();
        let mut success_rates = BTreeMap::new();
        let mut average_duration_ms = BTreeMap::new();

        for (kind, m) in self.entries() {
            usage.insert(kind, m.usage_count);
            success_rates.insert(
                kind,
                SuccessRate {
                    rate: format!("{:.1}%", m.success_percent()),
                    successes: m.success_count,
                    attempts: m.usage_count,
                },
            );
            average_duration_ms.insert(kind, m.average_duration_ms());
        }

        MetricsReport {
            usage,
            success_rates,
            average_duration_ms,
            recommendations: self.recommendations(active),
        }
    }

    fn recommendations(&self, active: Option<StrategyKind>) -> Vec<String> {
        let mut out = Vec::new();

        for (kind, m) in self.entries() {
            if m.usage_count >= MIN_ATTEMPTS_FOR_FLAG && m.success_percent() < LOW_SUCCESS_PERCENT {
                out.push(format!(
                    "{kind} succeeds only {:.1}% of the time ({} of {}); check its prerequisites",
                    m.success_percent(),
                    m.success_count,
                    m.usage_count,
                ));
            }
        }

        // Only strategies that have succeeded at least once are candidates.
        let fastest = self
            .entries()
            .filter(|(_, m)| m.success_count > 0)
            .min_by_key(|(_, m)| m.average_duration_ms());
        if let (Some((fastest, m)), Some(active)) = (fastest, active)
            && fastest != active
        {
            out.push(format!(
                "consider switching to {fastest}: lowest average setup time ({} ms)",
                m.average_duration_ms()
            ));
        }

        out
    }
}
