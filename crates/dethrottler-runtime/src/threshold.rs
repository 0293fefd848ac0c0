use dethrottler_core::{LoadAverages, LoadPeriod, Thresholds};
use std::collections::BTreeSet;

/// Result of comparing one normalized sample against the thresholds
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    /// Any enabled period exceeded its threshold
    pub overloaded: bool,
    /// Periods whose normalized load was strictly above a nonzero threshold
    pub exceeded: BTreeSet<LoadPeriod>,
}

impl Verdict {
    pub fn is_exceeded(&self, period: LoadPeriod) -> bool {
        self.exceeded.contains(&period)
    }
}

/// Compare normalized load against thresholds.
///
/// A period counts only when its threshold is nonzero, and only when the load
/// is strictly greater; equal-to-threshold never triggers. With every period
/// disabled the verdict is never overloaded.
pub fn evaluate(normalized: &LoadAverages, thresholds: &Thresholds) -> Verdict {
    let exceeded: BTreeSet<LoadPeriod> = LoadPeriod::ALL
        .into_iter()
        .filter(|p| thresholds.is_enabled(*p) && normalized.get(*p) > thresholds.get(*p))
        .collect();

    Verdict {
        overloaded: !exceeded.is_empty(),
        exceeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(load1m: f64, load5m: f64, load15m: f64) -> Thresholds {
        Thresholds {
            load1m,
            load5m,
            load15m,
        }
    }

    #[test]
    fn test_strictly_greater_exceeds() {
        let verdict = evaluate(
            &LoadAverages::new(2.25, 0.0, 0.0),
            &thresholds(2.0, 0.0, 0.0),
        );
        assert!(verdict.overloaded);
        assert!(verdict.is_exceeded(LoadPeriod::OneMinute));
        assert_eq!(verdict.exceeded.len(), 1);
    }

    #[test]
    fn test_equal_to_threshold_does_not_exceed() {
        let verdict = evaluate(
            &LoadAverages::new(2.0, 1.5, 1.0),
            &thresholds(2.0, 1.5, 1.0),
        );
        assert!(!verdict.overloaded);
        assert!(verdict.exceeded.is_empty());
    }

    #[test]
    fn test_zero_threshold_never_triggers() {
        let verdict = evaluate(
            &LoadAverages::new(100.0, 100.0, 0.1),
            &thresholds(0.0, 0.0, 1.0),
        );
        assert!(!verdict.overloaded);
    }

    #[test]
    fn test_all_disabled_is_never_overloaded() {
        let verdict = evaluate(&LoadAverages::new(1e9, 1e9, 1e9), &Thresholds::default());
        assert!(!verdict.overloaded);
        assert!(verdict.exceeded.is_empty());
    }

    #[test]
    fn test_any_period_is_enough() {
        let verdict = evaluate(
            &LoadAverages::new(0.5, 0.5, 1.2),
            &thresholds(1.0, 1.0, 1.0),
        );
        assert!(verdict.overloaded);
        assert!(!verdict.is_exceeded(LoadPeriod::OneMinute));
        assert!(!verdict.is_exceeded(LoadPeriod::FiveMinutes));
        assert!(verdict.is_exceeded(LoadPeriod::FifteenMinutes));
    }

    #[test]
    fn test_reports_every_exceeded_period() {
        let verdict = evaluate(
            &LoadAverages::new(3.0, 2.0, 0.9),
            &thresholds(1.0, 1.0, 1.0),
        );
        let periods: Vec<LoadPeriod> = verdict.exceeded.iter().copied().collect();
        assert_eq!(
            periods,
            vec![LoadPeriod::OneMinute, LoadPeriod::FiveMinutes]
        );
    }
}
