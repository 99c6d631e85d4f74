//! Export-budget allocation across the three phases.

use crate::phase::PhaseSet;

/// Result of one allocation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    /// Per-phase power as it will be served to the inverter, in W.
    pub watts: PhaseSet,
    /// Headroom left after the capping pass, in W. The surplus step discloses
    /// this amount into the served values, one third per phase.
    pub remaining_w: f64,
}

/// Cap per-phase export (negative watts) against `budget_w` watts of allowed
/// export. Pure; the caller's measurement is left untouched.
///
/// Three steps, phases always visited in L1, L2, L3 order:
/// 1. each exporting phase is raised toward zero by at most the budget still
///    available; import phases are skipped and the budget never goes
///    negative;
/// 2. budget left over after the pass is added to every phase in equal
///    thirds, so a correction never shows up on a single phase;
/// 3. otherwise, if the capped phases still sum to a net export, all three
///    values are replaced by the balanced split `total / 3`.
pub fn allocate(measured: PhaseSet, budget_w: f64) -> Allocation {
    let mut watts = measured.values();
    let mut remaining = budget_w;

    for w in &mut watts {
        if *w < 0.0 {
            let cut = (-*w).min(remaining);
            *w += cut;
            remaining -= cut;
        }
    }

    if remaining > 0.0 {
        let share = remaining / 3.0;
        for w in &mut watts {
            *w += share;
        }
    } else {
        let total: f64 = watts.iter().sum();
        if total < 0.0 {
            watts = [total / 3.0; 3];
        }
    }

    Allocation {
        watts: watts.into(),
        remaining_w: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn test_partial_capping_keeps_phase_shape() {
        // Budget runs out on L2; L3 imports and is left alone.
        let result = allocate(PhaseSet::new(-2000.0, -1000.0, 500.0), 2500.0);

        assert_eq!(result.watts, PhaseSet::new(0.0, -500.0, 500.0));
        assert_eq!(result.remaining_w, 0.0);
    }

    #[test]
    fn test_surplus_is_spread_over_all_phases() {
        // Export fully absorbed with 3920 W headroom left.
        let result = allocate(PhaseSet::balanced(-1000.0), 6920.0);

        assert_eq!(result.watts, PhaseSet::balanced(3920.0 / 3.0));
        assert_eq!(result.remaining_w, 3920.0);
    }

    #[test]
    fn test_deficit_collapses_to_balanced_export() {
        // 9000 W export against 2000 W budget leaves a balanced -7000 W.
        let result = allocate(PhaseSet::balanced(-3000.0), 2000.0);

        assert_eq!(result.watts, PhaseSet::balanced(-7000.0 / 3.0));
        assert_eq!(result.remaining_w, 0.0);
    }

    #[test]
    fn test_capping_consumes_budget_in_phase_order() {
        // L1 is zeroed before L2 sees any budget.
        let result = allocate(PhaseSet::new(-2000.0, -2000.0, 3000.0), 3000.0);

        assert_eq!(result.watts, PhaseSet::new(0.0, -1000.0, 3000.0));
    }

    #[test]
    fn test_zero_budget_still_balances_existing_export() {
        let result = allocate(PhaseSet::new(-300.0, 150.0, 0.0), 0.0);

        assert_eq!(result.watts, PhaseSet::balanced(-50.0));
        assert_eq!(result.remaining_w, 0.0);
    }

    #[test]
    fn test_all_import_discloses_full_headroom() {
        let result = allocate(PhaseSet::new(100.0, 200.0, 300.0), 600.0);

        assert_eq!(result.watts, PhaseSet::new(300.0, 400.0, 500.0));
        assert_eq!(result.remaining_w, 600.0);
    }

    #[test]
    fn test_allocation_conserves_sum_plus_budget() {
        // Whichever step ends the pass, the served sum is the measured sum
        // raised by exactly the budget.
        let cases = [
            (PhaseSet::new(-2000.0, -1000.0, 500.0), 2500.0),
            (PhaseSet::balanced(-1000.0), 6920.0),
            (PhaseSet::balanced(-3000.0), 2000.0),
            (PhaseSet::new(-100.0, 5000.0, 0.0), 600.0),
            (PhaseSet::new(0.0, 0.0, 0.0), 0.0),
            (PhaseSet::new(-1.5, -2.5, -3.5), 4.0),
        ];

        for (measured, budget) in cases {
            let result = allocate(measured, budget);

            assert_close(result.watts.sum(), measured.sum() + budget);
        }
    }

    #[test]
    fn test_input_is_not_mutated() {
        let measured = PhaseSet::balanced(-3000.0);

        let _ = allocate(measured, 2000.0);

        assert_eq!(measured, PhaseSet::balanced(-3000.0));
    }
}
