use crate::steps::Step;

/// Percentage of terminal steps, rounded to the nearest integer.
///
/// Only an explicit `done` from the backend reaches 100: all steps being
/// terminal does not mean the backend finished its own bookkeeping, so the
/// result is otherwise capped at 99.
pub fn compute_percent(steps: &[Step], forced_done: bool) -> u8 {
    if forced_done {
        return 100;
    }
    let total = steps.len();
    if total == 0 {
        return 0;
    }
    let finished = steps.iter().filter(|s| s.status.is_terminal()).count();
    let pct = ((finished * 100) as f64 / total as f64).round() as u8;
    pct.min(99)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepStatus;

    fn steps(statuses: &[StepStatus]) -> Vec<Step> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| Step {
                id: format!("s{i}"),
                status: *status,
            })
            .collect()
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(compute_percent(&[], false), 0);
    }

    #[test]
    fn forced_done_is_exactly_100() {
        assert_eq!(compute_percent(&[], true), 100);
        let s = steps(&[StepStatus::Running, StepStatus::Running]);
        assert_eq!(compute_percent(&s, true), 100);
    }

    #[test]
    fn all_terminal_is_capped() {
        let s = steps(&[StepStatus::Success, StepStatus::Failure]);
        assert_eq!(compute_percent(&s, false), 99);
    }

    #[test]
    fn rounds_to_nearest() {
        let s = steps(&[StepStatus::Done, StepStatus::Running, StepStatus::Unknown]);
        assert_eq!(compute_percent(&s, false), 33);
        let s = steps(&[StepStatus::Done, StepStatus::Timeout, StepStatus::Running]);
        assert_eq!(compute_percent(&s, false), 67);
    }

    #[test]
    fn never_exceeds_99_without_done() {
        let all = [
            StepStatus::Running,
            StepStatus::Unknown,
            StepStatus::Success,
            StepStatus::Cancelled,
        ];
        for n in 0..6 {
            for pick in 0..all.len() {
                let s = steps(&vec![all[pick]; n]);
                assert!(compute_percent(&s, false) <= 99);
            }
        }
    }
}
