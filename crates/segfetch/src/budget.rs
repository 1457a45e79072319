//! Retry round budgeting.

pub const MIN_RETRY_ROUNDS: usize = 10;
pub const MAX_RETRY_ROUNDS: usize = 120;
const MAX_BONUS: usize = 40;
const STAGNANT_ROUNDS_BEFORE_RAISE: usize = 3;
const STRONG_ROUNDS_BEFORE_LOWER: usize = 2;
const STRONG_RECOVERY_RATIO: f64 = 0.35;
const MIN_WORKERS_AFTER_BLOCK: usize = 8;

/// Number of retry rounds for a stream of `total` segments of which
/// `failed` missed the first pass.
pub fn retry_budget(base: usize, total: usize, failed: usize) -> usize {
    let segment_bonus = (total / 200).min(MAX_BONUS);
    let failure_bonus = (failed / 20).min(MAX_BONUS);
    (base.max(MIN_RETRY_ROUNDS) + segment_bonus + failure_bonus)
        .clamp(MIN_RETRY_ROUNDS, MAX_RETRY_ROUNDS)
}

/// Worker count after a round that saw blocking responses.
pub fn reduced_workers(current: usize) -> usize {
    current.min(MIN_WORKERS_AFTER_BLOCK.max(current * 7 / 10))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundVerdict {
    Continue,
    RaiseTimeout,
    LowerTimeout,
    Stop,
}

/// Watches recovery across retry rounds.
#[derive(Debug, Clone)]
pub struct StagnationTracker {
    stagnant: usize,
    strong: usize,
    limit: usize,
}

impl StagnationTracker {
    pub fn new(budget: usize) -> Self {
        Self {
            stagnant: 0,
            strong: 0,
            limit: 5usize.max(budget / 4),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn stagnant_rounds(&self) -> usize {
        self.stagnant
    }

    /// Record a round that retried `attempted` segments and recovered
    /// `recovered` of them.
    pub fn observe(&mut self, attempted: usize, recovered: usize) -> RoundVerdict {
        if recovered == 0 {
            self.stagnant += 1;
            self.strong = 0;
            if self.stagnant > self.limit {
                return RoundVerdict::Stop;
            }
            if self.stagnant >= STAGNANT_ROUNDS_BEFORE_RAISE {
                return RoundVerdict::RaiseTimeout;
            }
            return RoundVerdict::Continue;
        }

        self.stagnant = 0;
        if attempted > 0 && recovered as f64 / attempted as f64 >= STRONG_RECOVERY_RATIO {
            self.strong += 1;
            if self.strong >= STRONG_ROUNDS_BEFORE_LOWER {
                self.strong = 0;
                return RoundVerdict::LowerTimeout;
            }
        }
        RoundVerdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0, 0, 10)]
    #[case(10, 100, 5, 10)]
    #[case(10, 100, 30, 11)]
    #[case(10, 1000, 100, 20)]
    #[case(30, 2000, 200, 50)]
    #[case(10, 100_000, 10_000, 90)]
    #[case(500, 0, 0, 120)]
    fn budget_formula(
        #[case] base: usize,
        #[case] total: usize,
        #[case] failed: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(retry_budget(base, total, failed), expected);
    }

    #[test]
    fn budget_is_always_bounded() {
        for base in [0, 1, 10, 50, 200, usize::MAX / 4] {
            for total in [0, 1, 199, 200, 8000, 1_000_000] {
                for failed in [0, 19, 20, 800, 1_000_000] {
                    let budget = retry_budget(base, total, failed);
                    assert!((MIN_RETRY_ROUNDS..=MAX_RETRY_ROUNDS).contains(&budget));
                }
            }
        }
    }

    #[rstest]
    #[case(100, 70)]
    #[case(10, 8)]
    #[case(8, 8)]
    #[case(4, 4)]
    fn worker_reduction(#[case] current: usize, #[case] expected: usize) {
        assert_eq!(reduced_workers(current), expected);
    }

    #[test]
    fn stagnation_raises_then_stops() {
        let mut tracker = StagnationTracker::new(10);
        assert_eq!(tracker.limit(), 5);
        assert_eq!(tracker.observe(5, 0), RoundVerdict::Continue);
        assert_eq!(tracker.observe(5, 0), RoundVerdict::Continue);
        for _ in 0..3 {
            assert_eq!(tracker.observe(5, 0), RoundVerdict::RaiseTimeout);
        }
        assert_eq!(tracker.observe(5, 0), RoundVerdict::Stop);
    }

    #[test]
    fn strong_rounds_lower_the_timeout() {
        let mut tracker = StagnationTracker::new(40);
        assert_eq!(tracker.limit(), 10);
        assert_eq!(tracker.observe(10, 4), RoundVerdict::Continue);
        assert_eq!(tracker.observe(6, 3), RoundVerdict::LowerTimeout);
        assert_eq!(tracker.observe(3, 1), RoundVerdict::Continue);
        assert_eq!(tracker.stagnant_rounds(), 0);
    }
}
