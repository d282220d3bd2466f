//! Order-preserving 1D alignment of detections to an expected contact pattern.
//!
//! Positions are axial coordinates along the fitted deep axis. Contact `j` is expected at
//! `shift + sign * offsets[j]`; `sign` is negative when the tip sits on the target.

use serde::{Deserialize, Serialize};

const COST_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMatch {
    /// 0-based contact index from the tip.
    pub contact: usize,
    pub detection: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub shift: f64,
    pub matches: Vec<ContactMatch>,
    /// Sum of matched axial residuals plus `tolerance` per unmatched contact.
    pub cost: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PatternAligner<'a> {
    pub positions: &'a [f64],
    pub offsets: &'a [f64],
    pub sign: f64,
    pub tolerance_mm: f64,
}

#[derive(Clone, Copy)]
enum Step {
    Match,
    SkipContact,
    SkipDetection,
}

impl<'a> PatternAligner<'a> {
    pub fn expected(&self, shift: f64, contact: usize) -> f64 {
        shift + self.sign * self.offsets[contact]
    }

    /// Minimum-cost monotonic matching for a fixed shift.
    pub fn align_at(&self, shift: f64) -> Alignment {
        let mut det_order: Vec<usize> = (0..self.positions.len()).collect();
        det_order.sort_by(|&a, &b| self.positions[a].total_cmp(&self.positions[b]));
        let mut exp_order: Vec<usize> = (0..self.offsets.len()).collect();
        exp_order.sort_by(|&a, &b| self.expected(shift, a).total_cmp(&self.expected(shift, b)));

        let (n_exp, n_det) = (exp_order.len(), det_order.len());
        let tol = self.tolerance_mm;
        let mut cost = vec![vec![0.0f64; n_det + 1]; n_exp + 1];
        let mut step = vec![vec![Step::SkipDetection; n_det + 1]; n_exp + 1];
        for a in 1..=n_exp {
            cost[a][0] = a as f64 * tol;
            step[a][0] = Step::SkipContact;
        }

        for a in 1..=n_exp {
            let e = self.expected(shift, exp_order[a - 1]);
            for b in 1..=n_det {
                let residual = (self.positions[det_order[b - 1]] - e).abs();
                let mut best = (f64::INFINITY, Step::Match);
                if residual <= tol {
                    best = (cost[a - 1][b - 1] + residual, Step::Match);
                }
                let skip_contact = cost[a - 1][b] + tol;
                if skip_contact < best.0 - COST_EPSILON {
                    best = (skip_contact, Step::SkipContact);
                }
                let skip_detection = cost[a][b - 1];
                if skip_detection < best.0 - COST_EPSILON {
                    best = (skip_detection, Step::SkipDetection);
                }
                cost[a][b] = best.0;
                step[a][b] = best.1;
            }
        }

        let mut matches = Vec::new();
        let (mut a, mut b) = (n_exp, n_det);
        while a > 0 {
            if b == 0 {
                a -= 1;
                continue;
            }
            match step[a][b] {
                Step::Match => {
                    matches.push(ContactMatch {
                        contact: exp_order[a - 1],
                        detection: det_order[b - 1],
                    });
                    a -= 1;
                    b -= 1;
                }
                Step::SkipContact => a -= 1,
                Step::SkipDetection => b -= 1,
            }
        }
        matches.sort_by_key(|m| m.contact);

        Alignment {
            shift,
            matches,
            cost: cost[n_exp][n_det],
        }
    }

    /// Searches shifts within `max_shift_mm` of `planned_shift`, then refines the winner by
    /// least squares over its matched pairs.
    pub fn best_alignment(&self, planned_shift: f64, max_shift_mm: f64) -> Alignment {
        let within = |s: f64| (s - planned_shift).abs() <= max_shift_mm + COST_EPSILON;
        let mut candidates = vec![planned_shift];
        for &t in self.positions {
            for &o in self.offsets {
                let s = t - self.sign * o;
                if within(s) {
                    candidates.push(s);
                }
            }
        }

        let mut best = self.align_at(planned_shift);
        for &s in &candidates[1..] {
            let trial = self.align_at(s);
            if self.is_better(&trial, &best, planned_shift) {
                best = trial;
            }
        }

        if !best.matches.is_empty() {
            let mean = best
                .matches
                .iter()
                .map(|m| self.positions[m.detection] - self.sign * self.offsets[m.contact])
                .sum::<f64>()
                / best.matches.len() as f64;
            let refined_shift = mean.clamp(planned_shift - max_shift_mm, planned_shift + max_shift_mm);
            let refined = self.align_at(refined_shift);
            if refined.cost <= best.cost + COST_EPSILON
                && refined.matches.len() >= best.matches.len()
            {
                best = refined;
            }
        }
        best
    }

    fn is_better(&self, trial: &Alignment, best: &Alignment, planned_shift: f64) -> bool {
        if trial.cost < best.cost - COST_EPSILON {
            return true;
        }
        if trial.cost > best.cost + COST_EPSILON {
            return false;
        }
        if trial.matches.len() != best.matches.len() {
            return trial.matches.len() > best.matches.len();
        }
        (trial.shift - planned_shift).abs() < (best.shift - planned_shift).abs() - COST_EPSILON
    }
}
