//! One-step derivatives of terms.
use std::sync::Arc;

use log::trace;

use super::{Derivation, DerivationAttempt, Op, Term, TermPool};
use crate::program::Call;

impl TermPool {
    /// Derivative of `term`, or [`None`] if `term` is not trial.
    ///
    /// With `nested`, calls to non-recursive procedures are unfolded into the
    /// procedure body, so that every derivation ends in a rule call. Otherwise
    /// derivation stops at the call boundary.
    pub fn attempt(&self, term: Term, nested: bool) -> Option<Arc<DerivationAttempt>> {
        if !self.is_trial(term) {
            return None;
        }
        let node = self.node(term);
        let cell = if nested {
            &node.attempt_nested
        } else {
            &node.attempt_flat
        };
        cell.get_or_init(|| {
            let attempt = self.compute_attempt(term, &node.op, nested);
            trace!(
                "Attempt of {} ({}): {} derivation(s), success {}, failure {}",
                term,
                if nested { "nested" } else { "flat" },
                attempt.derivations.len(),
                attempt.on_success,
                attempt.on_failure
            );
            Some(Arc::new(attempt))
        })
    }

    fn trial_attempt(&self, term: Term, nested: bool) -> Arc<DerivationAttempt> {
        self.attempt(term, nested)
            .unwrap_or_else(|| panic!("trial term {} has no attempt", term))
    }

    fn compute_attempt(&self, term: Term, op: &Op, nested: bool) -> DerivationAttempt {
        let raw = match op {
            Op::Call(call) => self.call_attempt(call, nested),
            Op::Delta { .. } | Op::Epsilon => {
                unreachable!("terminal term {} has no attempt", term)
            }
            Op::Seq(a, b) => {
                let attempt = self.trial_attempt(*a, nested);
                DerivationAttempt {
                    derivations: attempt.map_outer(|t| self.seq(t, *b)),
                    on_success: self.seq(attempt.on_success, *b),
                    on_failure: self.seq(attempt.on_failure, *b),
                }
            }
            Op::Or(a, b) => self.or_attempt(*a, *b, nested),
            Op::If {
                cond,
                then,
                also,
                otherwise,
            } => {
                let attempt = self.trial_attempt(*cond, nested);
                DerivationAttempt {
                    derivations: attempt.map_outer(|t| self.seq(t, *then)),
                    on_success: self.or(self.seq(attempt.on_success, *then), *also),
                    on_failure: self.if_also_else(attempt.on_failure, *then, *also, *otherwise),
                }
            }
            Op::Try(a, b) => {
                let attempt = self.trial_attempt(*a, nested);
                DerivationAttempt {
                    derivations: attempt.derivations.clone(),
                    on_success: attempt.on_success,
                    on_failure: self.try_else(attempt.on_failure, *b),
                }
            }
            Op::Alap(a) => {
                let unrolled = self.try_else(self.seq(*a, term), self.epsilon());
                (*self.trial_attempt(unrolled, nested)).clone()
            }
            Op::Star(a) => {
                let attempt = self.trial_attempt(*a, nested);
                // An iteration finished without applying a rule ends the loop
                let resume = |v: Term| {
                    if self.is_final(v) {
                        v
                    } else {
                        self.or(self.seq(v, term), self.epsilon())
                    }
                };
                DerivationAttempt {
                    derivations: attempt.map_outer(|t| self.seq(t, term)),
                    on_success: resume(attempt.on_success),
                    on_failure: resume(attempt.on_failure),
                }
            }
            Op::While(cond, body) => {
                let unrolled = if self.is_trial(*cond) {
                    self.if_also_else(*cond, self.seq(*body, term), self.delta(0), self.epsilon())
                } else {
                    self.seq(*body, term)
                };
                (*self.trial_attempt(unrolled, nested)).clone()
            }
            Op::Until(cond, body) => {
                let unrolled = if self.is_trial(*cond) {
                    self.if_also_else(*cond, self.epsilon(), self.delta(0), self.seq(*body, term))
                } else {
                    self.seq(*body, term)
                };
                (*self.trial_attempt(unrolled, nested)).clone()
            }
            Op::Atom(a) => {
                let attempt = self.trial_attempt(*a, nested);
                DerivationAttempt {
                    derivations: attempt.map_outer(|t| self.transit(t)),
                    on_success: self.atom(attempt.on_success),
                    on_failure: self.atom(attempt.on_failure),
                }
            }
            Op::Transit(a) => {
                let attempt = self.trial_attempt(*a, nested);
                DerivationAttempt {
                    derivations: attempt.map_outer(|t| self.transit(t)),
                    on_success: self.transit(attempt.on_success),
                    on_failure: self.transit(attempt.on_failure),
                }
            }
            Op::Body(inner, caller) => {
                let attempt = self.trial_attempt(*inner, nested);
                DerivationAttempt {
                    derivations: attempt
                        .derivations
                        .iter()
                        .map(|d| d.nest_under(caller, *inner))
                        .collect(),
                    on_success: self.body(attempt.on_success, caller),
                    on_failure: self.body(attempt.on_failure, caller),
                }
            }
        };

        let depth = self.transience(term) as i32;
        DerivationAttempt {
            derivations: raw
                .derivations
                .into_iter()
                .map(|d| {
                    let reached = self.transience(self.continuation(&d)) as i32;
                    let mut d = Arc::unwrap_or_clone(d);
                    d.transience_delta = reached - depth;
                    Arc::new(d)
                })
                .collect(),
            ..raw
        }
    }

    fn call_attempt(&self, call: &Call, nested: bool) -> DerivationAttempt {
        let derivation = Arc::new(Derivation::new(call.clone(), self.epsilon()));

        if nested
            && let Some(procedure) = call.as_procedure()
            && !self.is_recursive(&procedure.name)
            && let Some(body) = self.effective_body(procedure)
            && let Some(attempt) = self.attempt(self.body(body, &derivation), nested)
        {
            return (*attempt).clone();
        }

        let failure = self.delta(0);
        DerivationAttempt {
            derivations: vec![derivation],
            on_success: failure,
            on_failure: failure,
        }
    }

    fn or_attempt(&self, a: Term, b: Term, nested: bool) -> DerivationAttempt {
        let staged = |attempt: &DerivationAttempt, other: Term, other_first: bool| {
            let or = |t: Term| {
                if other_first {
                    self.or(other, t)
                } else {
                    self.or(t, other)
                }
            };
            DerivationAttempt {
                derivations: attempt.derivations.clone(),
                on_success: or(attempt.on_success),
                on_failure: or(attempt.on_failure),
            }
        };

        match (self.attempt(a, nested), self.attempt(b, nested)) {
            (Some(first), None) => staged(&first, b, false),
            (None, Some(second)) => staged(&second, a, true),
            (Some(first), Some(second)) if first.same_verdict() && second.same_verdict() => {
                let mut derivations = first.derivations.clone();
                for d in &second.derivations {
                    if !derivations.contains(d) {
                        derivations.push(d.clone());
                    }
                }
                let verdict = self.or(first.on_success, second.on_success);
                DerivationAttempt {
                    derivations,
                    on_success: verdict,
                    on_failure: verdict,
                }
            }
            // Try the side with a single verdict last, so that it is not repeated
            (Some(first), Some(second)) if first.same_verdict() => staged(&second, a, true),
            (Some(first), Some(_)) => staged(&first, b, false),
            (None, None) => unreachable!("or-term over two non-trial children"),
        }
    }
}
