//! Term constructors.
//!
//! Every constructor normalises its result so that composite operators are
//! only ever built over a trial principal child: whatever can already be
//! decided from the children's types is resolved here, once.
use std::sync::Arc;

use super::{Derivation, Op, Term, TermPool, TermType};
use crate::program::Call;

impl TermPool {
    pub fn epsilon(&self) -> Term {
        self.intern(Op::Epsilon)
    }

    /// Failure at transient depth `depth`.
    pub fn delta(&self, depth: u32) -> Term {
        self.intern(Op::Delta { depth })
    }

    pub fn call(&self, call: Call) -> Term {
        self.intern(Op::Call(call))
    }

    /// `a; b`
    pub fn seq(&self, a: Term, b: Term) -> Term {
        match self.term_type(a) {
            TermType::Final => b,
            TermType::Dead => a,
            TermType::Trial => self.intern(Op::Seq(a, b)),
        }
    }

    /// `a | b`
    pub fn or(&self, a: Term, b: Term) -> Term {
        if self.is_dead(a) {
            b
        } else if self.is_dead(b) || a == b {
            a
        } else {
            self.intern(Op::Or(a, b))
        }
    }

    /// `if (cond) then | also else otherwise`: `also` is an alternative to
    /// `then` once `cond` succeeded, `otherwise` runs if `cond` failed.
    pub fn if_also_else(&self, cond: Term, then: Term, also: Term, otherwise: Term) -> Term {
        match self.term_type(cond) {
            TermType::Final => self.or(then, also),
            TermType::Dead => otherwise,
            TermType::Trial => self.intern(Op::If {
                cond,
                then,
                also,
                otherwise,
            }),
        }
    }

    /// `if (cond) then else otherwise`
    pub fn if_else(&self, cond: Term, then: Term, otherwise: Term) -> Term {
        let also = self.delta(self.transience(cond));
        self.if_also_else(cond, then, also, otherwise)
    }

    /// `try a else b`
    pub fn try_else(&self, a: Term, b: Term) -> Term {
        match self.term_type(a) {
            TermType::Final => a,
            TermType::Dead => b,
            TermType::Trial => self.intern(Op::Try(a, b)),
        }
    }

    /// `alap a`: repeat `a` as long as possible.
    pub fn alap(&self, a: Term) -> Term {
        if self.is_trial(a) {
            self.intern(Op::Alap(a))
        } else {
            self.epsilon()
        }
    }

    /// `until (cond) body`
    pub fn until(&self, cond: Term, body: Term) -> Term {
        match self.term_type(cond) {
            TermType::Final => self.epsilon(),
            TermType::Dead if !self.is_trial(body) => self.delta(0),
            _ => self.intern(Op::Until(cond, body)),
        }
    }

    /// `while (cond) body`
    pub fn while_(&self, cond: Term, body: Term) -> Term {
        match self.term_type(cond) {
            TermType::Dead => self.epsilon(),
            TermType::Final if !self.is_trial(body) => self.delta(0),
            _ => self.intern(Op::While(cond, body)),
        }
    }

    /// `a*`
    pub fn star(&self, a: Term) -> Term {
        if !self.is_trial(a) {
            return self.epsilon();
        }
        match self.op(a) {
            Op::Star(_) => a,
            _ => self.intern(Op::Star(a)),
        }
    }

    /// `atomic { a }`
    pub fn atom(&self, a: Term) -> Term {
        if !self.is_trial(a) || self.is_atomic(a) {
            a
        } else {
            self.intern(Op::Atom(a))
        }
    }

    /// `a` inside an entered atomic block.
    pub fn transit(&self, a: Term) -> Term {
        match self.term_type(a) {
            TermType::Final => self.epsilon(),
            TermType::Dead => self.delta(self.transience(a) + 1),
            TermType::Trial => self.intern(Op::Transit(a)),
        }
    }

    /// `inner`, executed as the body of the procedure invoked by `caller`.
    pub fn body(&self, inner: Term, caller: &Arc<Derivation>) -> Term {
        match self.term_type(inner) {
            TermType::Final => self.continuation(caller),
            TermType::Dead => self.delta(self.transience(inner)),
            TermType::Trial => self.intern(Op::Body(inner, caller.clone())),
        }
    }

    /// Term reached once `derivation` has been taken, seen from the level of
    /// its outermost caller.
    pub fn continuation(&self, derivation: &Derivation) -> Term {
        match &derivation.caller {
            Some(caller) => self.body(derivation.target, caller),
            None => derivation.target,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::program::Rule;

    fn rule(pool: &TermPool, name: &str) -> Term {
        pool.call(Call::rule(&Arc::new(Rule::transformer(name)), vec![]).unwrap())
    }

    #[test]
    fn normalisation_resolves_decided_children() {
        let pool = TermPool::new();
        let a = rule(&pool, "a");
        let (eps, delta) = (pool.epsilon(), pool.delta(0));

        assert_eq!(pool.if_else(eps, a, delta), a);
        assert_eq!(pool.if_else(delta, a, eps), eps);
        assert_eq!(pool.try_else(delta, a), a);
        assert_eq!(pool.alap(eps), eps);
        assert_eq!(pool.while_(delta, a), eps);
        assert_eq!(pool.while_(eps, eps), delta);
        assert_eq!(pool.until(eps, a), eps);
        assert_eq!(pool.until(delta, eps), delta);
        assert_eq!(pool.transit(delta), pool.delta(1));
        assert_eq!(pool.transit(eps), eps);
        // Single rule calls are atomic already
        assert_eq!(pool.atom(a), a);
    }

    #[test]
    fn composite_terms_are_trial() {
        let pool = TermPool::new();
        let (a, b) = (rule(&pool, "a"), rule(&pool, "b"));
        for t in [
            pool.seq(a, b),
            pool.or(a, pool.epsilon()),
            pool.star(a),
            pool.alap(a),
            pool.atom(pool.seq(a, b)),
            pool.transit(a),
            pool.while_(a, b),
            pool.until(a, b),
        ] {
            assert!(pool.is_trial(t), "{}", pool.fmt(t));
        }
    }

    #[test]
    fn transience_of_transit() {
        let pool = TermPool::new();
        let a = rule(&pool, "a");
        let t = pool.transit(pool.transit(a));
        assert_eq!(pool.transience(t), 2);
        assert_eq!(pool.transience(pool.or(t, a)), 2);
        assert_eq!(pool.transience(pool.seq(a, t)), 0);
    }
}
