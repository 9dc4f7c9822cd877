use std::{collections::HashSet, sync::Arc};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use hyctrl::{
    automaton::{Automaton, ValueNodeFactory},
    program::{Call, Program, Rule},
    term::{Term, TermPool},
    utils::conf::AutomatonConfig,
};

const SEEDS: u64 = 48;

/// Random control terms over three parameterless rules.
struct TermGen<'a> {
    pool: &'a TermPool,
    rules: Vec<Term>,
    rng: ChaCha20Rng,
}

impl<'a> TermGen<'a> {
    fn new(pool: &'a TermPool, seed: u64) -> Self {
        let rules = ["a", "b", "c"]
            .into_iter()
            .map(|name| pool.call(Call::rule(&Arc::new(Rule::transformer(name)), vec![]).unwrap()))
            .collect();
        Self {
            pool,
            rules,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    fn rule(&mut self) -> Term {
        self.rules[self.rng.random_range(0..self.rules.len())]
    }

    fn any(&mut self, depth: u32) -> Term {
        let pool = self.pool;
        if depth == 0 {
            return match self.rng.random_range(0..6) {
                0 => pool.epsilon(),
                _ => self.rule(),
            };
        }
        match self.rng.random_range(0..10) {
            0 => self.rule(),
            1 => pool.seq(self.any(depth - 1), self.any(depth - 1)),
            2 => pool.or(self.any(depth - 1), self.any(depth - 1)),
            3 => pool.star(self.progress(depth - 1)),
            4 => pool.alap(self.progress(depth - 1)),
            5 => pool.try_else(self.any(depth - 1), self.any(depth - 1)),
            6 => pool.if_else(self.progress(depth - 1), self.any(depth - 1), self.any(depth - 1)),
            7 => pool.atom(self.any(depth - 1)),
            8 => pool.while_(self.progress(depth - 1), self.progress(depth - 1)),
            _ => pool.until(self.progress(depth - 1), self.progress(depth - 1)),
        }
    }

    /// Terms that cannot finish without applying a rule.
    fn progress(&mut self, depth: u32) -> Term {
        let pool = self.pool;
        if depth == 0 {
            return self.rule();
        }
        match self.rng.random_range(0..5) {
            0 => self.rule(),
            1 => pool.seq(self.progress(depth - 1), self.any(depth - 1)),
            2 => pool.or(self.progress(depth - 1), self.progress(depth - 1)),
            3 => pool.try_else(self.progress(depth - 1), self.progress(depth - 1)),
            _ => pool.atom(self.progress(depth - 1)),
        }
    }
}

fn config() -> AutomatonConfig {
    AutomatonConfig {
        exploration_limit: Some(100_000),
        ..Default::default()
    }
}

#[test]
fn construction_is_canonical() {
    let pool = TermPool::new();
    for seed in 0..SEEDS {
        let first = TermGen::new(&pool, seed).any(4);
        let size = pool.len();
        let second = TermGen::new(&pool, seed).any(4);
        assert_eq!(first, second, "seed {}", seed);
        assert_eq!(pool.len(), size, "seed {}: rebuilding allocated terms", seed);
    }
}

#[test]
fn algebra_laws_hold_on_reachable_terms() {
    let pool = TermPool::new();
    let (eps, dead) = (pool.epsilon(), pool.delta(0));
    for seed in 0..SEEDS {
        let start = TermGen::new(&pool, seed).any(3);
        for t in pool.explore_terms(start, &config()).unwrap() {
            assert_eq!(pool.seq(eps, t), t);
            assert_eq!(pool.seq(dead, t), dead);
            assert_eq!(pool.or(t, dead), t);
            assert_eq!(pool.or(dead, t), t);
            assert_eq!(pool.or(t, t), t);
            assert_eq!(pool.star(pool.star(t)), pool.star(t));
            assert_eq!(pool.attempt(t, true).is_some(), pool.is_trial(t));
        }
    }
}

#[test]
fn attempts_stay_within_the_explored_terms() {
    let pool = TermPool::new();
    for seed in 0..SEEDS {
        let start = TermGen::new(&pool, seed).any(3);
        let terms = pool.explore_terms(start, &config()).unwrap();
        let reached: HashSet<Term> = terms.iter().copied().collect();
        assert_eq!(reached.len(), terms.len());

        for &t in &terms {
            let Some(attempt) = pool.attempt(t, true) else {
                continue;
            };
            assert!(!attempt.derivations().is_empty(), "{}", pool.fmt(t));
            assert!(reached.contains(&attempt.on_success()));
            assert!(reached.contains(&attempt.on_failure()));
            for d in attempt.derivations() {
                assert!(reached.contains(&d.outermost().target()));
                let shift = pool.transience(pool.continuation(d)) as i32 - pool.transience(t) as i32;
                assert_eq!(d.transience_delta(), shift, "{}", pool.fmt(t));
            }
        }
    }
}

#[test]
fn automata_are_deterministic() {
    for seed in 0..SEEDS {
        let shapes: Vec<_> = (0..2)
            .map(|_| {
                let pool = TermPool::new();
                let main = TermGen::new(&pool, seed).any(3);
                let automaton =
                    Automaton::from_program(&pool, &Program::new(main), config()).unwrap();
                automaton.initialise(&ValueNodeFactory::default()).unwrap();
                let graph = automaton.to_graph(true).unwrap();
                (
                    pool.fmt(main).to_string(),
                    automaton.len(),
                    graph.node_count(),
                    graph.edge_count(),
                )
            })
            .collect();
        assert_eq!(shapes[0], shapes[1], "seed {}", seed);
    }
}

#[test]
fn steps_are_ordered_and_leave_their_source() {
    for seed in 0..SEEDS {
        let pool = TermPool::new();
        let main = TermGen::new(&pool, seed).any(3);
        let automaton = Automaton::from_program(&pool, &Program::new(main), config()).unwrap();
        automaton.initialise(&ValueNodeFactory::default()).unwrap();

        for id in automaton.explore().unwrap() {
            let frame = automaton.frame(id);
            let Some(attempt) = automaton.attempt(id) else {
                assert!(!frame.is_trial() || frame.is_error() || frame.is_removed());
                continue;
            };
            assert!(frame.is_trial());
            assert!(attempt.steps().windows(2).all(|w| w[0] < w[1]));
            for step in attempt.steps() {
                assert_eq!(step.source(), id);
                assert!(automaton.frame(step.target()).is_prime());
                assert_eq!(step.depth_delta(), 0);
            }
            let success = automaton.frame(attempt.on_success());
            assert_eq!(success.pred(), Some(id));
            assert_eq!(success.prime(), frame.prime());
        }
    }
}
