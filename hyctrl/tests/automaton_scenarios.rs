use std::sync::Arc;

use hyctrl::{
    automaton::{AssignKind, Automaton, CheckPolicy, ControlEdge, FrameId, ValueNodeFactory},
    program::{Call, Procedure, Program, Rule, RuleRole},
    term::{Term, TermPool},
    utils::conf::AutomatonConfig,
};

fn rule(pool: &TermPool, name: &str) -> Term {
    role(pool, name, RuleRole::Transformer)
}

fn role(pool: &TermPool, name: &str, role: RuleRole) -> Term {
    let rule = Arc::new(Rule::new(name, role, vec![]));
    pool.call(Call::rule(&rule, vec![]).expect("valid call"))
}

fn automaton(pool: &TermPool, program: &Program) -> Automaton {
    let automaton = Automaton::from_program(pool, program, AutomatonConfig::default())
        .expect("program compiles");
    automaton
        .initialise(&ValueNodeFactory::default())
        .expect("constants materialise");
    automaton
}

fn term_of(automaton: &Automaton, frame: FrameId) -> Term {
    let location = automaton.frame(frame).location().expect("control frame");
    automaton.templates().location(location).term()
}

fn step_names(automaton: &Automaton, frame: FrameId) -> Vec<String> {
    automaton
        .attempt(frame)
        .map(|attempt| {
            attempt
                .steps()
                .iter()
                .map(|s| s.call().name().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn sequence_steps_through_both_rules() {
    let pool = TermPool::new();
    let (a, b) = (rule(&pool, "a"), rule(&pool, "b"));
    let automaton = automaton(&pool, &Program::new(pool.seq(a, b)));

    let start = automaton.start();
    let first = automaton.attempt(start).expect("start is trial");
    assert_eq!(step_names(&automaton, start), ["a"]);
    let middle = first.steps()[0].target();
    assert_eq!(term_of(&automaton, middle), b);

    let second = automaton.attempt(middle).expect("b remains");
    assert_eq!(step_names(&automaton, middle), ["b"]);
    let end = second.steps()[0].target();
    assert!(automaton.frame(end).is_final());
    assert!(automaton.attempt(end).is_none());

    assert!(first.same_verdict());
    assert!(automaton.frame(first.on_failure()).is_dead());
}

#[test]
fn choice_offers_both_rules_from_one_frame() {
    let pool = TermPool::new();
    let (a, b) = (rule(&pool, "a"), rule(&pool, "b"));
    let automaton = automaton(&pool, &Program::new(pool.or(a, b)));

    let attempt = automaton.attempt(automaton.start()).unwrap();
    assert_eq!(attempt.steps().len(), 2);
    assert!(attempt.steps().iter().all(|s| s.source() == automaton.start()));
    assert_eq!(attempt.steps()[0].target(), attempt.steps()[1].target());
    assert_eq!(step_names(&automaton, automaton.start()), ["a", "b"]);
}

#[test]
fn star_loops_on_the_start_frame() {
    let pool = TermPool::new();
    let a = rule(&pool, "a");
    let automaton = automaton(&pool, &Program::new(pool.star(a)));

    let start = automaton.start();
    let attempt = automaton.attempt(start).unwrap();
    assert_eq!(attempt.steps().len(), 1);
    assert_eq!(attempt.steps()[0].target(), start);
    assert!(!attempt.steps()[0].is_modifying());
    assert!(automaton.frame(attempt.on_success()).is_final());

    assert_eq!(automaton.explore().unwrap().len(), 2);
    assert_eq!(automaton.len(), 2);
}

#[test]
fn empty_procedure_collapses_into_the_caller() {
    let pool = TermPool::new();
    let c = rule(&pool, "c");
    let p = Arc::new(Procedure::function("p", vec![]));
    pool.define(&p, pool.epsilon());
    let call = pool.call(Call::procedure(&p, vec![]).unwrap());
    let automaton = automaton(&pool, &Program::new(pool.seq(call, c)).with_procedure(p));

    // The call leaves no switch behind, only the rule after it
    assert_eq!(automaton.templates().main().switches().len(), 1);

    let start = automaton.start();
    let attempt = automaton.attempt(start).expect("the call is trial");
    assert!(attempt.steps().is_empty());
    assert!(attempt.same_verdict());

    let continuation = automaton.frame(attempt.on_success());
    assert_eq!(term_of(&automaton, continuation.id()), c);
    assert_eq!(continuation.pred(), Some(start));
    assert_eq!(continuation.prime(), start);
    assert_eq!(continuation.depth(), 0);
    assert!(continuation.pops().is_empty());
    assert_eq!(step_names(&automaton, continuation.id()), ["c"]);

    let reached = automaton.explore().unwrap();
    assert!(
        reached
            .iter()
            .any(|&id| step_names(&automaton, id).iter().any(|name| name == "c"))
    );
}

#[test]
fn empty_procedure_alone_finishes_the_program() {
    let pool = TermPool::new();
    let p = Arc::new(Procedure::recipe("p", vec![]));
    pool.define(&p, pool.epsilon());
    let main = pool.call(Call::procedure(&p, vec![]).unwrap());
    let automaton = automaton(&pool, &Program::new(main).with_procedure(p));

    let attempt = automaton.attempt(automaton.start()).unwrap();
    assert!(attempt.steps().is_empty());
    assert!(automaton.frame(attempt.on_success()).is_final());
    assert!(automaton.frame(attempt.on_failure()).is_final());
}

#[test]
fn empty_procedures_always_succeed() {
    let pool = TermPool::new();
    let (c, d) = (rule(&pool, "c"), rule(&pool, "d"));
    let p = Arc::new(Procedure::function("p", vec![]));
    pool.define(&p, pool.epsilon());
    let call = pool.call(Call::procedure(&p, vec![]).unwrap());
    let main = pool.try_else(pool.seq(call, c), d);
    let automaton = automaton(&pool, &Program::new(main).with_procedure(p));

    let attempt = automaton.attempt(automaton.start()).unwrap();
    assert!(attempt.same_verdict());
    assert_eq!(term_of(&automaton, attempt.on_success()), c);
    assert!(
        automaton
            .explore()
            .unwrap()
            .iter()
            .all(|&id| step_names(&automaton, id).iter().all(|name| name != "d"))
    );
}

#[test]
fn failing_procedures_take_the_failure_verdict() {
    let pool = TermPool::new();
    let d = rule(&pool, "d");
    let p = Arc::new(Procedure::function("p", vec![]));
    pool.define(&p, pool.delta(0));
    let call = pool.call(Call::procedure(&p, vec![]).unwrap());
    let automaton = automaton(&pool, &Program::new(pool.try_else(call, d)).with_procedure(p));

    let attempt = automaton.attempt(automaton.start()).unwrap();
    assert!(attempt.steps().is_empty());
    assert!(automaton.frame(attempt.on_success()).is_dead());
    assert_eq!(term_of(&automaton, attempt.on_failure()), d);
}

#[test]
fn constraints_are_resolved_in_an_intermediate_frame() {
    let pool = TermPool::new();
    let c = role(&pool, "c", RuleRole::Forbidden);
    let a = rule(&pool, "a");
    let automaton = automaton(&pool, &Program::new(pool.or(c, a)));

    let start = automaton.start();
    let outer = automaton.attempt(start).unwrap();
    assert_eq!(step_names(&automaton, start), ["c"]);
    assert!(outer.same_verdict());

    let intermediate = automaton.frame(outer.on_success());
    assert_eq!(intermediate.location(), automaton.frame(start).location());
    assert_eq!(intermediate.pred(), Some(start));
    assert_eq!(intermediate.prime(), start);

    let inner = automaton.attempt(intermediate.id()).unwrap();
    assert_eq!(step_names(&automaton, intermediate.id()), ["a"]);
    assert!(inner.steps().iter().all(|s| s.source() == intermediate.id()));

    let distinct = [
        outer.steps()[0].target(),
        inner.steps()[0].target(),
        inner.on_success(),
        inner.on_failure(),
    ];
    assert!(distinct.iter().all(|&f| f != intermediate.id()));
    assert_ne!(intermediate.id(), start);
}

#[test]
fn procedure_steps_push_modify_and_pop() {
    let pool = TermPool::new();
    let (a, b, c) = (rule(&pool, "a"), rule(&pool, "b"), rule(&pool, "c"));
    let p = Arc::new(Procedure::function("p", vec![]));
    pool.define(&p, pool.seq(a, b));
    let main = pool.seq(pool.call(Call::procedure(&p, vec![]).unwrap()), c);
    let automaton = automaton(&pool, &Program::new(main).with_procedure(p));

    let start = automaton.start();
    let enter = automaton.attempt(start).unwrap().steps()[0].clone();
    assert_eq!(enter.call_stack().len(), 2);
    assert_eq!(enter.enter_assignments().len(), 1);
    let kinds: Vec<_> = enter.apply_assignments().iter().map(|a| a.kind()).collect();
    assert_eq!(kinds, [AssignKind::Push, AssignKind::Modify]);
    assert_eq!(enter.depth_delta(), 1);

    let inside = enter.target();
    assert_eq!(automaton.frame(inside).depth(), 1);
    let leave = automaton.attempt(inside).unwrap().steps()[0].clone();
    let kinds: Vec<_> = leave.apply_assignments().iter().map(|a| a.kind()).collect();
    assert_eq!(kinds, [AssignKind::Modify, AssignKind::Pop]);
    assert_eq!(leave.depth_delta(), -1);
    assert_eq!(term_of(&automaton, leave.target()), c);
}

#[test]
fn verdict_frames_carry_pending_pops() {
    let pool = TermPool::new();
    let (a, b, c) = (rule(&pool, "a"), rule(&pool, "b"), rule(&pool, "c"));
    let p = Arc::new(Procedure::function("p", vec![]));
    pool.define(&p, pool.seq(a, pool.or(b, pool.epsilon())));
    let main = pool.seq(pool.call(Call::procedure(&p, vec![]).unwrap()), c);
    let automaton = automaton(&pool, &Program::new(main).with_procedure(p));

    let inside = automaton.attempt(automaton.start()).unwrap().steps()[0].target();
    let attempt = automaton.attempt(inside).unwrap();
    assert_eq!(step_names(&automaton, inside), ["b"]);
    assert!(attempt.same_verdict());

    let verdict = automaton.frame(attempt.on_success());
    assert_eq!(verdict.depth(), 0);
    assert_eq!(verdict.pops().len(), 1, "one call collapsed since the prime frame");
    assert_eq!(verdict.prime(), inside);
    assert_eq!(term_of(&automaton, verdict.id()), c);

    let step = automaton.attempt(verdict.id()).unwrap().steps()[0].clone();
    let kinds: Vec<_> = step.apply_assignments().iter().map(|a| a.kind()).collect();
    assert_eq!(kinds, [AssignKind::Pop, AssignKind::Modify]);

    // The same continuation reached through `b` is a different frame
    let through_b = automaton.attempt(inside).unwrap().steps()[0].target();
    assert_ne!(through_b, verdict.id());
    assert!(automaton.frame(through_b).pops().is_empty());
}

#[test]
fn steps_are_totally_ordered() {
    let pool = TermPool::new();
    let (a, b, c) = (rule(&pool, "a"), rule(&pool, "b"), rule(&pool, "c"));
    let automaton = automaton(&pool, &Program::new(pool.or(pool.or(a, b), pool.seq(c, a))));

    let attempt = automaton.attempt(automaton.start()).unwrap();
    let steps = attempt.steps();
    assert_eq!(steps.len(), 3);
    for s in steps {
        assert!(!(s < s));
        assert_eq!(s.cmp(s), std::cmp::Ordering::Equal);
    }
    assert!(steps.windows(2).all(|w| w[0] < w[1] && !(w[1] < w[0])));
    assert!(steps[0] < steps[2]);
}

#[test]
fn frames_are_canonical() {
    let pool = TermPool::new();
    let (a, b) = (rule(&pool, "a"), rule(&pool, "b"));
    let automaton = automaton(&pool, &Program::new(pool.seq(a, b)));

    let start = automaton.frame(automaton.start());
    let location = start.location().unwrap();
    assert_eq!(
        automaton.build_frame(location, Default::default(), None),
        automaton.start()
    );
    let verdict = automaton.build_frame(location, Default::default(), Some(automaton.start()));
    assert_ne!(verdict, automaton.start());
    assert_eq!(
        automaton.build_frame(location, Default::default(), Some(automaton.start())),
        verdict
    );
}

#[test]
fn concurrent_exploration_builds_each_frame_once() {
    let pool = TermPool::new();
    let (a, b, c) = (rule(&pool, "a"), rule(&pool, "b"), rule(&pool, "c"));
    let p = Arc::new(Procedure::function("p", vec![]));
    pool.define(&p, pool.seq(a, pool.or(b, pool.epsilon())));
    let call = pool.call(Call::procedure(&p, vec![]).unwrap());
    let main = pool.star(pool.or(pool.seq(call, c), pool.atom(pool.seq(b, a))));
    let automaton = automaton(&pool, &Program::new(main).with_procedure(p));

    let results: Vec<Vec<FrameId>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| automaton.explore().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.windows(2).all(|w| w[0] == w[1]));

    let distinct: std::collections::HashSet<FrameId> = results[0].iter().copied().collect();
    assert_eq!(distinct.len(), results[0].len());
    assert_eq!(automaton.len(), distinct.len());
}

#[test]
fn exploration_and_graph_view() {
    let pool = TermPool::new();
    let (a, b) = (rule(&pool, "a"), rule(&pool, "b"));
    let automaton = automaton(&pool, &Program::new(pool.seq(a, b)));

    let frames = automaton.explore().unwrap();
    assert_eq!(frames[0], automaton.start());
    assert_eq!(frames.len(), 5);

    let graph = automaton.to_graph(false).unwrap();
    assert_eq!(graph.node_count(), 5);
    assert_eq!(graph.edge_count(), 2);
    assert!(graph.edge_weights().all(|e| matches!(e, ControlEdge::Step(_))));

    let full = automaton.to_graph(true).unwrap();
    assert_eq!(full.edge_count(), 4);
    assert_eq!(
        full.edge_weights()
            .filter(|e| matches!(e, ControlEdge::Verdict))
            .count(),
        2
    );
}

#[test]
fn past_calls_accumulate_along_verdicts() {
    let pool = TermPool::new();
    let a = rule(&pool, "a");
    let automaton = automaton(&pool, &Program::new(pool.alap(a)));

    let start = automaton.start();
    let attempt = automaton.attempt(start).unwrap();
    assert_eq!(attempt.steps()[0].target(), start);
    assert!(automaton.past_calls(start).is_empty());

    let failure = attempt.on_failure();
    assert!(automaton.frame(failure).is_final());
    assert_eq!(automaton.past_attempts(failure).len(), 1);
    let calls = automaton.past_calls(failure);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].top().unwrap().name().to_string(), "a");
}

#[test]
fn error_and_removed_frames_are_memoised() {
    let pool = TermPool::new();
    let a = rule(&pool, "a");
    let automaton = automaton(&pool, &Program::new(a));

    let start = automaton.start();
    let error = automaton.on_error(start);
    assert!(automaton.frame(error).is_error());
    assert_eq!(automaton.on_error(start), error);
    assert_eq!(automaton.on_policy(start, CheckPolicy::Error), error);

    let removed = automaton.on_policy(start, CheckPolicy::Remove);
    assert!(automaton.frame(removed).is_removed());
    assert_ne!(removed, error);
    assert_eq!(automaton.on_policy(start, CheckPolicy::Silent), start);
    assert_eq!(automaton.on_policy(start, CheckPolicy::Off), start);
}

#[test]
fn recursion_is_bounded_by_the_exploration_limit() {
    let pool = TermPool::new();
    let (a, b) = (rule(&pool, "a"), rule(&pool, "b"));
    let p = Arc::new(Procedure::function("p", vec![]));
    let call = pool.call(Call::procedure(&p, vec![]).unwrap());
    pool.define(&p, pool.or(pool.seq(a, call), b));

    let config = AutomatonConfig {
        exploration_limit: Some(50),
        ..Default::default()
    };
    let automaton =
        Automaton::from_program(&pool, &Program::new(call).with_procedure(p), config).unwrap();
    automaton.initialise(&ValueNodeFactory::default()).unwrap();

    // Entering the recursive procedure offers its entry calls directly
    assert_eq!(step_names(&automaton, automaton.start()), ["a", "b"]);
    let deeper = automaton.attempt(automaton.start()).unwrap().steps()[0].target();
    assert_eq!(automaton.frame(deeper).depth(), 1);

    assert!(matches!(
        automaton.explore(),
        Err(hyctrl::utils::error::CtrlError::ExplorationLimit(50))
    ));
}

#[test]
#[should_panic(expected = "before initialise")]
fn attempts_require_initialisation() {
    let pool = TermPool::new();
    let a = rule(&pool, "a");
    let automaton =
        Automaton::from_program(&pool, &Program::new(a), AutomatonConfig::default()).unwrap();
    automaton.attempt(automaton.start());
}
