//! Construction of [`TemplateSet`]s from term-level programs.
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::Arc,
};

use log::{debug, info, warn};
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};

use super::{
    Location, LocationRef, Switch, SwitchAttempt, SwitchRef, SwitchStack, Template, TemplateSet,
};
use crate::{
    program::{Call, CallArg, Constant, CtrlVar, Procedure, Program},
    term::{Term, TermPool, TermType},
    utils::error::{CtrlError, CtrlResult},
};

struct DraftSwitch {
    source: u32,
    call: Call,
    on_finish: u32,
}

struct DraftAttempt {
    stacks: Vec<SwitchStack>,
    on_success: u32,
    on_failure: u32,
}

/// A template under construction.
struct Draft {
    name: Arc<str>,
    procedure: Option<Arc<Procedure>>,
    terms: Vec<Term>,
    index: HashMap<Term, u32>,
    attempts: Vec<Option<DraftAttempt>>,
    switches: Vec<DraftSwitch>,
    switch_index: HashMap<(u32, Call, u32), u32>,
}

impl Draft {
    fn new(name: Arc<str>, procedure: Option<Arc<Procedure>>) -> Self {
        Self {
            name,
            procedure,
            terms: Vec::new(),
            index: HashMap::new(),
            attempts: Vec::new(),
            switches: Vec::new(),
            switch_index: HashMap::new(),
        }
    }
}

/// Builds the templates of a [`Program`] from the nested attempts of its terms.
///
/// Locations of a template are the terms reachable from its entry; a
/// derivation chain `[d0, .., dk]` becomes a switch stack whose switch `i`
/// lives in the template of the procedure called by `d(i-1)`.
pub struct TemplateBuilder<'a> {
    pool: &'a TermPool,
    drafts: Vec<Draft>,
    by_name: HashMap<Arc<str>, u32>,
    recursive: Arc<BTreeSet<Arc<str>>>,
    queue: VecDeque<(u32, u32)>,
}

impl<'a> TemplateBuilder<'a> {
    /// Build and validate the templates of `program`.
    pub fn build(pool: &'a TermPool, program: &Program) -> CtrlResult<TemplateSet> {
        let mut builder = Self::new(pool, program)?;
        builder.explore()?;
        let vars = builder.liveness();
        builder.validate(&vars)?;
        Ok(builder.finish(vars))
    }

    fn new(pool: &'a TermPool, program: &Program) -> CtrlResult<Self> {
        let mut entries = vec![program.main];
        let mut drafts = vec![Draft::new("main".into(), None)];
        let mut by_name = HashMap::new();

        for procedure in &program.procedures {
            let body = pool
                .effective_body(procedure)
                .ok_or_else(|| CtrlError::MissingBody(procedure.name.to_string()))?;
            by_name.insert(procedure.name.clone(), drafts.len() as u32);
            drafts.push(Draft::new(procedure.name.clone(), Some(procedure.clone())));
            entries.push(body);
        }

        for &entry in &entries {
            for call in pool.calls_in(entry) {
                if let Some(callee) = call.as_procedure()
                    && !by_name.contains_key(&callee.name)
                {
                    return Err(CtrlError::UnknownProcedure(callee.name.to_string()));
                }
            }
        }

        let mut builder = Self {
            pool,
            drafts,
            by_name,
            recursive: pool.recursive_procedures(),
            queue: VecDeque::new(),
        };
        for (id, entry) in entries.into_iter().enumerate() {
            builder.location(id as u32, entry);
        }
        Ok(builder)
    }

    fn location(&mut self, template: u32, term: Term) -> u32 {
        let draft = &mut self.drafts[template as usize];
        if let Some(&number) = draft.index.get(&term) {
            return number;
        }
        let number = draft.terms.len() as u32;
        draft.terms.push(term);
        draft.attempts.push(None);
        draft.index.insert(term, number);
        self.queue.push_back((template, number));
        number
    }

    fn switch(&mut self, template: u32, source: u32, call: &Call, on_finish: u32) -> SwitchRef {
        let draft = &mut self.drafts[template as usize];
        let key = (source, call.clone(), on_finish);
        let number = match draft.switch_index.get(&key) {
            Some(&number) => number,
            None => {
                let number = draft.switches.len() as u32;
                draft.switches.push(DraftSwitch {
                    source,
                    call: call.clone(),
                    on_finish,
                });
                draft.switch_index.insert(key, number);
                number
            }
        };
        SwitchRef { template, number }
    }

    fn callee(&self, call: &Call) -> CtrlResult<u32> {
        let procedure = call
            .as_procedure()
            .unwrap_or_else(|| panic!("nested derivation below rule call {}", call));
        self.by_name
            .get(&procedure.name)
            .copied()
            .ok_or_else(|| CtrlError::UnknownProcedure(procedure.name.to_string()))
    }

    /// Type of the body behind a procedure call that nested attempts keep
    /// at the call boundary; `None` for rule calls and recursive procedures.
    fn inline_type(&self, call: &Call) -> Option<TermType> {
        let procedure = call.as_procedure()?;
        if self.recursive.contains(&procedure.name) {
            return None;
        }
        let body = self.pool.effective_body(procedure)?;
        Some(self.pool.term_type(body))
    }

    fn explore(&mut self) -> CtrlResult<()> {
        while let Some((template, number)) = self.queue.pop_front() {
            let term = self.drafts[template as usize].terms[number as usize];
            let Some(attempt) = self.pool.attempt(term, true) else {
                continue;
            };

            let mut stacks = Vec::with_capacity(attempt.derivations().len());
            let mut finished = Vec::new();
            for derivation in attempt.derivations() {
                match self.inline_type(derivation.call()) {
                    Some(TermType::Final) => {
                        debug!("Call {} finishes without applying a rule.", derivation.call());
                        finished.push(self.pool.continuation(derivation));
                        continue;
                    }
                    Some(TermType::Dead) => {
                        warn!(
                            "Call {} in `{}` can never succeed.",
                            derivation.call(),
                            self.drafts[template as usize].name
                        );
                        continue;
                    }
                    _ => {}
                }
                let chain = derivation.stack();
                let mut stack = SwitchStack::new();
                let (mut current, mut source) = (template, number);
                for (i, d) in chain.iter().enumerate() {
                    if i > 0 {
                        current = self.callee(chain[i - 1].call())?;
                        let local = d
                            .source()
                            .unwrap_or_else(|| panic!("nested derivation {} without source", d));
                        source = self.location(current, local);
                    }
                    let on_finish = self.location(current, d.target());
                    stack.push(self.switch(current, source, d.call(), on_finish));
                }
                if !stacks.contains(&stack) {
                    stacks.push(stack);
                }
            }

            // A call that finishes on its own always succeeds, its
            // continuation becomes an alternative of the success verdict
            let (on_success, on_failure) = if finished.is_empty() {
                (attempt.on_success(), attempt.on_failure())
            } else {
                let verdict = finished
                    .into_iter()
                    .rev()
                    .fold(attempt.on_success(), |rest, t| self.pool.or(t, rest));
                (verdict, verdict)
            };
            let on_success = self.location(template, on_success);
            let on_failure = self.location(template, on_failure);
            self.drafts[template as usize].attempts[number as usize] = Some(DraftAttempt {
                stacks,
                on_success,
                on_failure,
            });
        }
        Ok(())
    }

    /// Live variables per location, unified over verdict-connected locations.
    fn liveness(&self) -> Vec<Vec<BTreeSet<CtrlVar>>> {
        self.drafts
            .iter()
            .map(|draft| {
                let mut live = vec![BTreeSet::new(); draft.terms.len()];
                if let Some(procedure) = &draft.procedure {
                    for (number, &term) in draft.terms.iter().enumerate() {
                        if self.pool.is_final(term) {
                            live[number].extend(procedure.output_vars().cloned());
                        }
                    }
                }

                let components = verdict_components(draft, self.pool);
                loop {
                    let mut changed = false;
                    for sw in &draft.switches {
                        let outputs: BTreeSet<_> = sw.call.output_vars().collect();
                        let mut wanted: BTreeSet<CtrlVar> = sw.call.input_vars().cloned().collect();
                        wanted.extend(
                            live[sw.on_finish as usize]
                                .iter()
                                .filter(|v| !outputs.contains(v))
                                .cloned(),
                        );
                        changed |= extend(&mut live[sw.source as usize], wanted);
                    }
                    for component in &components {
                        let union: BTreeSet<CtrlVar> = component
                            .iter()
                            .flat_map(|&n| live[n as usize].iter().cloned())
                            .collect();
                        for &n in component {
                            changed |= extend(&mut live[n as usize], union.iter().cloned());
                        }
                    }
                    if !changed {
                        break live;
                    }
                }
            })
            .collect()
    }

    fn validate(&self, vars: &[Vec<BTreeSet<CtrlVar>>]) -> CtrlResult<()> {
        // Template entries only read parameters
        for (draft, live) in self.drafts.iter().zip(vars) {
            let inputs: BTreeSet<&CtrlVar> = draft
                .procedure
                .iter()
                .flat_map(|p| p.input_vars())
                .collect();
            if let Some(var) = live[0].iter().find(|v| !inputs.contains(v)) {
                return Err(CtrlError::UnboundVariable {
                    template: draft.name.to_string(),
                    var: var.to_string(),
                });
            }
        }

        // Wildcards never feed a live input
        for draft in &self.drafts {
            for sw in &draft.switches {
                let Some(procedure) = sw.call.as_procedure() else {
                    continue;
                };
                let callee = self.by_name[&procedure.name] as usize;
                for var in &vars[callee][0] {
                    let index = procedure
                        .param_index(var)
                        .unwrap_or_else(|| panic!("entry variable {} is not a parameter", var));
                    if sw.call.args()[index].is_wild() {
                        return Err(CtrlError::WildcardInput {
                            unit: procedure.name.to_string(),
                            index,
                        });
                    }
                }
            }
        }

        self.validate_verdicts()?;
        self.validate_recursion()?;

        // Locations holding constraints have a single verdict
        let mut has_constraint = HashMap::new();
        for (id, draft) in self.drafts.iter().enumerate() {
            for (number, attempt) in draft.attempts.iter().enumerate() {
                let Some(attempt) = attempt else {
                    continue;
                };
                if attempt.on_success != attempt.on_failure
                    && attempt
                        .stacks
                        .iter()
                        .any(|stack| self.stack_has_constraint(stack, &mut has_constraint))
                {
                    return Err(CtrlError::ConstraintVerdictMismatch {
                        template: self.drafts[id].name.to_string(),
                        location: number as u32,
                    });
                }
            }
        }
        Ok(())
    }

    /// Verdict transitions apply no rule, so they must not loop.
    fn validate_verdicts(&self) -> CtrlResult<()> {
        for draft in &self.drafts {
            let mut graph = DiGraph::<u32, ()>::with_capacity(draft.terms.len(), 0);
            for number in 0..draft.terms.len() {
                graph.add_node(number as u32);
            }
            for (number, attempt) in draft.attempts.iter().enumerate() {
                if let Some(attempt) = attempt {
                    let source = NodeIndex::new(number);
                    graph.update_edge(source, NodeIndex::new(attempt.on_success as usize), ());
                    graph.update_edge(source, NodeIndex::new(attempt.on_failure as usize), ());
                }
            }
            for scc in tarjan_scc(&graph) {
                if scc.len() > 1 || graph.contains_edge(scc[0], scc[0]) {
                    return Err(CtrlError::VerdictCycle {
                        template: draft.name.to_string(),
                        location: graph[scc[0]],
                    });
                }
            }
        }
        Ok(())
    }

    /// Recursive procedures must commit at entry and must not be left recursive.
    fn validate_recursion(&self) -> CtrlResult<()> {
        let mut graph = DiGraph::<u32, ()>::new();
        let mut nodes = HashMap::new();
        for name in self.recursive.iter() {
            let Some(&id) = self.by_name.get(name) else {
                continue;
            };
            nodes.insert(id, graph.add_node(id));

            let draft = &self.drafts[id as usize];
            let committed = draft.attempts[0].as_ref().is_some_and(|attempt| {
                self.pool.is_dead(draft.terms[attempt.on_success as usize])
                    && self.pool.is_dead(draft.terms[attempt.on_failure as usize])
            });
            if !committed {
                return Err(CtrlError::UncommittedEntry(name.to_string()));
            }
        }

        for (&id, &node) in &nodes {
            let Some(attempt) = &self.drafts[id as usize].attempts[0] else {
                continue;
            };
            for stack in &attempt.stacks {
                if let Some(callee) = self.top_procedure(stack)
                    && let Some(&target) = nodes.get(&callee)
                {
                    graph.update_edge(node, target, ());
                }
            }
        }

        for scc in tarjan_scc(&graph) {
            if scc.len() > 1 || graph.contains_edge(scc[0], scc[0]) {
                let id = graph[scc[0]];
                return Err(CtrlError::LeftRecursion(
                    self.drafts[id as usize].name.to_string(),
                ));
            }
        }
        Ok(())
    }

    fn top_procedure(&self, stack: &[SwitchRef]) -> Option<u32> {
        let top = stack.last()?;
        let call = &self.drafts[top.template as usize].switches[top.number as usize].call;
        call.as_procedure().map(|p| self.by_name[&p.name])
    }

    fn stack_has_constraint(&self, stack: &[SwitchRef], memo: &mut HashMap<u32, bool>) -> bool {
        let Some(top) = stack.last() else {
            return false;
        };
        let call = &self.drafts[top.template as usize].switches[top.number as usize].call;
        match self.top_procedure(stack) {
            None => call.is_constraint(),
            Some(callee) => {
                if let Some(&known) = memo.get(&callee) {
                    return known;
                }
                // Acyclic once left recursion has been excluded
                let known = self.drafts[callee as usize].attempts[0]
                    .as_ref()
                    .is_some_and(|attempt| {
                        attempt
                            .stacks
                            .iter()
                            .any(|s| self.stack_has_constraint(s, memo))
                    });
                memo.insert(callee, known);
                known
            }
        }
    }

    fn finish(self, vars: Vec<Vec<BTreeSet<CtrlVar>>>) -> TemplateSet {
        let pool = self.pool;
        let mut templates = Vec::with_capacity(self.drafts.len());
        for ((id, draft), live) in self.drafts.into_iter().enumerate().zip(vars) {
            let id = id as u32;
            let at = |number: u32| LocationRef {
                template: id,
                number,
            };

            let locations: Vec<Location> = draft
                .terms
                .iter()
                .zip(live)
                .zip(draft.attempts)
                .enumerate()
                .map(|(number, ((&term, live), attempt))| Location {
                    number: number as u32,
                    term,
                    ty: pool.term_type(term),
                    transience: pool.transience(term),
                    vars: live.into_iter().collect::<Vec<_>>().into(),
                    attempt: attempt.map(|a| SwitchAttempt {
                        stacks: a.stacks,
                        on_success: at(a.on_success),
                        on_failure: at(a.on_failure),
                    }),
                })
                .collect();

            let switches: Vec<Switch> = draft
                .switches
                .into_iter()
                .enumerate()
                .map(|(number, sw)| Switch {
                    number: number as u32,
                    source: at(sw.source),
                    transience: locations[sw.source as usize].transience,
                    call: sw.call,
                    on_finish: at(sw.on_finish),
                })
                .collect();

            let mut constants: Vec<Constant> = switches
                .iter()
                .flat_map(|sw| sw.call.args())
                .filter_map(|arg| match arg {
                    CallArg::Const(c) => Some(c.clone()),
                    _ => None,
                })
                .collect();
            constants.sort();
            constants.dedup();

            debug!(
                "Template `{}`: {} locations, {} switches, {} constants.",
                draft.name,
                locations.len(),
                switches.len(),
                constants.len()
            );
            templates.push(Template {
                id,
                name: draft.name,
                procedure: draft.procedure,
                locations,
                switches,
                constants,
            });
        }

        info!(
            "Built {} templates ({} locations).",
            templates.len(),
            templates.iter().map(|t| t.locations.len()).sum::<usize>()
        );
        TemplateSet {
            templates,
            by_name: self.by_name,
            recursive: self.recursive,
        }
    }
}

fn extend<I: IntoIterator<Item = CtrlVar>>(set: &mut BTreeSet<CtrlVar>, vars: I) -> bool {
    let before = set.len();
    set.extend(vars);
    set.len() != before
}

/// Partition of the locations of `draft` connected by verdict transitions.
/// Dead verdicts end the execution and carry no variables.
fn verdict_components(draft: &Draft, pool: &TermPool) -> Vec<Vec<u32>> {
    let n = draft.terms.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for (number, attempt) in draft.attempts.iter().enumerate() {
        if let Some(attempt) = attempt {
            for verdict in [attempt.on_success, attempt.on_failure] {
                if pool.is_dead(draft.terms[verdict as usize]) {
                    continue;
                }
                let (a, b) = (find(&mut parent, number), find(&mut parent, verdict as usize));
                parent[a] = b;
            }
        }
    }

    let mut components: HashMap<usize, Vec<u32>> = HashMap::new();
    for number in 0..n {
        let root = find(&mut parent, number);
        components.entry(root).or_default().push(number as u32);
    }
    let mut components: Vec<_> = components.into_values().filter(|c| c.len() > 1).collect();
    components.sort();
    components
}
