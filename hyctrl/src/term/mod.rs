//! Hash-consed control term algebra.
//!
//! A [`Term`] is a symbolic control continuation. Terms are interned in a
//! [`TermPool`]: two terms built from equal operators and equal children are
//! the same [`Term`], which keeps self-referential derivatives (the attempt of
//! `a*` mentions `a*` itself) finite and lets every comparison after
//! construction be an index comparison.
//!
//! Every term lazily computes and caches its [`TermType`], its transient
//! depth, its atomicity and its one-step derivative ([`DerivationAttempt`]).
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque, hash_map::DefaultHasher},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use log::{debug, info};
use parking_lot::RwLock;
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use smallvec::{SmallVec, smallvec};
use strum::EnumIs;

use crate::{
    program::{Call, ProcKind, Procedure},
    utils::{conf::AutomatonConfig, error::CtrlError, error::CtrlResult, lazy::LazyCell},
};

mod attempt;
mod build;
mod derivation;
mod op;

pub use derivation::{CallStack, Derivation, DerivationAttempt, DerivationStack};
pub use op::{Op, OpKind};

/// Handle to a canonical term of a [`TermPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term(pub(crate) u32);

impl Term {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution status of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIs)]
pub enum TermType {
    /// Calls remain to be tried.
    Trial,
    /// Terminated successfully.
    Final,
    /// Failed; no further calls are possible.
    Dead,
}

impl fmt::Display for TermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermType::Trial => write!(f, "trial"),
            TermType::Final => write!(f, "final"),
            TermType::Dead => write!(f, "dead"),
        }
    }
}

pub(crate) struct TermNode {
    op: Op,
    ty: LazyCell<TermType>,
    transience: LazyCell<u32>,
    atomic: LazyCell<bool>,
    attempt_flat: LazyCell<Option<Arc<DerivationAttempt>>>,
    attempt_nested: LazyCell<Option<Arc<DerivationAttempt>>>,
}

impl TermNode {
    fn new(op: Op) -> Self {
        Self {
            op,
            ty: LazyCell::new(),
            transience: LazyCell::new(),
            atomic: LazyCell::new(),
            attempt_flat: LazyCell::new(),
            attempt_nested: LazyCell::new(),
        }
    }
}

/// Interning table of terms, scoped to one automaton-construction session.
///
/// Besides the terms themselves, the pool records procedure bodies so that
/// nested attempts can unfold procedure calls.
///
/// # A note on concurrency
/// The pool may be shared between threads. Interning uses an upgradable read
/// lock on the arena and the inverse lookup (always locked in that order), and
/// the derived values of every term are computed at most once under a
/// per-term guard. No lock of the pool is held while a derived value is being
/// computed.
pub struct TermPool {
    array: RwLock<Vec<Arc<TermNode>>>,
    inverse_lookup: RwLock<HashMap<u64, SmallVec<[Term; 1]>>>, // INFO: Always lock array before inverse_lookup to avoid deadlock
    procedures: RwLock<BTreeMap<Arc<str>, (Arc<Procedure>, Term)>>,
    recursive: LazyCell<Arc<BTreeSet<Arc<str>>>>,
}

impl TermPool {
    fn hash_op(op: &Op) -> u64 {
        let mut hasher = DefaultHasher::new();
        op.hash(&mut hasher);
        hasher.finish()
    }

    pub fn new() -> Self {
        Self {
            array: Default::default(),
            inverse_lookup: Default::default(),
            procedures: Default::default(),
            recursive: LazyCell::new(),
        }
    }

    /// Number of distinct terms built so far.
    pub fn len(&self) -> usize {
        self.array.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the canonical term for `op`, inserting it if needed.
    pub(crate) fn intern(&self, op: Op) -> Term {
        let h = Self::hash_op(&op);

        // Lock, notice that the order is critical, always lock the arena first
        let mut array_lock = self.array.upgradable_read();
        let mut inverse_lookup_lock = self.inverse_lookup.upgradable_read();

        if let Some(terms) = inverse_lookup_lock.get(&h) {
            for term in terms {
                if array_lock[term.index()].op == op {
                    return *term;
                }
            }
        }

        // NOTE: Ordering of upgrade is paramount to avoid deadlock
        array_lock.with_upgraded(|array_lock| {
            inverse_lookup_lock.with_upgraded(|inverse_lookup_lock| {
                let term = Term(array_lock.len() as u32);

                if let Some(list) = inverse_lookup_lock.get_mut(&h) {
                    info!(
                        "Detected an hash collision on hash 0x{:016x}. The following terms collided:\n{}",
                        h,
                        list.iter()
                            .map(|t| format!(" - {} -> {:?}", t, array_lock[t.index()].op.kind()))
                            .chain(std::iter::once(format!(" - {} -> {:?}", term, op.kind())))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    );
                    list.push(term);
                } else {
                    debug!(
                        "New term {} ({:?} over {:?}).",
                        term,
                        op.kind(),
                        op.children().as_slice()
                    );
                    inverse_lookup_lock.insert(h, smallvec![term]);
                }

                array_lock.push(Arc::new(TermNode::new(op)));
                term
            })
        })
    }

    pub(crate) fn node(&self, term: Term) -> Arc<TermNode> {
        self.array
            .read_recursive()
            .get(term.index())
            .cloned()
            .unwrap_or_else(|| panic!("term {} does not belong to this pool", term))
    }

    /// Operator of `term`.
    pub fn op(&self, term: Term) -> Op {
        self.node(term).op.clone()
    }

    pub fn term_type(&self, term: Term) -> TermType {
        let node = self.node(term);
        node.ty.get_or_init(|| match node.op {
            Op::Delta { .. } => TermType::Dead,
            Op::Epsilon => TermType::Final,
            // Constructors only build composite nodes over trial children
            _ => TermType::Trial,
        })
    }

    pub fn is_trial(&self, term: Term) -> bool {
        self.term_type(term).is_trial()
    }

    pub fn is_final(&self, term: Term) -> bool {
        self.term_type(term).is_final()
    }

    pub fn is_dead(&self, term: Term) -> bool {
        self.term_type(term).is_dead()
    }

    /// Nesting depth of `term` inside entered atomic blocks.
    pub fn transience(&self, term: Term) -> u32 {
        let node = self.node(term);
        node.transience.get_or_init(|| match &node.op {
            Op::Call(_) | Op::Epsilon => 0,
            Op::Delta { depth } => *depth,
            Op::Or(a, b) => self.transience(*a).max(self.transience(*b)),
            Op::Transit(a) => self.transience(*a) + 1,
            Op::While(cond, body) | Op::Until(cond, body) => {
                if self.is_trial(*cond) {
                    self.transience(*cond)
                } else {
                    self.transience(*body)
                }
            }
            Op::Seq(a, _)
            | Op::Try(a, _)
            | Op::Alap(a)
            | Op::Star(a)
            | Op::Atom(a)
            | Op::Body(a, _)
            | Op::If { cond: a, .. } => self.transience(*a),
        })
    }

    /// Whether `term` always executes as a single indivisible step.
    pub fn is_atomic(&self, term: Term) -> bool {
        let node = self.node(term);
        node.atomic.get_or_init(|| match &node.op {
            Op::Call(call) => call
                .as_procedure()
                .is_none_or(|procedure| procedure.kind.is_recipe()),
            Op::Delta { .. } | Op::Epsilon | Op::Atom(_) => true,
            Op::Or(a, b) => self.is_atomic(*a) && self.is_atomic(*b),
            _ => false,
        })
    }

    /// Register the body of `procedure`.
    ///
    /// # Panics
    /// Panics if recursion between procedures has already been analysed,
    /// i.e. once nested attempts have been computed.
    pub fn define(&self, procedure: &Arc<Procedure>, body: Term) {
        assert!(
            !self.recursive.is_ready(),
            "procedure `{}` defined after recursion analysis",
            procedure.name
        );
        debug!("Defined {} as {}.", procedure, self.fmt(body));
        self.procedures
            .write()
            .insert(procedure.name.clone(), (procedure.clone(), body));
    }

    /// Declared body of the procedure named `name`.
    pub fn declared_body(&self, name: &str) -> Option<Term> {
        self.procedures.read().get(name).map(|(_, body)| *body)
    }

    /// Body as executed: recipes run their body as one atomic block.
    pub fn effective_body(&self, procedure: &Procedure) -> Option<Term> {
        let body = self.declared_body(&procedure.name)?;
        Some(match procedure.kind {
            ProcKind::Function => body,
            ProcKind::Recipe => self.atom(body),
        })
    }

    /// Whether the named procedure may (indirectly) call itself.
    pub fn is_recursive(&self, name: &str) -> bool {
        self.recursive_procedures().contains(name)
    }

    /// Names of all recursive procedures. Computed once, on first request.
    pub fn recursive_procedures(&self) -> Arc<BTreeSet<Arc<str>>> {
        self.recursive.get_or_init(|| Arc::new(self.analyse_recursion()))
    }

    fn analyse_recursion(&self) -> BTreeSet<Arc<str>> {
        let procedures = self.procedures.read().clone();

        let mut graph = DiGraph::<Arc<str>, ()>::new();
        let nodes: HashMap<Arc<str>, _> = procedures
            .keys()
            .map(|name| (name.clone(), graph.add_node(name.clone())))
            .collect();
        for (name, (_, body)) in &procedures {
            for call in self.calls_in(*body) {
                if let Some(callee) = call.as_procedure()
                    && let Some(&target) = nodes.get(&callee.name)
                {
                    graph.update_edge(nodes[name], target, ());
                }
            }
        }

        let mut recursive = BTreeSet::new();
        for scc in tarjan_scc(&graph) {
            if scc.len() > 1 || graph.contains_edge(scc[0], scc[0]) {
                recursive.extend(scc.into_iter().map(|n| graph[n].clone()));
            }
        }
        info!(
            "Analysed {} procedures, {} recursive: {:?}",
            procedures.len(),
            recursive.len(),
            recursive
        );
        recursive
    }

    /// Calls occurring syntactically in `term` (without unfolding procedures).
    pub fn calls_in(&self, term: Term) -> Vec<Call> {
        let mut seen = HashSet::new();
        let mut calls = Vec::new();
        let mut todo = vec![term];
        while let Some(t) = todo.pop() {
            if !seen.insert(t) {
                continue;
            }
            let op = self.op(t);
            if let Op::Call(call) = &op
                && !calls.contains(call)
            {
                calls.push(call.clone());
            }
            todo.extend(op.children());
        }
        calls
    }

    /// Terms reachable from `start` through attempts, in breadth-first order.
    ///
    /// Follows the local target of every derivation and both verdicts.
    /// Procedure calls are unfolded when `config.nested_exploration` holds.
    pub fn explore_terms(&self, start: Term, config: &AutomatonConfig) -> CtrlResult<Vec<Term>> {
        let mut seen = HashSet::from([start]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(term) = queue.pop_front() {
            if let Some(limit) = config.exploration_limit
                && order.len() >= limit
            {
                return Err(CtrlError::ExplorationLimit(limit));
            }
            order.push(term);
            let Some(attempt) = self.attempt(term, config.nested_exploration) else {
                continue;
            };
            let next = attempt
                .derivations
                .iter()
                .map(|d| d.outermost().target)
                .chain([attempt.on_success, attempt.on_failure]);
            for t in next {
                if seen.insert(t) {
                    queue.push_back(t);
                }
            }
        }
        info!("Explored {} terms from {}.", order.len(), start);
        Ok(order)
    }

    /// Format `term` using this pool.
    pub fn fmt(&self, term: Term) -> impl fmt::Display + '_ {
        struct Fmt<'a> {
            pool: &'a TermPool,
            term: Term,
        }

        impl fmt::Display for Fmt<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let sub = |t: Term| self.pool.fmt(t);
                match self.pool.op(self.term) {
                    Op::Call(call) => write!(f, "{}", call),
                    Op::Delta { depth: 0 } => write!(f, "delta"),
                    Op::Delta { depth } => write!(f, "delta@{}", depth),
                    Op::Epsilon => write!(f, "eps"),
                    Op::Seq(a, b) => write!(f, "({}; {})", sub(a), sub(b)),
                    Op::Or(a, b) => write!(f, "({} | {})", sub(a), sub(b)),
                    Op::If {
                        cond,
                        then,
                        also,
                        otherwise,
                    } => write!(
                        f,
                        "if ({}) {{{}}} also {{{}}} else {{{}}}",
                        sub(cond),
                        sub(then),
                        sub(also),
                        sub(otherwise)
                    ),
                    Op::Try(a, b) => write!(f, "try {{{}}} else {{{}}}", sub(a), sub(b)),
                    Op::Alap(a) => write!(f, "alap {{{}}}", sub(a)),
                    Op::Until(c, b) => write!(f, "until ({}) {{{}}}", sub(c), sub(b)),
                    Op::While(c, b) => write!(f, "while ({}) {{{}}}", sub(c), sub(b)),
                    Op::Star(a) => write!(f, "({})*", sub(a)),
                    Op::Atom(a) => write!(f, "atomic {{{}}}", sub(a)),
                    Op::Transit(a) => write!(f, "transit {{{}}}", sub(a)),
                    Op::Body(a, caller) => {
                        write!(f, "{}[{}]", caller.call.name(), sub(a))
                    }
                }
            }
        }

        Fmt { pool: self, term }
    }
}

impl Default for TermPool {
    fn default() -> Self {
        Self::new()
    }
}
