//! Runtime control automaton.
//!
//! An [`Automaton`] instantiates the templates of a program into canonical
//! [`Frame`]s connected by [`Step`]s. Frames are built on demand: the attempt
//! of a frame is computed, and its successor frames created, the first time
//! it is requested.
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crossbeam::channel;
use log::{debug, info, warn};
use parking_lot::RwLock;
use petgraph::graph::DiGraph;

use crate::{
    program::{Call, Constant, Program},
    template::{SwitchStack, TemplateBuilder, TemplateSet},
    term::{CallStack, TermPool},
    utils::{
        conf::AutomatonConfig,
        error::{CtrlError, CtrlResult},
        lazy::LazyCell,
    },
};

mod assignment;
mod frame;
mod step;

pub use assignment::{
    AssignKind, Assignment, ConstantTable, HostFactory, HostNode, Valuation, ValueNodeFactory,
};
pub use frame::{CheckPolicy, Frame, FrameId, FrameKind};
pub use step::{Step, StepAttempt};

use frame::FrameKey;

/// Edge of the graph view returned by [`Automaton::to_graph`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlEdge {
    /// A step, labelled with its rule call.
    Step(Call),
    Success,
    Failure,
    /// Success and failure lead to the same frame.
    Verdict,
}

/// Canonical frame pool of one program, together with its start frame.
///
/// # A note on concurrency
/// Frames may be requested from several threads. Insertion into the pool
/// uses the upgradable read pattern (arena locked before index), and the
/// attempt of each frame is computed at most once.
pub struct Automaton {
    templates: Arc<TemplateSet>,
    config: AutomatonConfig,
    frames: RwLock<Vec<Arc<Frame>>>,
    inverse_lookup: RwLock<HashMap<FrameKey, FrameId>>, // INFO: Always lock frames before inverse_lookup to avoid deadlock
    constants: LazyCell<Arc<ConstantTable>>,
    start: FrameId,
}

impl Automaton {
    pub fn new(templates: TemplateSet, config: AutomatonConfig) -> Self {
        let mut automaton = Self {
            templates: Arc::new(templates),
            config,
            frames: Default::default(),
            inverse_lookup: Default::default(),
            constants: LazyCell::new(),
            start: FrameId(0),
        };
        let start = automaton.templates.start();
        automaton.start = automaton.build_frame(start, SwitchStack::new(), None);
        automaton
    }

    /// Build the templates of `program` and instantiate them.
    pub fn from_program(
        pool: &TermPool,
        program: &Program,
        config: AutomatonConfig,
    ) -> CtrlResult<Self> {
        Ok(Self::new(TemplateBuilder::build(pool, program)?, config))
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn config(&self) -> &AutomatonConfig {
        &self.config
    }

    /// The frame at the main entry, with no pending calls.
    pub fn start(&self) -> FrameId {
        self.start
    }

    pub fn frame(&self, id: FrameId) -> Arc<Frame> {
        self.frames
            .read_recursive()
            .get(id.index())
            .cloned()
            .unwrap_or_else(|| panic!("frame {} does not belong to this automaton", id))
    }

    /// All frames created so far, in creation order.
    pub fn frames(&self) -> Vec<Arc<Frame>> {
        self.frames.read().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn add_frame(&self, key: FrameKey, make: impl FnOnce(FrameId) -> Frame) -> FrameId {
        // Lock, notice that the order is critical, always lock the arena first
        let mut frames_lock = self.frames.upgradable_read();
        let mut inverse_lookup_lock = self.inverse_lookup.upgradable_read();

        if let Some(&id) = inverse_lookup_lock.get(&key) {
            return id;
        }

        // NOTE: Ordering of upgrade is paramount to avoid deadlock
        frames_lock.with_upgraded(|frames_lock| {
            inverse_lookup_lock.with_upgraded(|inverse_lookup_lock| {
                let id = FrameId(frames_lock.len() as u32);
                let frame = make(id);
                debug!("New frame {}.", frame);
                frames_lock.push(Arc::new(frame));
                inverse_lookup_lock.insert(key, id);
                id
            })
        })
    }

    /// Materialise the constants of every template with `factory`.
    ///
    /// One job per template is dispatched to a pool of
    /// [`AutomatonConfig::worker_threads`] workers; the call returns once all
    /// jobs are done. The first failing job aborts initialisation.
    pub fn initialise(&self, factory: &dyn HostFactory) -> CtrlResult<()> {
        if self.is_initialised() {
            debug!("Automaton already initialised.");
            return Ok(());
        }

        let templates = self.templates.templates();
        let workers = self.config.effective_workers(templates.len());
        let (job_tx, job_rx) = channel::unbounded::<usize>();
        let (result_tx, result_rx) = channel::unbounded();
        for id in 0..templates.len() {
            job_tx.send(id).expect("job receiver is alive");
        }
        drop(job_tx);

        let failed = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let (job_rx, result_tx, failed) = (job_rx.clone(), result_tx.clone(), &failed);
                scope.spawn(move || {
                    for id in job_rx.iter() {
                        if failed.load(Ordering::Acquire) {
                            break;
                        }
                        let result: CtrlResult<Vec<(Constant, HostNode)>> = templates[id]
                            .constants()
                            .iter()
                            .map(|c| Ok((c.clone(), factory.constant_node(c)?)))
                            .collect();
                        if result.is_err() {
                            failed.store(true, Ordering::Release);
                        }
                        if result_tx.send((id, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut results: Vec<_> = result_rx.try_iter().collect();
        results.sort_by_key(|(id, _)| *id);
        let mut table = ConstantTable::default();
        for (id, result) in results {
            match result {
                Ok(nodes) => table.extend(nodes),
                Err(e) => {
                    warn!(
                        "Initialisation of `{}` failed: {}",
                        templates[id].name(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        info!(
            "Initialised {} templates ({} constants) with {} workers.",
            templates.len(),
            table.len(),
            workers
        );
        self.constants.set(Arc::new(table));
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        self.constants.is_ready()
    }

    /// Host nodes of the program constants.
    ///
    /// # Panics
    /// Panics if [`Self::initialise`] has not completed.
    pub fn constants(&self) -> Arc<ConstantTable> {
        self.constants
            .get()
            .expect("automaton used before initialise() completed")
    }

    /// Attempt of the frame `id`, or `None` if it is not trial.
    ///
    /// # Panics
    /// Panics if [`Self::initialise`] has not completed.
    pub fn attempt(&self, id: FrameId) -> Option<Arc<StepAttempt>> {
        assert!(
            self.is_initialised(),
            "automaton used before initialise() completed"
        );
        let frame = self.frame(id);
        frame
            .attempt
            .get_or_init(|| self.compute_attempt(&frame).map(Arc::new))
    }

    /// Error frame at the transient depth of `id`.
    pub fn on_error(&self, id: FrameId) -> FrameId {
        let frame = self.frame(id);
        frame
            .on_error
            .get_or_init(|| self.special_frame(FrameKind::Error, frame.transience))
    }

    /// Removed frame at the transient depth of `id`.
    pub fn on_remove(&self, id: FrameId) -> FrameId {
        let frame = self.frame(id);
        frame
            .on_remove
            .get_or_init(|| self.special_frame(FrameKind::Removed, frame.transience))
    }

    /// Frame to continue in when a property check fails at `id`.
    pub fn on_policy(&self, id: FrameId, policy: CheckPolicy) -> FrameId {
        match policy {
            CheckPolicy::Off | CheckPolicy::Silent => id,
            CheckPolicy::Error => self.on_error(id),
            CheckPolicy::Remove => self.on_remove(id),
        }
    }

    /// Attempts resolved on the way from the prime frame of `id` to `id`,
    /// oldest first.
    pub fn past_attempts(&self, id: FrameId) -> Vec<Arc<StepAttempt>> {
        let mut past = Vec::new();
        let mut current = self.frame(id);
        while let Some(pred) = current.pred() {
            if let Some(attempt) = self.attempt(pred) {
                past.push(attempt);
            }
            current = self.frame(pred);
        }
        past.reverse();
        past
    }

    /// Call stacks already tried since the prime frame of `id`.
    pub fn past_calls(&self, id: FrameId) -> Vec<CallStack> {
        let mut calls: Vec<CallStack> = Vec::new();
        for attempt in self.past_attempts(id) {
            for step in attempt.steps() {
                if !calls.contains(step.call_stack()) {
                    calls.push(step.call_stack().clone());
                }
            }
        }
        calls
    }

    /// Visit every frame reachable from the start frame, breadth first,
    /// through steps and verdicts.
    pub fn explore(&self) -> CtrlResult<Vec<FrameId>> {
        let mut seen = HashSet::from([self.start]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.start]);
        while let Some(id) = queue.pop_front() {
            if let Some(limit) = self.config.exploration_limit
                && order.len() >= limit
            {
                return Err(CtrlError::ExplorationLimit(limit));
            }
            order.push(id);
            let Some(attempt) = self.attempt(id) else {
                continue;
            };
            let next = attempt
                .steps()
                .iter()
                .map(|step| step.target())
                .chain([attempt.on_success(), attempt.on_failure()]);
            for target in next {
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        info!("Explored {} frames.", order.len());
        Ok(order)
    }

    /// Graph view of the reachable frames. Verdict edges are included only
    /// when `full` is set.
    pub fn to_graph(&self, full: bool) -> CtrlResult<DiGraph<FrameId, ControlEdge>> {
        let order = self.explore()?;
        let mut graph = DiGraph::with_capacity(order.len(), order.len());
        let nodes: HashMap<FrameId, _> = order.iter().map(|&id| (id, graph.add_node(id))).collect();

        for &id in &order {
            let Some(attempt) = self.attempt(id) else {
                continue;
            };
            for step in attempt.steps() {
                graph.add_edge(
                    nodes[&id],
                    nodes[&step.target()],
                    ControlEdge::Step(step.call().clone()),
                );
            }
            if full {
                if attempt.same_verdict() {
                    graph.add_edge(nodes[&id], nodes[&attempt.on_success()], ControlEdge::Verdict);
                } else {
                    graph.add_edge(nodes[&id], nodes[&attempt.on_success()], ControlEdge::Success);
                    graph.add_edge(nodes[&id], nodes[&attempt.on_failure()], ControlEdge::Failure);
                }
            }
        }
        Ok(graph)
    }
}
