use std::{cmp::Ordering, fmt};

use super::{Assignment, Automaton, ConstantTable, Frame, FrameId, HostNode, Valuation};
use crate::{
    program::{Binding, Call},
    template::SwitchStack,
    term::CallStack,
};

/// A runtime control edge: applying the rule call on top of `stack` from
/// the source frame leads to the target frame.
#[derive(Debug, Clone)]
pub struct Step {
    source: FrameId,
    stack: SwitchStack,
    target: FrameId,
    call_stack: CallStack,
    enter: Vec<Assignment>,
    apply: Vec<Assignment>,
    transience_delta: i32,
    depth_delta: i32,
    modifying: bool,
}

impl Step {
    /// Step from `source` along `stack`, which extends the stack of `source`
    /// with the switches entered by this step.
    pub(crate) fn new(automaton: &Automaton, source: &Frame, stack: SwitchStack) -> Self {
        let templates = automaton.templates();
        let (&top, below) = stack.split_last().expect("steps have a non-empty switch stack");
        let top_switch = templates.switch(top);

        let target = automaton.frame(automaton.build_frame(
            top_switch.on_finish(),
            below.into(),
            None,
        ));

        let enter: Vec<Assignment> = stack[source.depth()..stack.len() - 1]
            .iter()
            .map(|&sw| Assignment::enter(templates, sw))
            .collect();
        let pops =
            Assignment::compute_pops(templates, below, top_switch.on_finish(), target.depth());

        let mut apply = Vec::with_capacity(source.pops().len() + enter.len() + 1 + pops.len());
        apply.extend_from_slice(source.pops());
        apply.extend(enter.iter().cloned());
        apply.push(Assignment::modify(templates, top));
        apply.extend(pops);

        Self {
            source: source.id(),
            call_stack: templates.call_stack(&stack),
            modifying: source.prime() != target.id() || top_switch.call().has_outputs(),
            transience_delta: target.transience() as i32 - source.transience() as i32,
            depth_delta: target.depth() as i32 - source.depth() as i32,
            target: target.id(),
            stack,
            enter,
            apply,
        }
    }

    pub fn source(&self) -> FrameId {
        self.source
    }

    pub fn target(&self) -> FrameId {
        self.target
    }

    /// Switches traversed by this step: the source stack followed by the
    /// switches entered, ending with the rule call.
    pub fn stack(&self) -> &SwitchStack {
        &self.stack
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    /// The applied rule call.
    pub fn call(&self) -> &Call {
        self.call_stack.top().expect("steps have a non-empty call stack")
    }

    /// One push per procedure entered by this step.
    pub fn enter_assignments(&self) -> &[Assignment] {
        &self.enter
    }

    /// Pending pops of the source, pushes, the rule modification, then one
    /// pop per procedure left before reaching the target.
    pub fn apply_assignments(&self) -> &[Assignment] {
        &self.apply
    }

    /// Run every assignment of the step on `valuation`.
    ///
    /// # Panics
    /// Panics if an output is bound to the rule match; use [`Self::apply_with`].
    pub fn apply(&self, valuation: &mut Valuation, constants: &ConstantTable) {
        for assignment in &self.apply {
            assignment.apply(valuation, constants);
        }
    }

    /// Run every assignment of the step on `valuation`, resolving anchor and
    /// creator bindings against the rule match with `resolve`.
    pub fn apply_with(
        &self,
        valuation: &mut Valuation,
        constants: &ConstantTable,
        resolve: &mut dyn FnMut(&Binding) -> HostNode,
    ) {
        for assignment in &self.apply {
            assignment.apply_with(valuation, constants, resolve);
        }
    }

    pub fn transience_delta(&self) -> i32 {
        self.transience_delta
    }

    pub fn depth_delta(&self) -> i32 {
        self.depth_delta
    }

    pub fn is_modifying(&self) -> bool {
        self.modifying
    }
}

impl PartialEq for Step {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Step {}

impl PartialOrd for Step {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Step {
    fn cmp(&self, other: &Self) -> Ordering {
        self.source
            .cmp(&other.source)
            .then_with(|| self.stack.cmp(&other.stack))
            .then_with(|| self.target.cmp(&other.target))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} --{}--> {}", self.source, self.call_stack, self.target)
    }
}

/// Outgoing structure of a trial frame: its steps, ordered, and the frames
/// reached once the attempt is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepAttempt {
    pub(crate) steps: Vec<Step>,
    pub(crate) on_success: FrameId,
    pub(crate) on_failure: FrameId,
}

impl StepAttempt {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn on_success(&self) -> FrameId {
        self.on_success
    }

    pub fn on_failure(&self) -> FrameId {
        self.on_failure
    }

    pub fn same_verdict(&self) -> bool {
        self.on_success == self.on_failure
    }
}
