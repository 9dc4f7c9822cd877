//! Runtime control states.
use std::{fmt, sync::Arc};

use log::trace;
use strum::EnumIs;

use super::{Assignment, Automaton, Step, StepAttempt};
use crate::{
    template::{LocationRef, SwitchRef, SwitchStack},
    term::TermType,
    utils::lazy::LazyCell,
};

/// Handle to a canonical frame of an [`Automaton`]. Frame numbers are
/// assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub(crate) u32);

impl FrameId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIs)]
pub enum FrameKind {
    /// Ordinary control state at a template location.
    Control,
    /// Reached when a checked property is violated.
    Error,
    /// Reached when a state violating a property is removed.
    Removed,
}

/// How an external checker reacts to a violated property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIs)]
pub enum CheckPolicy {
    Off,
    Silent,
    Error,
    Remove,
}

/// Which calls of the location a frame still has to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Stage {
    All,
    /// Constraints have been resolved already.
    ProperOnly,
}

/// Interning key of frames. Prime and predecessor are canonical already and
/// compared by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum FrameKey {
    Control {
        /// `None` for frames that are their own prime.
        prime: Option<FrameId>,
        pred: Option<FrameId>,
        location: LocationRef,
        pops: Arc<[Assignment]>,
        stack: SwitchStack,
        stage: Stage,
    },
    Special {
        kind: FrameKind,
        transience: u32,
    },
}

/// Canonical runtime control state.
#[derive(Debug)]
pub struct Frame {
    pub(crate) id: FrameId,
    pub(crate) kind: FrameKind,
    pub(crate) location: Option<LocationRef>,
    pub(crate) stack: SwitchStack,
    pub(crate) prime: FrameId,
    pub(crate) pred: Option<FrameId>,
    pub(crate) pops: Arc<[Assignment]>,
    pub(crate) stage: Stage,
    pub(crate) ty: TermType,
    pub(crate) transience: u32,
    pub(crate) attempt: LazyCell<Option<Arc<StepAttempt>>>,
    pub(crate) on_error: LazyCell<FrameId>,
    pub(crate) on_remove: LazyCell<FrameId>,
}

impl Frame {
    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }

    pub fn is_removed(&self) -> bool {
        self.kind.is_removed()
    }

    /// Template location; `None` for error and removed frames.
    pub fn location(&self) -> Option<LocationRef> {
        self.location
    }

    /// Pending procedure calls, outermost first.
    pub fn stack(&self) -> &[SwitchRef] {
        &self.stack
    }

    /// Number of pending procedure calls.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Nearest ancestor reached without a verdict transition.
    pub fn prime(&self) -> FrameId {
        self.prime
    }

    pub fn is_prime(&self) -> bool {
        self.prime == self.id
    }

    /// Frame whose attempt verdict led here.
    pub fn pred(&self) -> Option<FrameId> {
        self.pred
    }

    /// Exits of procedures collapsed since the prime frame, still to be
    /// applied by the next step.
    pub fn pops(&self) -> &[Assignment] {
        &self.pops
    }

    pub fn ty(&self) -> TermType {
        self.ty
    }

    pub fn is_trial(&self) -> bool {
        self.ty.is_trial()
    }

    pub fn is_final(&self) -> bool {
        self.ty.is_final()
    }

    pub fn is_dead(&self) -> bool {
        self.ty.is_dead()
    }

    /// Transient depth, pending call sites included.
    pub fn transience(&self) -> u32 {
        self.transience
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => {
                write!(f, "{}[{}", self.id, location)?;
                for sw in &self.stack {
                    write!(f, "/{}", sw)?;
                }
                write!(f, "]")
            }
            None => write!(f, "{}[{:?}@{}]", self.id, self.kind, self.transience),
        }
    }
}

impl Automaton {
    /// Canonical frame for `location` with pending calls `stack`, reached
    /// by a verdict of `pred` (or by a step, if `pred` is `None`).
    ///
    /// Calls that have finished are collapsed first: while the location is
    /// final, the top switch is popped and its finish location taken. Frames
    /// reached by a verdict record the corresponding exits as pending pops.
    pub fn build_frame(
        &self,
        location: LocationRef,
        stack: SwitchStack,
        pred: Option<FrameId>,
    ) -> FrameId {
        self.build_staged(location, stack, pred, Stage::All)
    }

    pub(crate) fn build_staged(
        &self,
        location: LocationRef,
        mut stack: SwitchStack,
        pred: Option<FrameId>,
        stage: Stage,
    ) -> FrameId {
        let templates = self.templates();
        let pred_frame = pred.map(|p| self.frame(p));

        let mut pops: Vec<Assignment> = pred_frame
            .as_ref()
            .map(|p| p.pops.to_vec())
            .unwrap_or_default();
        let mut location = location;
        while templates.location(location).is_final()
            && let Some(sw) = stack.pop()
        {
            if pred.is_some() {
                pops.push(Assignment::exit(templates, location, sw));
            }
            location = templates.switch(sw).on_finish();
        }

        let loc = templates.location(location);
        let transience = loc.transience()
            + stack
                .iter()
                .map(|&sw| templates.switch(sw).transience())
                .sum::<u32>();
        let prime = pred_frame.as_ref().map(|p| p.prime);
        let pops: Arc<[Assignment]> = pops.into();

        let key = FrameKey::Control {
            prime,
            pred,
            location,
            pops: pops.clone(),
            stack: stack.clone(),
            stage,
        };
        self.add_frame(key, |id| Frame {
            id,
            kind: FrameKind::Control,
            location: Some(location),
            stack,
            prime: prime.unwrap_or(id),
            pred,
            pops,
            stage,
            ty: loc.ty(),
            transience,
            attempt: LazyCell::new(),
            on_error: LazyCell::new(),
            on_remove: LazyCell::new(),
        })
    }

    pub(crate) fn special_frame(&self, kind: FrameKind, transience: u32) -> FrameId {
        self.add_frame(FrameKey::Special { kind, transience }, |id| Frame {
            id,
            kind,
            location: None,
            stack: SwitchStack::new(),
            prime: id,
            pred: None,
            pops: Arc::new([]),
            stage: Stage::All,
            ty: TermType::Dead,
            transience,
            attempt: LazyCell::new(),
            on_error: LazyCell::new(),
            on_remove: LazyCell::new(),
        })
    }

    /// Stacks leaving `frame`, with calls to recursive procedures replaced by
    /// the stacks leaving the procedure entry.
    fn expand(&self, prefix: SwitchStack, out: &mut Vec<SwitchStack>) {
        let templates = self.templates();
        let Some(&top) = prefix.last() else {
            return;
        };
        let Some(callee) = templates.callee(templates.switch(top).call()) else {
            out.push(prefix);
            return;
        };
        // Only committed recursive entries stay at the call boundary
        let attempt = templates
            .location(callee.start())
            .attempt()
            .unwrap_or_else(|| panic!("entry of `{}` has no attempt", callee.name()));
        for stack in attempt.stacks() {
            let mut expanded = prefix.clone();
            expanded.extend_from_slice(stack);
            self.expand(expanded, out);
        }
    }

    pub(crate) fn compute_attempt(&self, frame: &Frame) -> Option<StepAttempt> {
        let templates = self.templates();
        let location = frame.location?;
        let switches = templates.location(location).attempt()?;

        let mut stacks = Vec::new();
        for stack in switches.stacks() {
            self.expand(stack.clone(), &mut stacks);
        }
        let (constraints, proper): (Vec<_>, Vec<_>) = stacks.into_iter().partition(|stack| {
            let top = *stack.last().expect("expanded stacks are non-empty");
            templates.switch(top).call().is_constraint()
        });

        let attempt = if frame.stage == Stage::ProperOnly || constraints.is_empty() {
            self.verdict_attempt(frame, proper)
        } else if proper.is_empty() {
            // Constraint locations have a single verdict
            let verdict = self.build_frame(switches.on_success(), frame.stack.clone(), Some(frame.id));
            StepAttempt {
                steps: self.steps(frame, constraints),
                on_success: verdict,
                on_failure: verdict,
            }
        } else {
            let intermediate = self.frame(self.build_staged(
                location,
                frame.stack.clone(),
                Some(frame.id),
                Stage::ProperOnly,
            ));
            let proper = self.verdict_attempt(&intermediate, proper);
            intermediate.attempt.set(Some(Arc::new(proper)));
            StepAttempt {
                steps: self.steps(frame, constraints),
                on_success: intermediate.id,
                on_failure: intermediate.id,
            }
        };

        trace!(
            "Attempt of {}: {} step(s), success {}, failure {}",
            frame,
            attempt.steps.len(),
            attempt.on_success,
            attempt.on_failure
        );
        Some(attempt)
    }

    fn verdict_attempt(&self, frame: &Frame, stacks: Vec<SwitchStack>) -> StepAttempt {
        let switches = self
            .templates()
            .location(frame.location.expect("control frames have a location"))
            .attempt()
            .expect("trial locations have an attempt");
        let on_success = self.build_frame(switches.on_success(), frame.stack.clone(), Some(frame.id));
        let on_failure = self.build_frame(switches.on_failure(), frame.stack.clone(), Some(frame.id));
        StepAttempt {
            steps: self.steps(frame, stacks),
            on_success,
            on_failure,
        }
    }

    fn steps(&self, frame: &Frame, stacks: Vec<SwitchStack>) -> Vec<Step> {
        let mut steps: Vec<Step> = stacks
            .into_iter()
            .map(|stack| {
                let mut full = frame.stack.clone();
                full.extend_from_slice(&stack);
                Step::new(self, frame, full)
            })
            .collect();
        steps.sort();
        steps.dedup();
        steps
    }
}
