use std::{fmt, ops::Deref, sync::Arc};

use super::Term;
use crate::program::Call;

/// One symbolic step: a call together with the term reached once it returns.
///
/// A derivation whose call unfolds into a procedure body is represented by a
/// chain: the exposed derivation is the innermost (rule) call and its
/// [`caller`](Self::caller) links lead outwards to the derivation local to the
/// term being derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Derivation {
    pub(crate) call: Call,
    pub(crate) transience_delta: i32,
    pub(crate) target: Term,
    pub(crate) caller: Option<Arc<Derivation>>,
    pub(crate) source: Option<Term>,
}

impl Derivation {
    pub(crate) fn new(call: Call, target: Term) -> Self {
        Self {
            call,
            transience_delta: 0,
            target,
            caller: None,
            source: None,
        }
    }

    pub fn call(&self) -> &Call {
        &self.call
    }

    /// Change of transient depth caused by taking this step, at the level of
    /// the derived term.
    pub fn transience_delta(&self) -> i32 {
        self.transience_delta
    }

    /// Continuation at this derivation's own procedure level.
    pub fn target(&self) -> Term {
        self.target
    }

    /// The enclosing procedure call, if this derivation was taken inside a body.
    pub fn caller(&self) -> Option<&Arc<Derivation>> {
        self.caller.as_ref()
    }

    /// Procedure-local term this derivation was taken from (set for nested
    /// derivations only).
    pub fn source(&self) -> Option<Term> {
        self.source
    }

    pub fn is_nested(&self) -> bool {
        self.caller.is_some()
    }

    /// The derivation local to the derived term.
    pub fn outermost(self: &Arc<Self>) -> &Arc<Self> {
        let mut current = self;
        while let Some(caller) = &current.caller {
            current = caller;
        }
        current
    }

    /// All derivations of the chain, outermost first.
    pub fn stack(self: &Arc<Self>) -> DerivationStack {
        let mut stack = Vec::new();
        let mut current = Some(self);
        while let Some(d) = current {
            stack.push(d.clone());
            current = d.caller.as_ref();
        }
        stack.reverse();
        DerivationStack(stack)
    }

    pub fn call_stack(self: &Arc<Self>) -> CallStack {
        self.stack().call_stack()
    }

    /// Rebuild the chain with the outermost target replaced by `f(target)`.
    pub(crate) fn map_outer(self: &Arc<Self>, f: &mut impl FnMut(Term) -> Term) -> Arc<Self> {
        let mut result = (**self).clone();
        match &self.caller {
            None => result.target = f(self.target),
            Some(caller) => result.caller = Some(caller.map_outer(f)),
        }
        Arc::new(result)
    }

    /// Rebuild the chain so that its outermost derivation, taken from
    /// `source`, is invoked on behalf of `caller`.
    pub(crate) fn nest_under(self: &Arc<Self>, caller: &Arc<Derivation>, source: Term) -> Arc<Self> {
        let mut result = (**self).clone();
        match &self.caller {
            None => {
                result.caller = Some(caller.clone());
                result.source = Some(source);
            }
            Some(inner) => result.caller = Some(inner.nest_under(caller, source)),
        }
        Arc::new(result)
    }
}

impl fmt::Display for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(caller) = &self.caller {
            write!(f, "{}/", caller.call)?;
        }
        write!(f, "{} -> {}", self.call, self.target)
    }
}

/// A derivation chain, outermost caller first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivationStack(Vec<Arc<Derivation>>);

impl DerivationStack {
    pub fn call_stack(&self) -> CallStack {
        CallStack(self.0.iter().map(|d| d.call.clone()).collect())
    }

    /// The innermost derivation, i.e. the one carrying the rule call.
    pub fn top(&self) -> &Arc<Derivation> {
        self.0.last().expect("derivation stacks are never empty")
    }
}

impl Deref for DerivationStack {
    type Target = [Arc<Derivation>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Calls of a derivation chain or switch stack, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CallStack(pub Vec<Call>);

impl CallStack {
    pub fn top(&self) -> Option<&Call> {
        self.0.last()
    }
}

impl Deref for CallStack {
    type Target = [Call];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, call) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", call)?;
        }
        Ok(())
    }
}

/// Derivative of a trial term.
///
/// The runtime first tries the [`derivations`](Self::derivations); once that
/// attempt is resolved it continues with [`on_success`](Self::on_success) if
/// at least one derivation was taken, and with [`on_failure`](Self::on_failure)
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationAttempt {
    pub(crate) derivations: Vec<Arc<Derivation>>,
    pub(crate) on_success: Term,
    pub(crate) on_failure: Term,
}

impl DerivationAttempt {
    pub fn derivations(&self) -> &[Arc<Derivation>] {
        &self.derivations
    }

    pub fn on_success(&self) -> Term {
        self.on_success
    }

    pub fn on_failure(&self) -> Term {
        self.on_failure
    }

    pub fn same_verdict(&self) -> bool {
        self.on_success == self.on_failure
    }

    pub(crate) fn map_outer(&self, mut f: impl FnMut(Term) -> Term) -> Vec<Arc<Derivation>> {
        self.derivations
            .iter()
            .map(|d| d.map_outer(&mut f))
            .collect()
    }
}
