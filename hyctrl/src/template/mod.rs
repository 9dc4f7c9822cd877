//! Compiled control templates.
//!
//! A [`Template`] is the control-flow graph of the main program or of one
//! procedure. Its [`Location`]s are the terms reachable from the template
//! entry; a trial location carries a [`SwitchAttempt`] listing the
//! [`SwitchStack`]s that can be taken from it, plus the locations reached
//! once the attempt is resolved.
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use smallvec::SmallVec;

use crate::{
    program::{Call, Constant, CtrlVar, Procedure},
    term::{Term, TermType},
};

mod builder;

pub use builder::TemplateBuilder;

/// Location of a template of a [`TemplateSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationRef {
    pub template: u32,
    pub number: u32,
}

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}:l{}", self.template, self.number)
    }
}

/// Switch of a template of a [`TemplateSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwitchRef {
    pub template: u32,
    pub number: u32,
}

impl fmt::Display for SwitchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}:s{}", self.template, self.number)
    }
}

/// Pending calls, outermost first. Every switch but the last calls the
/// procedure in whose template the next switch lives.
pub type SwitchStack = SmallVec<[SwitchRef; 4]>;

#[derive(Debug, Clone)]
pub struct Location {
    pub(crate) number: u32,
    pub(crate) term: Term,
    pub(crate) ty: TermType,
    pub(crate) transience: u32,
    pub(crate) vars: Arc<[CtrlVar]>,
    pub(crate) attempt: Option<SwitchAttempt>,
}

impl Location {
    pub fn number(&self) -> u32 {
        self.number
    }

    /// The term this location stands for.
    pub fn term(&self) -> Term {
        self.term
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

    pub fn transience(&self) -> u32 {
        self.transience
    }

    /// Variables live at this location, sorted; the position of a variable is
    /// its slot in the valuation level of this template.
    pub fn vars(&self) -> &[CtrlVar] {
        &self.vars
    }

    pub fn var_index(&self, var: &CtrlVar) -> Option<usize> {
        self.vars.binary_search(var).ok()
    }

    pub fn attempt(&self) -> Option<&SwitchAttempt> {
        self.attempt.as_ref()
    }
}

/// Outgoing control edge of a location, wrapping a single call.
#[derive(Debug, Clone)]
pub struct Switch {
    pub(crate) number: u32,
    pub(crate) source: LocationRef,
    pub(crate) call: Call,
    pub(crate) on_finish: LocationRef,
    pub(crate) transience: u32,
}

impl Switch {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn source(&self) -> LocationRef {
        self.source
    }

    pub fn call(&self) -> &Call {
        &self.call
    }

    /// Location reached in the same template once the call has returned.
    pub fn on_finish(&self) -> LocationRef {
        self.on_finish
    }

    /// Transient depth at which the call is made.
    pub fn transience(&self) -> u32 {
        self.transience
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchAttempt {
    pub(crate) stacks: Vec<SwitchStack>,
    pub(crate) on_success: LocationRef,
    pub(crate) on_failure: LocationRef,
}

impl SwitchAttempt {
    pub fn stacks(&self) -> &[SwitchStack] {
        &self.stacks
    }

    pub fn on_success(&self) -> LocationRef {
        self.on_success
    }

    pub fn on_failure(&self) -> LocationRef {
        self.on_failure
    }

    pub fn same_verdict(&self) -> bool {
        self.on_success == self.on_failure
    }
}

/// Control-flow graph of the main program or of a procedure.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) id: u32,
    pub(crate) name: Arc<str>,
    pub(crate) procedure: Option<Arc<Procedure>>,
    pub(crate) locations: Vec<Location>,
    pub(crate) switches: Vec<Switch>,
    pub(crate) constants: Vec<Constant>,
}

impl Template {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// The procedure implemented by this template; `None` for the main program.
    pub fn procedure(&self) -> Option<&Arc<Procedure>> {
        self.procedure.as_ref()
    }

    pub fn start(&self) -> LocationRef {
        LocationRef {
            template: self.id,
            number: 0,
        }
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    /// Literal arguments of the calls made by this template.
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }
}

/// The templates of a program: main first, then one per procedure.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub(crate) templates: Vec<Template>,
    pub(crate) by_name: HashMap<Arc<str>, u32>,
    pub(crate) recursive: Arc<BTreeSet<Arc<str>>>,
}

impl TemplateSet {
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn main(&self) -> &Template {
        &self.templates[0]
    }

    /// Entry location of the main program.
    pub fn start(&self) -> LocationRef {
        self.main().start()
    }

    pub fn template(&self, id: u32) -> &Template {
        &self.templates[id as usize]
    }

    pub fn procedure_template(&self, name: &str) -> Option<&Template> {
        self.by_name.get(name).map(|&id| self.template(id))
    }

    /// Template executed by `call`, for procedure calls.
    pub fn callee(&self, call: &Call) -> Option<&Template> {
        call.as_procedure()
            .and_then(|procedure| self.procedure_template(&procedure.name))
    }

    pub fn is_recursive(&self, name: &str) -> bool {
        self.recursive.contains(name)
    }

    pub fn location(&self, location: LocationRef) -> &Location {
        &self.template(location.template).locations[location.number as usize]
    }

    pub fn switch(&self, switch: SwitchRef) -> &Switch {
        &self.template(switch.template).switches[switch.number as usize]
    }

    /// Call stack of a switch stack, outermost first.
    pub fn call_stack(&self, stack: &[SwitchRef]) -> crate::term::CallStack {
        crate::term::CallStack(stack.iter().map(|&sw| self.switch(sw).call.clone()).collect())
    }
}
