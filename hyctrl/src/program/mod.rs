//! Compiled control-program model.
//!
//! Everything in this module is produced by the (external) control-language
//! compiler: typed control variables, literal constants, variable bindings,
//! the rules and procedures a control program calls, and the calls themselves.
//! The term algebra and the template builder only consume these values.
use std::{fmt, sync::Arc};

use strum::{EnumIs, EnumTryAs};

use crate::term::Term;

mod call;
mod unit;

pub use call::{Call, CallArg, CallUnit};
pub use unit::{ProcKind, ProcParam, Procedure, Rule, RuleParam, RuleRole};

/// Type of a control variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIs)]
pub enum CtrlType {
    /// A host-graph node.
    Node,
    Bool,
    Int,
    String,
}

impl fmt::Display for CtrlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtrlType::Node => write!(f, "node"),
            CtrlType::Bool => write!(f, "bool"),
            CtrlType::Int => write!(f, "int"),
            CtrlType::String => write!(f, "string"),
        }
    }
}

/// A named, typed control variable.
///
/// Variables are ordered by name first; location variable lists are kept
/// sorted in that order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CtrlVar {
    pub name: Arc<str>,
    pub ty: CtrlType,
}

impl CtrlVar {
    pub fn new(name: impl Into<Arc<str>>, ty: CtrlType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn node(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, CtrlType::Node)
    }
}

impl fmt::Display for CtrlVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.ty)
    }
}

/// A literal argument value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIs, EnumTryAs)]
pub enum Constant {
    Bool(bool),
    Int(i64),
    String(Arc<str>),
}

impl Constant {
    pub fn ty(&self) -> CtrlType {
        match self {
            Constant::Bool(_) => CtrlType::Bool,
            Constant::Int(_) => CtrlType::Int,
            Constant::String(_) => CtrlType::String,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Source of a single value in a variable assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs)]
pub enum Binding {
    /// Slot of the current valuation level.
    Var(usize),
    /// Slot of the valuation level directly below the current one.
    Caller(usize),
    /// Literal value.
    Const(Constant),
    /// Image of the given rule anchor node in the match.
    Anchor(usize),
    /// Node created by the given rule creator.
    Creator(usize),
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Var(i) => write!(f, "var#{}", i),
            Binding::Caller(i) => write!(f, "caller#{}", i),
            Binding::Const(c) => write!(f, "{}", c),
            Binding::Anchor(i) => write!(f, "anchor#{}", i),
            Binding::Creator(i) => write!(f, "creator#{}", i),
        }
    }
}

/// A complete control program: the main body and the procedures it may call.
///
/// Procedure bodies live in the term pool (see
/// [`TermPool::define`](crate::term::TermPool::define)).
#[derive(Debug, Clone)]
pub struct Program {
    pub main: Term,
    pub procedures: Vec<Arc<Procedure>>,
}

impl Program {
    pub fn new(main: Term) -> Self {
        Self {
            main,
            procedures: Vec::new(),
        }
    }

    pub fn with_procedure(mut self, procedure: Arc<Procedure>) -> Self {
        self.procedures.push(procedure);
        self
    }

    pub fn procedure(&self, name: &str) -> Option<&Arc<Procedure>> {
        self.procedures.iter().find(|p| &*p.name == name)
    }
}
