use std::{fmt, sync::Arc};

use strum::EnumIs;

use super::{Binding, CtrlType, CtrlVar};

/// What a rule is used for when it is called from a control program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIs)]
pub enum RuleRole {
    /// Ordinary graph transformation.
    Transformer,
    /// Unmodifying rule used as a test.
    Condition,
    /// Graph property that must not hold.
    Forbidden,
    /// Graph property that must hold.
    Invariant,
}

impl RuleRole {
    /// Constraints are property checks rather than rule applications.
    pub fn is_constraint(self) -> bool {
        matches!(self, RuleRole::Forbidden | RuleRole::Invariant)
    }
}

/// Formal parameter of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleParam {
    pub ty: CtrlType,
    /// For output parameters, where the value comes from once the rule matched.
    pub output: Option<Binding>,
}

impl RuleParam {
    pub fn input(ty: CtrlType) -> Self {
        Self { ty, output: None }
    }

    pub fn output(ty: CtrlType, binding: Binding) -> Self {
        Self {
            ty,
            output: Some(binding),
        }
    }

    pub fn is_output(&self) -> bool {
        self.output.is_some()
    }
}

/// A graph-transformation rule as seen from the control layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub name: Arc<str>,
    pub role: RuleRole,
    pub params: Vec<RuleParam>,
}

impl Rule {
    pub fn new(name: impl Into<Arc<str>>, role: RuleRole, params: Vec<RuleParam>) -> Self {
        Self {
            name: name.into(),
            role,
            params,
        }
    }

    /// Parameterless transformer.
    pub fn transformer(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, RuleRole::Transformer, Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIs)]
pub enum ProcKind {
    Function,
    /// Executes as one indivisible unit.
    Recipe,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcParam {
    pub var: CtrlVar,
    pub out: bool,
}

impl ProcParam {
    pub fn input(var: CtrlVar) -> Self {
        Self { var, out: false }
    }

    pub fn output(var: CtrlVar) -> Self {
        Self { var, out: true }
    }
}

/// A named control sub-program (function or recipe).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Procedure {
    pub name: Arc<str>,
    pub kind: ProcKind,
    pub params: Vec<ProcParam>,
}

impl Procedure {
    pub fn new(name: impl Into<Arc<str>>, kind: ProcKind, params: Vec<ProcParam>) -> Self {
        Self {
            name: name.into(),
            kind,
            params,
        }
    }

    pub fn function(name: impl Into<Arc<str>>, params: Vec<ProcParam>) -> Self {
        Self::new(name, ProcKind::Function, params)
    }

    pub fn recipe(name: impl Into<Arc<str>>, params: Vec<ProcParam>) -> Self {
        Self::new(name, ProcKind::Recipe, params)
    }

    /// Index of the formal parameter declaring `var`.
    pub fn param_index(&self, var: &CtrlVar) -> Option<usize> {
        self.params.iter().position(|p| &p.var == var)
    }

    pub fn input_vars(&self) -> impl Iterator<Item = &CtrlVar> {
        self.params.iter().filter(|p| !p.out).map(|p| &p.var)
    }

    pub fn output_vars(&self) -> impl Iterator<Item = &CtrlVar> {
        self.params.iter().filter(|p| p.out).map(|p| &p.var)
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ProcKind::Function => "function",
            ProcKind::Recipe => "recipe",
        };
        write!(f, "{} {}(", kind, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if p.out {
                write!(f, "out ")?;
            }
            write!(f, "{}", p.var)?;
        }
        write!(f, ")")
    }
}
