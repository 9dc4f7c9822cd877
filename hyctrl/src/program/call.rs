use std::{fmt, sync::Arc};

use strum::{EnumIs, EnumTryAs};

use super::{Constant, CtrlVar, Procedure, Rule, RuleRole};
use crate::utils::error::{CtrlError, CtrlResult};

/// The unit invoked by a [`Call`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumTryAs)]
pub enum CallUnit {
    Rule(Arc<Rule>),
    Procedure(Arc<Procedure>),
}

impl CallUnit {
    pub fn name(&self) -> &Arc<str> {
        match self {
            CallUnit::Rule(rule) => &rule.name,
            CallUnit::Procedure(procedure) => &procedure.name,
        }
    }

    fn arity(&self) -> usize {
        match self {
            CallUnit::Rule(rule) => rule.params.len(),
            CallUnit::Procedure(procedure) => procedure.params.len(),
        }
    }

    fn is_output_param(&self, index: usize) -> bool {
        match self {
            CallUnit::Rule(rule) => rule.params[index].is_output(),
            CallUnit::Procedure(procedure) => procedure.params[index].out,
        }
    }
}

/// Actual argument of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs)]
pub enum CallArg {
    /// A control variable, either read (`out == false`) or written by the call.
    Var { var: CtrlVar, out: bool },
    Const(Constant),
    /// Unconstrained input or discarded output.
    Wild,
}

impl CallArg {
    pub fn input(var: CtrlVar) -> Self {
        CallArg::Var { var, out: false }
    }

    pub fn output(var: CtrlVar) -> Self {
        CallArg::Var { var, out: true }
    }
}

impl fmt::Display for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallArg::Var { var, out: false } => write!(f, "{}", var.name),
            CallArg::Var { var, out: true } => write!(f, "out {}", var.name),
            CallArg::Const(c) => write!(f, "{}", c),
            CallArg::Wild => write!(f, "_"),
        }
    }
}

/// Invocation of a rule or procedure with actual arguments.
///
/// Calls are cheap to clone and compare structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    unit: CallUnit,
    args: Arc<[CallArg]>,
}

impl Call {
    /// Create a new call, checking the arguments against the unit signature.
    pub fn new(unit: CallUnit, args: Vec<CallArg>) -> CtrlResult<Self> {
        if unit.arity() != args.len() {
            return Err(CtrlError::ArityMismatch {
                unit: unit.name().to_string(),
                expected: unit.arity(),
                found: args.len(),
            });
        }

        for (index, arg) in args.iter().enumerate() {
            let param_out = unit.is_output_param(index);
            match arg {
                CallArg::Var { out: true, .. } if !param_out => {
                    return Err(CtrlError::OutputToInput {
                        unit: unit.name().to_string(),
                        index,
                    });
                }
                CallArg::Var { out: false, .. } | CallArg::Const(_) if param_out => {
                    return Err(CtrlError::InputToOutput {
                        unit: unit.name().to_string(),
                        index,
                    });
                }
                _ => {}
            }
        }

        Ok(Self {
            unit,
            args: args.into(),
        })
    }

    /// Shorthand for a call to a rule.
    pub fn rule(rule: &Arc<Rule>, args: Vec<CallArg>) -> CtrlResult<Self> {
        Self::new(CallUnit::Rule(rule.clone()), args)
    }

    /// Shorthand for a call to a procedure.
    pub fn procedure(procedure: &Arc<Procedure>, args: Vec<CallArg>) -> CtrlResult<Self> {
        Self::new(CallUnit::Procedure(procedure.clone()), args)
    }

    pub fn unit(&self) -> &CallUnit {
        &self.unit
    }

    pub fn name(&self) -> &Arc<str> {
        self.unit.name()
    }

    pub fn args(&self) -> &[CallArg] {
        &self.args
    }

    pub fn as_rule(&self) -> Option<&Arc<Rule>> {
        match &self.unit {
            CallUnit::Rule(rule) => Some(rule),
            CallUnit::Procedure(_) => None,
        }
    }

    pub fn as_procedure(&self) -> Option<&Arc<Procedure>> {
        match &self.unit {
            CallUnit::Procedure(procedure) => Some(procedure),
            CallUnit::Rule(_) => None,
        }
    }

    /// Role of the called rule; procedure calls have none.
    pub fn role(&self) -> Option<RuleRole> {
        self.as_rule().map(|rule| rule.role)
    }

    pub fn is_constraint(&self) -> bool {
        self.role().is_some_and(RuleRole::is_constraint)
    }

    /// Variables read by the call.
    pub fn input_vars(&self) -> impl Iterator<Item = &CtrlVar> {
        self.args.iter().filter_map(|arg| match arg {
            CallArg::Var { var, out: false } => Some(var),
            _ => None,
        })
    }

    /// Variables written by the call.
    pub fn output_vars(&self) -> impl Iterator<Item = &CtrlVar> {
        self.args.iter().filter_map(|arg| match arg {
            CallArg::Var { var, out: true } => Some(var),
            _ => None,
        })
    }

    pub fn has_outputs(&self) -> bool {
        self.output_vars().next().is_some()
    }

    /// Index of the argument through which the call writes `var`.
    pub fn output_index(&self, var: &CtrlVar) -> Option<usize> {
        self.args.iter().position(|arg| match arg {
            CallArg::Var { var: v, out: true } => v == var,
            _ => false,
        })
    }

    pub fn constants(&self) -> impl Iterator<Item = &Constant> {
        self.args.iter().filter_map(|arg| match arg {
            CallArg::Const(c) => Some(c),
            _ => None,
        })
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}
