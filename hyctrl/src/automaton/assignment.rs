//! Variable bookkeeping across rule applications and procedure calls.
use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use strum::EnumIs;

use crate::{
    program::{Binding, CallArg, Constant},
    template::{LocationRef, SwitchRef, TemplateSet},
    utils::error::CtrlResult,
};

/// Opaque handle to a host-graph value node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostNode(pub u64);

impl fmt::Display for HostNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Materialises literal constants as host-graph nodes.
pub trait HostFactory: Send + Sync {
    fn constant_node(&self, constant: &Constant) -> CtrlResult<HostNode>;
}

/// Default [`HostFactory`]: one fresh value node per distinct constant.
#[derive(Debug, Default)]
pub struct ValueNodeFactory {
    nodes: Mutex<HashMap<Constant, HostNode>>,
}

impl HostFactory for ValueNodeFactory {
    fn constant_node(&self, constant: &Constant) -> CtrlResult<HostNode> {
        let mut nodes = self.nodes.lock();
        let next = HostNode(nodes.len() as u64);
        Ok(*nodes.entry(constant.clone()).or_insert(next))
    }
}

/// Host nodes of the constants used by a program.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    nodes: HashMap<Constant, HostNode>,
}

impl ConstantTable {
    pub fn get(&self, constant: &Constant) -> Option<HostNode> {
        self.nodes.get(constant).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, constant: &Constant) -> HostNode {
        self.get(constant)
            .unwrap_or_else(|| panic!("constant {} was never materialised", constant))
    }
}

impl Extend<(Constant, HostNode)> for ConstantTable {
    fn extend<T: IntoIterator<Item = (Constant, HostNode)>>(&mut self, iter: T) {
        self.nodes.extend(iter);
    }
}

impl FromIterator<(Constant, HostNode)> for ConstantTable {
    fn from_iter<T: IntoIterator<Item = (Constant, HostNode)>>(iter: T) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// Stack of value arrays, one per open procedure-call level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valuation {
    levels: Vec<Vec<HostNode>>,
}

impl Valuation {
    /// Valuation of the main program before any call.
    pub fn new() -> Self {
        Self::with_root(Vec::new())
    }

    pub fn with_root(values: Vec<HostNode>) -> Self {
        Self {
            levels: vec![values],
        }
    }

    /// Number of levels, the main program included.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn top(&self) -> &[HostNode] {
        self.levels.last().expect("valuations always have a root level")
    }

    /// Values of the level directly below the top, if any.
    pub fn caller(&self) -> Option<&[HostNode]> {
        let n = self.levels.len();
        (n >= 2).then(|| self.levels[n - 2].as_slice())
    }

    pub fn levels(&self) -> &[Vec<HostNode>] {
        &self.levels
    }
}

impl Default for Valuation {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIs)]
pub enum AssignKind {
    /// Open a new level for an entered procedure.
    Push,
    /// Close the top level and overwrite the caller level.
    Pop,
    /// Overwrite the top level.
    Modify,
}

/// Ordered list of bindings computing the values of a valuation level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignment {
    kind: AssignKind,
    bindings: Arc<[Binding]>,
}

impl Assignment {
    pub fn new(kind: AssignKind, bindings: Vec<Binding>) -> Self {
        Self {
            kind,
            bindings: bindings.into(),
        }
    }

    pub fn kind(&self) -> AssignKind {
        self.kind
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Values at the finish location of the rule call of `switch`.
    ///
    /// Outputs of the call come from the rule's output bindings, all other
    /// variables keep their value from the source location.
    pub fn modify(templates: &TemplateSet, switch: SwitchRef) -> Self {
        let sw = templates.switch(switch);
        let rule = sw
            .call()
            .as_rule()
            .unwrap_or_else(|| panic!("modify assignment for procedure call {}", sw.call()));
        let source = templates.location(sw.source());
        let bindings = templates
            .location(sw.on_finish())
            .vars()
            .iter()
            .map(|var| match sw.call().output_index(var) {
                Some(index) => rule.params[index]
                    .output
                    .clone()
                    .unwrap_or_else(|| panic!("parameter {} of {} is not an output", index, rule.name)),
                None => Binding::Var(source.var_index(var).unwrap_or_else(|| {
                    panic!("{} is live after {} but not before", var, sw.call())
                })),
            })
            .collect();
        Self::new(AssignKind::Modify, bindings)
    }

    /// Values at the entry of the procedure called by `switch`, taken from
    /// the call arguments.
    pub fn enter(templates: &TemplateSet, switch: SwitchRef) -> Self {
        let sw = templates.switch(switch);
        let procedure = sw
            .call()
            .as_procedure()
            .unwrap_or_else(|| panic!("enter assignment for rule call {}", sw.call()));
        let callee = templates
            .callee(sw.call())
            .unwrap_or_else(|| panic!("no template for {}", procedure.name));
        let source = templates.location(sw.source());
        let bindings = templates
            .location(callee.start())
            .vars()
            .iter()
            .map(|var| {
                let index = procedure
                    .param_index(var)
                    .unwrap_or_else(|| panic!("{} is live at the entry of {}", var, procedure.name));
                match &sw.call().args()[index] {
                    CallArg::Var { var: arg, .. } => {
                        Binding::Var(source.var_index(arg).unwrap_or_else(|| {
                            panic!("argument {} of {} is not live", arg, sw.call())
                        }))
                    }
                    CallArg::Const(c) => Binding::Const(c.clone()),
                    CallArg::Wild => panic!("wildcard bound to live input {}", var),
                }
            })
            .collect();
        Self::new(AssignKind::Push, bindings)
    }

    /// Caller values once the procedure called by `switch` finished at `final_location`.
    ///
    /// Outputs of the call come from the matching formal parameter, all other
    /// variables are restored from the caller level.
    pub fn exit(templates: &TemplateSet, final_location: LocationRef, switch: SwitchRef) -> Self {
        let sw = templates.switch(switch);
        let procedure = sw
            .call()
            .as_procedure()
            .unwrap_or_else(|| panic!("exit assignment for rule call {}", sw.call()));
        let source = templates.location(sw.source());
        let last = templates.location(final_location);
        let bindings = templates
            .location(sw.on_finish())
            .vars()
            .iter()
            .map(|var| match sw.call().output_index(var) {
                Some(index) => {
                    let formal = &procedure.params[index].var;
                    Binding::Var(last.var_index(formal).unwrap_or_else(|| {
                        panic!("output {} of {} is not live at its end", formal, procedure.name)
                    }))
                }
                None => Binding::Caller(source.var_index(var).unwrap_or_else(|| {
                    panic!("{} is live after {} but not before", var, sw.call())
                })),
            })
            .collect();
        Self::new(AssignKind::Pop, bindings)
    }

    /// Exit assignments for returning from the top of `stack`, finished at
    /// `location`, until `remaining` switches are left.
    pub fn compute_pops(
        templates: &TemplateSet,
        stack: &[SwitchRef],
        location: LocationRef,
        remaining: usize,
    ) -> Vec<Self> {
        let mut pops = Vec::new();
        let mut location = location;
        for &switch in stack[remaining.min(stack.len())..].iter().rev() {
            pops.push(Self::exit(templates, location, switch));
            location = templates.switch(switch).on_finish();
        }
        pops
    }

    /// Values computed by this assignment.
    ///
    /// # Panics
    /// Panics on [`Binding::Anchor`] and [`Binding::Creator`], which can only
    /// be resolved against a rule match; see [`Self::compute_with`].
    pub fn compute(&self, valuation: &Valuation, constants: &ConstantTable) -> Vec<HostNode> {
        self.compute_with(valuation, constants, &mut |binding| {
            panic!("binding {} cannot be resolved without a match", binding)
        })
    }

    /// Values computed by this assignment; match-time bindings are delegated
    /// to `resolve`.
    pub fn compute_with(
        &self,
        valuation: &Valuation,
        constants: &ConstantTable,
        resolve: &mut dyn FnMut(&Binding) -> HostNode,
    ) -> Vec<HostNode> {
        self.bindings
            .iter()
            .map(|binding| match binding {
                Binding::Var(i) => valuation.top()[*i],
                Binding::Caller(i) => valuation
                    .caller()
                    .unwrap_or_else(|| panic!("caller binding {} at the root level", binding))[*i],
                Binding::Const(c) => constants.node(c),
                Binding::Anchor(_) | Binding::Creator(_) => resolve(binding),
            })
            .collect()
    }

    pub fn apply(&self, valuation: &mut Valuation, constants: &ConstantTable) {
        let values = self.compute(valuation, constants);
        self.store(valuation, values);
    }

    pub fn apply_with(
        &self,
        valuation: &mut Valuation,
        constants: &ConstantTable,
        resolve: &mut dyn FnMut(&Binding) -> HostNode,
    ) {
        let values = self.compute_with(valuation, constants, resolve);
        self.store(valuation, values);
    }

    fn store(&self, valuation: &mut Valuation, values: Vec<HostNode>) {
        match self.kind {
            AssignKind::Push => valuation.levels.push(values),
            AssignKind::Pop => {
                assert!(valuation.levels.len() >= 2, "pop at the root level");
                valuation.levels.pop();
                *valuation.levels.last_mut().expect("checked above") = values;
            }
            AssignKind::Modify => {
                *valuation
                    .levels
                    .last_mut()
                    .expect("valuations always have a root level") = values;
            }
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            AssignKind::Push => "push",
            AssignKind::Pop => "pop",
            AssignKind::Modify => "modify",
        };
        write!(f, "{}[", kind)?;
        for (i, b) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", b)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_modify_pop() {
        let constants: ConstantTable = [(Constant::Int(7), HostNode(70))].into_iter().collect();
        let mut valuation = Valuation::with_root(vec![HostNode(1), HostNode(2)]);

        Assignment::new(
            AssignKind::Push,
            vec![Binding::Var(1), Binding::Const(Constant::Int(7))],
        )
        .apply(&mut valuation, &constants);
        assert_eq!(valuation.top(), &[HostNode(2), HostNode(70)]);

        Assignment::new(AssignKind::Modify, vec![Binding::Var(1)]).apply(&mut valuation, &constants);
        assert_eq!(valuation.top(), &[HostNode(70)]);

        Assignment::new(AssignKind::Pop, vec![Binding::Caller(0), Binding::Var(0)])
            .apply(&mut valuation, &constants);
        assert_eq!(valuation.depth(), 1);
        assert_eq!(valuation.top(), &[HostNode(1), HostNode(70)]);
    }

    #[test]
    fn match_bindings_are_delegated() {
        let valuation = Valuation::new();
        let assignment = Assignment::new(AssignKind::Modify, vec![Binding::Creator(3)]);
        let values = assignment.compute_with(&valuation, &ConstantTable::default(), &mut |b| {
            assert_eq!(b, &Binding::Creator(3));
            HostNode(99)
        });
        assert_eq!(values, vec![HostNode(99)]);
    }

    #[test]
    #[should_panic(expected = "cannot be resolved")]
    fn anchors_do_not_compute() {
        Assignment::new(AssignKind::Modify, vec![Binding::Anchor(0)])
            .compute(&Valuation::new(), &ConstantTable::default());
    }

    #[test]
    #[should_panic(expected = "root level")]
    fn caller_requires_a_level_below() {
        Assignment::new(AssignKind::Modify, vec![Binding::Caller(0)])
            .compute(&Valuation::new(), &ConstantTable::default());
    }

    #[test]
    fn value_nodes_are_shared() {
        let factory = ValueNodeFactory::default();
        let a = factory.constant_node(&Constant::Bool(true)).unwrap();
        let b = factory.constant_node(&Constant::Int(1)).unwrap();
        assert_ne!(a, b);
        assert_eq!(factory.constant_node(&Constant::Bool(true)).unwrap(), a);
    }
}
