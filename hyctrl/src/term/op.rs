use std::sync::Arc;

use smallvec::{SmallVec, smallvec};
use strum::{EnumDiscriminants, EnumIs};

use super::{Derivation, Term};
use crate::program::Call;

/// Operator of a term together with its (canonical) children.
///
/// Two terms are the same object exactly when their operators are equal, so
/// `Op` is the interning key of the [`TermPool`](super::TermPool).
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumDiscriminants)]
#[strum_discriminants(derive(PartialOrd, Ord, Hash))]
#[strum_discriminants(name(OpKind))]
#[strum_discriminants(vis(pub))]
pub enum Op {
    /// A single rule or procedure call.
    Call(Call),
    /// Failure, at the given transient depth.
    Delta { depth: u32 },
    /// Successful termination.
    Epsilon,
    Seq(Term, Term),
    Or(Term, Term),
    /// `if (cond) then | also else otherwise`.
    If {
        cond: Term,
        then: Term,
        also: Term,
        otherwise: Term,
    },
    /// `try first else second`.
    Try(Term, Term),
    Alap(Term),
    /// `until (cond) body`.
    Until(Term, Term),
    /// `while (cond) body`.
    While(Term, Term),
    Star(Term),
    /// Atomic block that has not been entered yet.
    Atom(Term),
    /// Inside an atomic block; one level deeper than its child.
    Transit(Term),
    /// Body of a procedure being executed on behalf of the given caller.
    Body(Term, Arc<Derivation>),
}

impl Op {
    pub fn kind(&self) -> OpKind {
        self.into()
    }

    /// Child terms, in operator order.
    pub fn children(&self) -> SmallVec<[Term; 4]> {
        match self {
            Op::Call(_) | Op::Delta { .. } | Op::Epsilon => SmallVec::new(),
            Op::Seq(a, b)
            | Op::Or(a, b)
            | Op::Try(a, b)
            | Op::Until(a, b)
            | Op::While(a, b) => smallvec![*a, *b],
            Op::If {
                cond,
                then,
                also,
                otherwise,
            } => smallvec![*cond, *then, *also, *otherwise],
            Op::Alap(a) | Op::Star(a) | Op::Atom(a) | Op::Transit(a) | Op::Body(a, _) => {
                smallvec![*a]
            }
        }
    }

    pub fn arity(&self) -> usize {
        match self.kind() {
            OpKind::Call | OpKind::Delta | OpKind::Epsilon => 0,
            OpKind::Alap | OpKind::Star | OpKind::Atom | OpKind::Transit | OpKind::Body => 1,
            OpKind::Seq | OpKind::Or | OpKind::Try | OpKind::Until | OpKind::While => 2,
            OpKind::If => 4,
        }
    }
}
