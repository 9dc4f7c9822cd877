//! Compilation of control programs into runtime control automata.
//!
//! A control program sequences calls to graph-transformation rules and
//! procedures with choice, iteration, conditionals, atomic blocks and
//! recursion. This crate turns such a program into a finite, canonical
//! automaton that a transformation engine can step through one rule
//! application at a time:
//!
//! - [`term`]: hash-consed control terms and their one-step derivatives;
//! - [`template`]: per-procedure control-flow graphs built from those
//!   derivatives;
//! - [`automaton`]: canonical runtime frames and steps, with the variable
//!   assignments needed to enter and leave procedures.
//!
//! ```
//! use std::sync::Arc;
//! use hyctrl::{
//!     automaton::{Automaton, ValueNodeFactory},
//!     program::{Call, Program, Rule},
//!     term::TermPool,
//!     utils::conf::AutomatonConfig,
//! };
//!
//! let pool = TermPool::new();
//! let a = pool.call(Call::rule(&Arc::new(Rule::transformer("a")), vec![]).unwrap());
//! let b = pool.call(Call::rule(&Arc::new(Rule::transformer("b")), vec![]).unwrap());
//! let program = Program::new(pool.seq(a, b));
//!
//! let automaton = Automaton::from_program(&pool, &program, AutomatonConfig::default()).unwrap();
//! automaton.initialise(&ValueNodeFactory::default()).unwrap();
//! let attempt = automaton.attempt(automaton.start()).unwrap();
//! assert_eq!(attempt.steps().len(), 1);
//! ```
pub mod automaton;
pub mod program;
pub mod template;
pub mod term;
pub mod utils;
