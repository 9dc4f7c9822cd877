use thiserror::Error;

use crate::program::Constant;

/// Errors raised at the boundary with the compiled program.
///
/// Everything reported here is a property of the input (a malformed program,
/// a failing host factory, an exhausted budget). Inconsistencies that can only
/// arise from a defect inside this crate panic instead.
#[derive(Debug, Error)]
pub enum CtrlError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file '{file}': {source}")]
    ConfigParseError {
        source: toml::de::Error,
        file: String,
    },

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerializeError(#[from] toml::ser::Error),

    #[error("Procedure `{0}` is called but never declared in the program.")]
    UnknownProcedure(String),

    #[error("Procedure `{0}` is declared but has no body.")]
    MissingBody(String),

    #[error("Call to `{unit}` passes {found} arguments, but {expected} parameters are declared.")]
    ArityMismatch {
        unit: String,
        expected: usize,
        found: usize,
    },

    #[error("Argument {index} of the call to `{unit}` is an output, but parameter {index} is an input.")]
    OutputToInput { unit: String, index: usize },

    #[error("Argument {index} of the call to `{unit}` is not an output, but parameter {index} is an output.")]
    InputToOutput { unit: String, index: usize },

    #[error("Argument {index} of the call to `{unit}` is a wildcard bound to a live input parameter.")]
    WildcardInput { unit: String, index: usize },

    #[error("Variable `{var}` is live at the entry of `{template}` but is not an input parameter.")]
    UnboundVariable { template: String, var: String },

    #[error("Location {location} of `{template}` checks constraints but its success and failure continuations differ.")]
    ConstraintVerdictMismatch { template: String, location: u32 },

    #[error("Recursive procedure `{0}` may terminate or fail over without applying a rule at entry.")]
    UncommittedEntry(String),

    #[error("Procedure `{0}` is left recursive: it can reach a call to itself without applying a rule.")]
    LeftRecursion(String),

    #[error("Location {location} of `{template}` can reach itself without applying a rule.")]
    VerdictCycle { template: String, location: u32 },

    #[error("Host factory could not materialize constant `{constant}`: {reason}")]
    HostFactory { constant: Constant, reason: String },

    #[error("Exploration exceeded the limit of {0} frames.")]
    ExplorationLimit(usize),
}

pub type CtrlResult<T> = Result<T, CtrlError>;
