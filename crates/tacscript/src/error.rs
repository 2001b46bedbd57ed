use thiserror::Error;

use crate::value::DataType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("instruction budget of {0} exhausted")]
    MaxInstructions(u64),

    #[error("script exceeded its wall-clock budget")]
    ScriptTimedOut,

    #[error("uncaught exception: {0}")]
    UncaughtException(String),

    #[error("duplicate overload for `{name}` (arity {arity}) on ({left:?}, {right:?})")]
    DuplicateOverload {
        name: String,
        arity: u8,
        left: DataType,
        right: DataType,
    },

    #[error("no such context: {0}")]
    UnknownContext(u64),

    #[error("context terminated abnormally: {0}")]
    ContextFailed(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
