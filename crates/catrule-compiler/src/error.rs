use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(#[from] catrule_lang::ParseError),
    #[error("unknown builtin: {0}")]
    UnknownBuiltin(String),
    #[error("{0} expects {1} argument(s), got {2}")]
    ArityMismatch(&'static str, usize, usize),
    #[error("dynamic array index is not supported in attribute paths")]
    DynamicIndex,
    #[error("empty OR-set produced by a rule condition")]
    EmptyDisjunction,
}
