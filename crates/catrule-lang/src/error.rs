use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error in expression: {0}")]
    Syntax(String),
    #[error("expression must not be empty")]
    Empty,
}
