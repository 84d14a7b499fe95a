use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rule compilation failed: {0}")]
    Compile(#[from] catrule_compiler::CompileError),
    #[error("engine already finalized; further registrations are forbidden")]
    AlreadyFinalized,
}
