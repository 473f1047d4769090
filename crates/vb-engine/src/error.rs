use thiserror::Error;
use vb_core::PolicyError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not running")]
    Stopped,

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

pub type EngineResult<T> = Result<T, EngineError>;
