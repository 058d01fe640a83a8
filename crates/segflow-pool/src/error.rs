use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Work rejected: group {group} is not active (active: {active})")]
    StaleGroup { group: u64, active: u64 },

    #[error("Generation cannot move backwards from {active} to {requested}")]
    GenerationRegressed { active: u64, requested: u64 },

    #[error("Thread pool is shut down")]
    Shutdown,

    #[error("Failed to build thread pool: {0}")]
    Build(String),
}

pub type PoolResult<T> = Result<T, PoolError>;
