use thiserror::Error;

/// Error type shared across the engine.
///
/// Match failures are expected and frequent: they surface as a failed or
/// skipped step result and never propagate past the step executor. Storage
/// and VCS failures are fatal for the operation that hit them and always
/// propagate.
#[derive(Error, Debug)]
pub enum AatError {
    #[error("Match failed: {0}")]
    MatchFailed(String),

    #[error("Step {step} ({action}): {message}")]
    StepExecution {
        step: u32,
        action: String,
        message: String,
    },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("AI adapter error: {0}")]
    Adapter(String),

    #[error("Reporter error: {0}")]
    Reporter(String),

    #[error("Learning store error: {0}")]
    Learning(String),

    #[error("Git operation failed: {0}")]
    GitOps(String),

    #[error("DevQA loop failed: {0}")]
    Loop(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AatError {
    /// Step-level errors become a failed/skipped step result instead of
    /// aborting the scenario.
    pub fn is_step_level(&self) -> bool {
        matches!(
            self,
            AatError::MatchFailed(_) | AatError::StepExecution { .. } | AatError::Assertion(_)
        )
    }
}
