use thiserror::Error;

/// Tagged result codes shared across the engine.
///
/// Task callbacks receive these as the `Err` arm of a [`ReturnCode`]; the
/// handler methods use them directly as error values. Variants are grouped
/// by the subsystem that raises them.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultError {
    // Chunk info handler
    #[error("chunk info handler not started")]
    HandlerNotStarted,

    #[error("unknown chunk name")]
    InvalidName,

    #[error("chunk size is zero or does not match the recorded size")]
    InvalidSize,

    #[error("chunk has no active watchers")]
    NoActiveWatchers,

    #[error("reference cannot be deleted")]
    CannotDelete,

    #[error("reference already exists")]
    RefExists,

    #[error("chunk info already exists")]
    ChunkInfoExists,

    // Tasks handler
    #[error("task not found")]
    TaskNotFound,

    #[error("task already exists")]
    TaskAlreadyExists,

    #[error("parent task is not active")]
    TaskParentNotActive,

    #[error("operation not valid for this task")]
    TaskIncorrectOperation,

    #[error("incorrect task parameter")]
    TaskIncorrectParameter,

    #[error("tasks handler internal error")]
    HandlerError,

    // Progress signals from stop-subtask checks
    #[error("store task finished successfully")]
    StoreTaskFinishedPass,

    #[error("store task finished unsuccessfully")]
    StoreTaskFinishedFail,

    #[error("store task not yet finished")]
    StoreTaskNotFinished,

    // Pending operations ledger
    #[error("pending operation already exists")]
    OperationExists,

    #[error("pending operation not found")]
    OperationNotFound,

    #[error("invalid parameters for a storing-vault status")]
    InvalidStoreOperation,

    #[error("invalid parameters for a reference-holder status")]
    InvalidReferenceOperation,

    #[error("invalid parameters for a rank-holder status")]
    InvalidRankOperation,

    #[error("status transition not allowed")]
    InvalidStatusTransition,

    // Account holder lookups
    #[error("find-nodes lookup error")]
    FindNodesError,

    #[error("find-nodes response could not be parsed")]
    FindNodesParseError,

    #[error("find-nodes lookup reported failure")]
    FindNodesFailure,

    // Cancellation / supersede
    #[error("task cancelled or superseded")]
    CancelledOrDone,

    #[error("serialisation failed")]
    SerialisationError,

    #[error("collaborator reported a failure")]
    GeneralError,
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// What a task callback observes: `Ok(())` on success, otherwise the reason
/// the task terminated.
pub type ReturnCode = std::result::Result<(), VaultError>;
