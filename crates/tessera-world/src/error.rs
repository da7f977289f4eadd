/// Errors from constructing a [`World`](crate::World).
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("storage bounds are empty")]
    EmptyBounds,

    #[error("minimum chunk size must be a positive power of two, got {0}")]
    InvalidMinChunkSize(f32),
}

/// Errors from submitting work to an [`AsyncPreloader`](crate::AsyncPreloader).
#[derive(Debug, thiserror::Error)]
pub enum PreloadError {
    #[error("preload queue is full")]
    QueueFull,

    #[error("preload workers have shut down")]
    ShutDown,

    #[error("failed to spawn preload worker: {0}")]
    Spawn(#[from] std::io::Error),
}
