use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("computation failed: {0}")]
    Failed(String),
}

/// Trait for the pluggable computation a worker owns.
///
/// The runtime drives it as "configure(blob), then repeatedly compute".
/// `configure` is only called while production is quiesced, so
/// implementations never see it race with `compute`. A failed `compute`
/// skips that unit of work; the production loop keeps going.
#[async_trait]
pub trait ComputationEngine: Send + 'static {
    /// Apply a new parameter blob.
    fn configure(&mut self, blob: &[u8]) -> Result<(), EngineError>;

    /// Produce one unit of work. May be slow.
    async fn compute(&mut self) -> Result<Bytes, EngineError>;
}
