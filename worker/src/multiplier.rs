use std::str;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use task_broker_core::{ComputationEngine, EngineError};

/// Toy numeric engine: multiplies its configured value by a random
/// single-digit factor, with a short random delay standing in for real
/// work.
pub struct MultiplierEngine {
    multiplier: i64,
}

impl MultiplierEngine {
    pub fn new() -> Self {
        Self { multiplier: 0 }
    }
}

impl Default for MultiplierEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputationEngine for MultiplierEngine {
    /// The blob is the multiplier as ASCII decimal, e.g. b"123".
    fn configure(&mut self, blob: &[u8]) -> Result<(), EngineError> {
        let text = str::from_utf8(blob)
            .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;
        self.multiplier = text
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| EngineError::InvalidConfiguration(e.to_string()))?;
        Ok(())
    }

    async fn compute(&mut self) -> Result<Bytes, EngineError> {
        let (delay_ms, factor) = {
            let mut rng = rand::rng();
            let delay_ms: u64 = rng.random_range(50..=100);
            let factor: i64 = rng.random_range(0..10);
            (delay_ms, factor)
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(Bytes::from((self.multiplier * factor).to_string()))
    }
}
