use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use parley_core::config::LimitsConfig;
use parley_core::error::ParleyError;

/// External-service identities subject to a process-wide concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    BatchTranscription,
    StreamingTranscription,
    Synthesis,
    Llm,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::BatchTranscription => "batch-transcription",
            Provider::StreamingTranscription => "streaming-transcription",
            Provider::Synthesis => "synthesis",
            Provider::Llm => "llm",
        }
    }

    const ALL: [Provider; 4] = [
        Provider::BatchTranscription,
        Provider::StreamingTranscription,
        Provider::Synthesis,
        Provider::Llm,
    ];
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum FabricError {
    /// All slots for the provider were in use for the whole acquire budget.
    #[error("capacity exhausted for {provider}")]
    CapacityExhausted { provider: &'static str },
}

impl From<FabricError> for ParleyError {
    fn from(err: FabricError) -> Self {
        match err {
            FabricError::CapacityExhausted { provider } => {
                ParleyError::CapacityExhausted { provider: provider.to_string() }
            }
        }
    }
}

/// Process-wide named semaphores capping concurrent in-flight calls per
/// external provider.
///
/// Waiters queue FIFO. Acquires are bounded by a timeout; on expiry the
/// caller observes `CapacityExhausted` rather than waiting forever. Caps
/// are fixed at construction.
pub struct RateLimitFabric {
    slots: HashMap<Provider, Arc<Semaphore>>,
    caps: HashMap<Provider, usize>,
    acquire_timeout: Duration,
}

impl RateLimitFabric {
    pub fn new(limits: &LimitsConfig) -> Self {
        let mut slots = HashMap::new();
        let mut caps = HashMap::new();
        for provider in Provider::ALL {
            let cap = match provider {
                Provider::BatchTranscription => limits.batch_transcription,
                Provider::StreamingTranscription => limits.streaming_transcription,
                Provider::Synthesis => limits.synthesis,
                Provider::Llm => limits.llm,
            }
            .max(1);
            slots.insert(provider, Arc::new(Semaphore::new(cap)));
            caps.insert(provider, cap);
        }
        Self {
            slots,
            caps,
            acquire_timeout: Duration::from_millis(limits.acquire_timeout_ms),
        }
    }

    /// Acquire a slot, waiting up to the configured default budget.
    pub async fn acquire(&self, provider: Provider) -> Result<SlotPermit, FabricError> {
        self.acquire_within(provider, self.acquire_timeout).await
    }

    /// Acquire a slot, waiting up to `budget`. A zero budget degrades to
    /// [`try_acquire`](Self::try_acquire).
    pub async fn acquire_within(
        &self,
        provider: Provider,
        budget: Duration,
    ) -> Result<SlotPermit, FabricError> {
        if budget.is_zero() {
            return self.try_acquire(provider);
        }
        let sem = self.semaphore(provider);
        match tokio::time::timeout(budget, sem.acquire_owned()).await {
            Ok(Ok(permit)) => {
                debug!(%provider, "slot acquired");
                Ok(SlotPermit { provider, _permit: permit })
            }
            // The semaphore is never closed while the fabric is alive.
            Ok(Err(_)) | Err(_) => {
                warn!(%provider, budget_ms = budget.as_millis() as u64, "slot acquire timed out");
                Err(FabricError::CapacityExhausted { provider: provider.name() })
            }
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self, provider: Provider) -> Result<SlotPermit, FabricError> {
        let sem = self.semaphore(provider);
        match sem.try_acquire_owned() {
            Ok(permit) => Ok(SlotPermit { provider, _permit: permit }),
            Err(_) => Err(FabricError::CapacityExhausted { provider: provider.name() }),
        }
    }

    /// Configured cap for a provider.
    pub fn capacity(&self, provider: Provider) -> usize {
        self.caps[&provider]
    }

    /// Number of slots currently held.
    pub fn in_flight(&self, provider: Provider) -> usize {
        self.caps[&provider] - self.slots[&provider].available_permits()
    }

    fn semaphore(&self, provider: Provider) -> Arc<Semaphore> {
        // Every variant is inserted in `new`.
        self.slots[&provider].clone()
    }
}

/// An owned slot. Dropping it releases the slot exactly once, whatever
/// path the holder exits through.
pub struct SlotPermit {
    provider: Provider,
    _permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    pub fn provider(&self) -> Provider {
        self.provider
    }
}

impl std::fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPermit").field("provider", &self.provider).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(streaming: usize) -> LimitsConfig {
        LimitsConfig {
            streaming_transcription: streaming,
            acquire_timeout_ms: 50,
            ..LimitsConfig::default()
        }
    }

    #[tokio::test]
    async fn cap_is_enforced() {
        let fabric = RateLimitFabric::new(&limits(2));
        let p1 = fabric.acquire(Provider::StreamingTranscription).await.unwrap();
        let p2 = fabric.acquire(Provider::StreamingTranscription).await.unwrap();
        assert_eq!(fabric.in_flight(Provider::StreamingTranscription), 2);

        let third = fabric.acquire(Provider::StreamingTranscription).await;
        assert!(matches!(third, Err(FabricError::CapacityExhausted { .. })));

        drop(p1);
        let p3 = fabric.acquire(Provider::StreamingTranscription).await.unwrap();
        assert_eq!(fabric.in_flight(Provider::StreamingTranscription), 2);
        drop(p2);
        drop(p3);
        assert_eq!(fabric.in_flight(Provider::StreamingTranscription), 0);
    }

    #[tokio::test]
    async fn providers_are_independent() {
        let fabric = RateLimitFabric::new(&limits(1));
        let _stream = fabric.acquire(Provider::StreamingTranscription).await.unwrap();
        // A saturated streaming cap must not affect the llm pool.
        let llm = fabric.acquire(Provider::Llm).await;
        assert!(llm.is_ok());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let fabric = Arc::new(RateLimitFabric::new(&LimitsConfig {
            streaming_transcription: 1,
            acquire_timeout_ms: 5_000,
            ..LimitsConfig::default()
        }));
        let held = fabric.acquire(Provider::StreamingTranscription).await.unwrap();

        let waiter = {
            let fabric = fabric.clone();
            tokio::spawn(async move {
                fabric.acquire(Provider::StreamingTranscription).await.is_ok()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn zero_budget_is_try_only() {
        let fabric = RateLimitFabric::new(&limits(1));
        let _held = fabric.try_acquire(Provider::StreamingTranscription).unwrap();
        let denied = fabric
            .acquire_within(Provider::StreamingTranscription, Duration::ZERO)
            .await;
        assert!(denied.is_err());
    }

    #[test]
    fn zero_configured_cap_is_clamped() {
        let fabric = RateLimitFabric::new(&limits(0));
        assert_eq!(fabric.capacity(Provider::StreamingTranscription), 1);
    }
}
