pub mod fabric;

pub use fabric::{FabricError, Provider, RateLimitFabric, SlotPermit};
