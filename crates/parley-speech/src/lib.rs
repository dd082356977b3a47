pub mod batch;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod http;

pub use batch::SpeechService;
pub use client::{ProviderEvent, ProviderStream, SynthesisClient, TranscriptionClient};
pub use coordinator::{StreamHandle, StreamingTranscriptionCoordinator};
pub use error::SpeechError;
pub use events::StreamEvent;
