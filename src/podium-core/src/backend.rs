//! External service boundaries.
//!
//! The generative-language and speech-synthesis services are opaque
//! collaborators reached over the network. The engine only sees these traits,
//! which keeps it runnable against scripted doubles in tests.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::DebateError;

/// A finite, ordered stream of response text fragments. Once exhausted it
/// cannot be restarted; the next message requires a new `send_streaming` call.
pub type FragmentStream = BoxStream<'static, Result<String, DebateError>>;

/// One persona's ongoing dialogue with the language backend. The accumulated
/// message history lives behind this handle; sessions are never shared
/// between the two debaters.
#[async_trait]
pub trait ChatSession: Send {
    /// Send a message and stream the reply.
    async fn send_streaming(&mut self, message: &str) -> Result<FragmentStream, DebateError>;
}

/// Generative-language service.
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    /// Open a fresh conversation context with a system instruction.
    async fn create_session(
        &self,
        model: &str,
        system_instruction: &str,
    ) -> Result<Box<dyn ChatSession>, DebateError>;

    /// One-shot, non-streaming completion. Used for the debate summary.
    async fn generate_once(&self, model: &str, prompt: &str) -> Result<String, DebateError>;
}

/// Decoded audio produced by a speech backend.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Speech-synthesis service.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioClip, DebateError>;
}

/// Playback destination for decoded audio.
///
/// `play` resolves when playback naturally ends or when `stop` forces it to
/// settle; `stop` is always safe to call, even when nothing is playing.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, clip: AudioClip) -> Result<(), DebateError>;
    fn stop(&self);
}
