//! Podium Core Library
//!
//! Provides the turn-taking debate engine, persona and prompt composition,
//! backend traits, and audio playback sequencing.

pub mod audio;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod persona;
pub mod session;

pub use audio::{KokoroSpeech, PlaybackSequencer, SpeakOutcome, WavWriterSink};
pub use backend::{AudioClip, AudioSink, ChatSession, LanguageBackend, SpeechBackend};
pub use config::Config;
pub use engine::{
    DebateEvent, EngineModels, EngineState, SpeakerState, TurnEngine, TurnRecord, TurnRole,
};
pub use error::DebateError;
pub use persona::{AnswerLength, DebateMode, DebateSetup, Persona};
pub use session::OpenAiBackend;
