//! Speech synthesis and playback sequencing.
//!
//! A `PlaybackSequencer` owns one logical speech channel. Starting a new
//! utterance preempts whatever currently occupies the slot, and a generation
//! counter makes sure a synthesis result that arrives after it has been
//! superseded is dropped instead of played. The debate channel and the voice
//! preview channel are two independent sequencer instances.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{AudioClip, AudioSink, SpeechBackend};
use crate::error::DebateError;

/// Kokoro output sample rate.
pub const SAMPLE_RATE: u32 = 24_000;

/// How one `speak` call settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Played to natural completion.
    Completed,
    /// A later occupant took the slot; the result was discarded or playback
    /// was cut short.
    Superseded,
    /// Synthesis or playback failed. The completion signal still resolved, so
    /// callers are never blocked by an audio failure.
    Failed(String),
}

/// Single-slot speech channel: synthesize, then play to settled.
pub struct PlaybackSequencer {
    speech: std::sync::Arc<dyn SpeechBackend>,
    sink: std::sync::Arc<dyn AudioSink>,
    generation: AtomicU64,
}

impl PlaybackSequencer {
    pub fn new(
        speech: std::sync::Arc<dyn SpeechBackend>,
        sink: std::sync::Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            speech,
            sink,
            generation: AtomicU64::new(0),
        }
    }

    /// Speak `text` with `voice`, preempting any current occupant of the
    /// slot. Resolves once playback has settled, whatever the outcome.
    pub async fn speak(&self, text: &str, voice: &str) -> SpeakOutcome {
        self.speak_with(text, voice, || {}).await
    }

    /// Like [`speak`](Self::speak), invoking `on_playback_start` the moment
    /// audio actually begins (after synthesis, before the wait).
    pub async fn speak_with<F>(&self, text: &str, voice: &str, on_playback_start: F) -> SpeakOutcome
    where
        F: FnOnce() + Send,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.stop();

        let spoken = strip_markup(text);
        let clip = match self.speech.synthesize(&spoken, voice).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!(voice, error = %e, "speech synthesis failed");
                return SpeakOutcome::Failed(e.to_string());
            }
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "dropping stale synthesis result");
            return SpeakOutcome::Superseded;
        }

        on_playback_start();
        let played = self.sink.play(clip).await;
        let current = self.generation.load(Ordering::SeqCst) == generation;
        match played {
            Ok(()) if current => SpeakOutcome::Completed,
            Ok(()) => SpeakOutcome::Superseded,
            Err(e) => {
                warn!(error = %e, "audio playback failed");
                SpeakOutcome::Failed(e.to_string())
            }
        }
    }

    /// Stop whatever is playing and invalidate any in-flight synthesis.
    /// Safe to call when the slot is empty.
    pub fn stop_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.sink.stop();
    }
}

/// Speech backend over the local kokoro engine.
pub struct KokoroSpeech {
    engine: tokio::sync::Mutex<TtsEngine>,
    available_voices: Vec<String>,
}

impl KokoroSpeech {
    /// Initialize the engine (downloads the model on first run).
    pub async fn new() -> Result<Self, DebateError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| DebateError::Backend(format!("Failed to initialize TTS: {e}")))?;
        let available_voices = engine.voices();
        Ok(Self {
            engine: tokio::sync::Mutex::new(engine),
            available_voices,
        })
    }

    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    fn validate_voice(&self, voice: &str) -> Result<(), DebateError> {
        if voice.is_empty() || !self.available_voices.contains(&voice.to_string()) {
            return Err(DebateError::Backend(format!(
                "Unknown voice '{voice}'. Available voices: {}",
                self.available_voices.join(", ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechBackend for KokoroSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioClip, DebateError> {
        self.validate_voice(voice)?;

        // Kokoro has a strict input length limit, so long turns are
        // synthesized in sentence-sized chunks with a short gap between them.
        let chunks = split_into_chunks(text, 200);
        let mut engine = self.engine.lock().await;
        let mut samples = Vec::new();

        for chunk in chunks {
            if chunk.trim().is_empty() {
                continue;
            }
            let chunk_samples = engine
                .synthesize(&chunk, Some(voice))
                .map_err(|e| DebateError::Backend(format!("Synthesis failed: {e}")))?;
            samples.extend(chunk_samples);
            // 0.3 s gap between chunks to prevent cutoff.
            samples.extend(std::iter::repeat_n(0.0, (SAMPLE_RATE as usize * 3) / 10));
        }

        // Trailing half-second so the final word is not clipped.
        samples.extend(std::iter::repeat_n(0.0, SAMPLE_RATE as usize / 2));

        Ok(AudioClip {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }
}

/// Sink that writes each clip to a numbered WAV file, then "plays" it by
/// waiting out the clip duration so turns stay sequenced in real time.
pub struct WavWriterSink {
    dir: PathBuf,
    counter: AtomicU64,
    current: Mutex<Option<CancellationToken>>,
    realtime: bool,
}

impl WavWriterSink {
    /// `realtime = false` resolves playback immediately after the file is
    /// written, which is what batch transcription wants.
    pub fn new(dir: impl Into<PathBuf>, realtime: bool) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
            current: Mutex::new(None),
            realtime,
        }
    }
}

#[async_trait]
impl AudioSink for WavWriterSink {
    async fn play(&self, clip: AudioClip) -> Result<(), DebateError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("utterance-{index:03}.wav"));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: clip.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| DebateError::Playback(format!("Failed to create WAV: {e}")))?;
        for sample in &clip.samples {
            writer
                .write_sample(*sample)
                .map_err(|e| DebateError::Playback(format!("Failed to write WAV: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| DebateError::Playback(format!("Failed to finalize WAV: {e}")))?;
        debug!(path = %path.display(), "wrote utterance");

        if self.realtime {
            let token = CancellationToken::new();
            *self.current.lock().unwrap() = Some(token.clone());
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(clip.duration_secs())) => {}
                _ = token.cancelled() => {}
            }
        }
        Ok(())
    }

    fn stop(&self) {
        if let Some(token) = self.current.lock().unwrap().take() {
            token.cancel();
        }
    }
}

/// Strip markdown emphasis and markup leftovers before synthesis; the models
/// are told not to format, but they do it anyway.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            '*' | '`' | '#' => {}
            _ if in_tag => {}
            _ => out.push(c),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into chunks safe for synthesis, preferring sentence boundaries
/// and falling back to commas for run-on sentences.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current.len() + sentence.len() > max_chars {
            if !current.is_empty() {
                chunks.push(current.trim().to_string());
                current = String::new();
            }

            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current.len() + part.len() > max_chars && !current.is_empty() {
                        chunks.push(current.trim().to_string());
                        current = String::new();
                    }
                    current.push_str(part);
                    current.push(' ');
                }
            } else {
                current.push_str(sentence);
                current.push(' ');
            }
        } else {
            current.push_str(sentence);
            current.push(' ');
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    struct CannedSpeech;

    #[async_trait]
    impl SpeechBackend for CannedSpeech {
        async fn synthesize(&self, text: &str, _voice: &str) -> Result<AudioClip, DebateError> {
            // Yield so a competing speak() can preempt between synthesis and
            // the staleness check.
            tokio::task::yield_now().await;
            Ok(AudioClip {
                samples: vec![0.0; text.len()],
                sample_rate: SAMPLE_RATE,
            })
        }
    }

    struct FailingSpeech;

    #[async_trait]
    impl SpeechBackend for FailingSpeech {
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<AudioClip, DebateError> {
            Err(DebateError::Backend("synthesis unavailable".to_string()))
        }
    }

    /// Sink whose playback never ends on its own; only `stop` settles it.
    struct HeldSink {
        stops: AtomicUsize,
        release: tokio::sync::Notify,
    }

    impl HeldSink {
        fn new() -> Self {
            Self {
                stops: AtomicUsize::new(0),
                release: tokio::sync::Notify::new(),
            }
        }
    }

    #[async_trait]
    impl AudioSink for HeldSink {
        async fn play(&self, _clip: AudioClip) -> Result<(), DebateError> {
            self.release.notified().await;
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.release.notify_one();
        }
    }

    struct InstantSink;

    #[async_trait]
    impl AudioSink for InstantSink {
        async fn play(&self, _clip: AudioClip) -> Result<(), DebateError> {
            Ok(())
        }

        fn stop(&self) {}
    }

    #[tokio::test]
    async fn test_speak_completes_on_natural_end() {
        let sequencer = PlaybackSequencer::new(Arc::new(CannedSpeech), Arc::new(InstantSink));
        assert_eq!(sequencer.speak("hello there", "af_sky").await, SpeakOutcome::Completed);
    }

    #[tokio::test]
    async fn test_second_speak_supersedes_first() {
        let sink = Arc::new(HeldSink::new());
        let sequencer = Arc::new(PlaybackSequencer::new(Arc::new(CannedSpeech), sink.clone()));

        let first = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move { sequencer.speak("first utterance", "af_sky").await })
        };
        tokio::task::yield_now().await;

        let second = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move { sequencer.speak("second utterance", "af_sky").await })
        };

        // The first call settles as superseded rather than erroring.
        assert_eq!(first.await.unwrap(), SpeakOutcome::Superseded);
        sink.stop();
        assert_eq!(second.await.unwrap(), SpeakOutcome::Completed);
    }

    #[tokio::test]
    async fn test_speak_failure_still_settles() {
        let sequencer = PlaybackSequencer::new(Arc::new(FailingSpeech), Arc::new(InstantSink));
        match sequencer.speak("anything", "af_sky").await {
            SpeakOutcome::Failed(message) => assert!(message.contains("synthesis unavailable")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_all_safe_when_idle() {
        let sequencer = PlaybackSequencer::new(Arc::new(CannedSpeech), Arc::new(InstantSink));
        sequencer.stop_all();
        sequencer.stop_all();
    }

    #[tokio::test]
    async fn test_stop_all_invalidates_inflight_synthesis() {
        let sink = Arc::new(HeldSink::new());
        let sequencer = Arc::new(PlaybackSequencer::new(Arc::new(CannedSpeech), sink.clone()));

        let speak = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move { sequencer.speak("going nowhere", "af_sky").await })
        };
        tokio::task::yield_now().await;
        sequencer.stop_all();

        assert_eq!(speak.await.unwrap(), SpeakOutcome::Superseded);
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("**Bold** and `code`"), "Bold and code");
        assert_eq!(strip_markup("plain words"), "plain words");
        assert_eq!(strip_markup("a <em>tagged</em> word"), "a tagged word");
        assert_eq!(strip_markup("# Heading\n\ntext"), "Heading text");
    }

    #[test]
    fn test_split_into_chunks_respects_limit() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.len() <= 35);
        }
    }

    #[test]
    fn test_split_into_chunks_falls_back_to_commas() {
        let long = format!("{}, {}, {}.", "a".repeat(80), "b".repeat(80), "c".repeat(80));
        let chunks = split_into_chunks(&long, 100);
        assert!(chunks.len() >= 2);
    }
}
