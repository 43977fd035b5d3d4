//! Turn-taking debate orchestration.
//!
//! The `TurnEngine` owns two conversation sessions and drives the loop:
//! select speaker, stream the reply, vocalize it, advance, schedule the next
//! turn. Hold, resume, and stop can arrive at any point; the loop observes
//! them cooperatively at its suspension points (between stream fragments,
//! after playback settles, during the inter-turn delay) and never leaves an
//! orphaned request or audio source behind. All presentation goes through an
//! event callback; the engine never touches rendering.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{PlaybackSequencer, SpeakOutcome};
use crate::backend::{AudioSink, ChatSession, LanguageBackend, SpeechBackend};
use crate::error::DebateError;
use crate::persona::{DebateSetup, Persona};

/// Delay between a settled turn and the next one. Nonzero so the projection
/// can settle, and always cancelable.
pub const TURN_DELAY: Duration = Duration::from_millis(500);

/// Who authored a transcript record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnRole {
    Speaker(usize),
    Summary,
}

/// One completed (or interrupted) exchange in the transcript.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    /// Stable identifier, addresses the UI node for this turn.
    pub id: String,
    pub role: TurnRole,
    /// Display name for speaker records.
    pub speaker: Option<String>,
    /// Full text, accumulated from streamed fragments.
    pub text: String,
}

/// Visual state of one debater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerState {
    Idle,
    Thinking,
    Speaking,
}

/// Events emitted to the UI collaborator.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    DebateStarted { topic: String },
    TurnStarted { turn_id: String, speaker_index: usize, speaker_name: String },
    /// Incremental render update; `text` is the full accumulated partial text.
    TurnTextUpdated { turn_id: String, text: String },
    TurnCompleted { turn_id: String, speaker_index: usize, text: String },
    SpeakerStateChanged { speaker_index: usize, state: SpeakerState },
    /// Inline error bubble for a failed turn.
    ErrorRecord { turn_id: String, message: String },
    /// Transient notification; playback failures never stall the loop.
    PlaybackFailed { message: String },
    SummaryStarted { turn_id: String },
    SummaryReady { turn_id: String, text: String },
    SummaryFailed { turn_id: String, message: String },
    DebateStopped,
}

pub type EventCallback = Box<dyn Fn(DebateEvent) + Send + Sync>;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Speaking(usize),
    Vocalizing(usize),
    Scheduled,
    Paused,
    Summarizing,
    Stopped,
}

/// Model names for the two kinds of completion the engine issues.
#[derive(Debug, Clone)]
pub struct EngineModels {
    pub chat: String,
    pub summary: String,
}

enum TurnFlow {
    /// Turn settled cleanly; schedule the next one.
    Advance,
    /// Do not schedule; the loop re-reads the flags.
    Hold,
}

/// Finite-state controller for one debate at a time.
#[derive(Clone)]
pub struct TurnEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    language: Arc<dyn LanguageBackend>,
    sequencer: PlaybackSequencer,
    models: EngineModels,
    callback: Mutex<Option<EventCallback>>,

    running: AtomicBool,
    paused: AtomicBool,
    interrupted: AtomicBool,
    /// Monotonic turn counter; speaker = index mod 2.
    turn_index: AtomicU64,
    /// Id source for turn / summary records.
    record_counter: AtomicU64,
    /// Run epoch; results from a superseded run compare stale and are dropped.
    epoch: AtomicU64,

    state: Mutex<EngineState>,
    /// Wakes the driver out of the pause park and the inter-turn delay.
    wake: Notify,
    run_token: Mutex<CancellationToken>,

    sessions: tokio::sync::Mutex<Vec<Box<dyn ChatSession>>>,
    personas: Mutex<Vec<Persona>>,
    setup: Mutex<Option<DebateSetup>>,
    transcript: Mutex<Vec<TurnRecord>>,
    /// The next incoming message for whichever speaker is due.
    pending: Mutex<Option<String>>,
}

impl TurnEngine {
    pub fn new(
        language: Arc<dyn LanguageBackend>,
        speech: Arc<dyn SpeechBackend>,
        sink: Arc<dyn AudioSink>,
        models: EngineModels,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                language,
                sequencer: PlaybackSequencer::new(speech, sink),
                models,
                callback: Mutex::new(None),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                interrupted: AtomicBool::new(false),
                turn_index: AtomicU64::new(0),
                record_counter: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                state: Mutex::new(EngineState::Idle),
                wake: Notify::new(),
                run_token: Mutex::new(CancellationToken::new()),
                sessions: tokio::sync::Mutex::new(Vec::new()),
                personas: Mutex::new(Vec::new()),
                setup: Mutex::new(None),
                transcript: Mutex::new(Vec::new()),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Register the event callback. Replaces any previous one.
    pub fn with_callback(self, callback: EventCallback) -> Self {
        *self.inner.callback.lock().unwrap() = Some(callback);
        self
    }

    /// Begin a debate. Validates input, constructs both sessions, seeds the
    /// opening prompt for speaker 0, and spawns the driver loop. A run
    /// already in progress is superseded.
    pub async fn start(&self, setup: DebateSetup, personas: Vec<Persona>) -> Result<(), DebateError> {
        if setup.topic.trim().is_empty() {
            return Err(DebateError::Validation(
                "debate topic must not be empty".to_string(),
            ));
        }
        if personas.len() != 2 {
            return Err(DebateError::Validation(format!(
                "a debate needs exactly two personas, got {}",
                personas.len()
            )));
        }

        let inner = &self.inner;
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut token = inner.run_token.lock().unwrap();
            token.cancel();
            *token = CancellationToken::new();
        }
        inner.sequencer.stop_all();
        inner.interrupted.store(false, Ordering::SeqCst);
        inner.paused.store(false, Ordering::SeqCst);
        inner.turn_index.store(0, Ordering::SeqCst);
        inner.record_counter.store(0, Ordering::SeqCst);
        inner.transcript.lock().unwrap().clear();
        inner.set_state(EngineState::Starting);

        let instruction_0 = personas[0].system_instruction(&setup, &personas[1].name);
        let instruction_1 = personas[1].system_instruction(&setup, &personas[0].name);
        let sessions = match futures::try_join!(
            inner.language.create_session(&inner.models.chat, &instruction_0),
            inner.language.create_session(&inner.models.chat, &instruction_1),
        ) {
            Ok((first, second)) => vec![first, second],
            Err(e) => {
                inner.set_state(EngineState::Idle);
                return Err(e);
            }
        };

        *inner.sessions.lock().await = sessions;
        *inner.pending.lock().unwrap() = Some(setup.opening_prompt());
        *inner.personas.lock().unwrap() = personas;
        inner.running.store(true, Ordering::SeqCst);
        info!(topic = %setup.topic, "debate started");
        inner.emit(DebateEvent::DebateStarted {
            topic: setup.topic.clone(),
        });
        *inner.setup.lock().unwrap() = Some(setup);

        let token = inner.run_token.lock().unwrap().clone();
        let driver = Arc::clone(inner);
        tokio::spawn(async move { driver.drive(epoch, token).await });
        Ok(())
    }

    /// Toggle hold. Entering hold cancels the pending turn timer and
    /// force-stops playback but keeps already-rendered partial text; leaving
    /// hold resumes at the top of the loop with the turn index unchanged.
    /// Returns the new paused state.
    pub fn toggle_hold(&self) -> bool {
        let inner = &self.inner;
        let paused = !inner.paused.load(Ordering::SeqCst);
        inner.paused.store(paused, Ordering::SeqCst);
        if paused {
            debug!("debate held");
            inner.sequencer.stop_all();
            inner.emit_speakers_idle();
        } else {
            debug!("debate resumed");
        }
        inner.wake.notify_one();
        paused
    }

    /// Terminally interrupt the current run. Idempotent. With `with_summary`
    /// and at least one spoken turn, a single summary is requested from the
    /// full speaker-labeled transcript; a summary failure is reported inline
    /// and the engine still ends `Stopped`.
    pub async fn stop(&self, with_summary: bool) {
        self.inner.stop(with_summary).await;
    }

    /// Re-vocalize a past turn through the debate speech slot. Returns false
    /// for an unknown or non-speaker record.
    pub async fn speak_again(&self, turn_id: &str) -> bool {
        let inner = &self.inner;
        let Some((text, voice)) = inner.record_voice(turn_id) else {
            return false;
        };
        if let SpeakOutcome::Failed(message) = inner.sequencer.speak(&text, &voice).await {
            inner.emit(DebateEvent::PlaybackFailed { message });
        }
        true
    }

    /// Silence the debate speech slot without touching the turn loop.
    pub fn stop_voices(&self) {
        self.inner.sequencer.stop_all();
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn transcript(&self) -> Vec<TurnRecord> {
        self.inner.transcript.lock().unwrap().clone()
    }
}

impl EngineInner {
    fn emit(&self, event: DebateEvent) {
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback(event);
        }
    }

    fn emit_speakers_idle(&self) {
        for speaker_index in 0..2 {
            self.emit(DebateEvent::SpeakerStateChanged {
                speaker_index,
                state: SpeakerState::Idle,
            });
        }
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap() = state;
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// The scheduling loop: one in-flight turn at a time, by construction.
    async fn drive(self: Arc<Self>, epoch: u64, token: CancellationToken) {
        loop {
            if epoch != self.current_epoch() || self.interrupted() {
                break;
            }
            if self.paused() {
                self.set_state(EngineState::Paused);
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = token.cancelled() => {}
                }
                continue;
            }
            match self.take_turn(epoch).await {
                TurnFlow::Advance => {
                    self.set_state(EngineState::Scheduled);
                    tokio::select! {
                        _ = tokio::time::sleep(TURN_DELAY) => {}
                        _ = self.wake.notified() => {}
                        _ = token.cancelled() => {}
                    }
                }
                TurnFlow::Hold => {}
            }
        }
        debug!(epoch, "driver loop exited");
    }

    /// One turn: stream the current speaker's reply, record it, vocalize it,
    /// and advance if nothing intervened. Re-entry guard at the top mirrors
    /// the scheduler and resume paths both funneling through here.
    async fn take_turn(&self, epoch: u64) -> TurnFlow {
        if self.interrupted() || self.paused() || epoch != self.current_epoch() {
            return TurnFlow::Hold;
        }

        let speaker_index = (self.turn_index.load(Ordering::SeqCst) % 2) as usize;
        let listener_index = (speaker_index + 1) % 2;
        let (speaker_name, voice) = {
            let personas = self.personas.lock().unwrap();
            (
                personas[speaker_index].name.clone(),
                personas[speaker_index].voice.clone(),
            )
        };

        self.set_state(EngineState::Speaking(speaker_index));
        self.emit(DebateEvent::SpeakerStateChanged {
            speaker_index,
            state: SpeakerState::Thinking,
        });
        self.emit(DebateEvent::SpeakerStateChanged {
            speaker_index: listener_index,
            state: SpeakerState::Idle,
        });

        let message = self.pending.lock().unwrap().clone().unwrap_or_default();
        let turn_id = format!("turn-{}", self.record_counter.fetch_add(1, Ordering::SeqCst));
        self.emit(DebateEvent::TurnStarted {
            turn_id: turn_id.clone(),
            speaker_index,
            speaker_name: speaker_name.clone(),
        });

        let (text, completed) = match self.stream_reply(speaker_index, &message, &turn_id, epoch).await {
            Ok(streamed) => streamed,
            Err(e) => {
                warn!(speaker = %speaker_name, error = %e, "turn failed");
                self.emit(DebateEvent::ErrorRecord {
                    turn_id,
                    message: e.to_string(),
                });
                // A failed turn is not retried; partial text may already be
                // visible. Equivalent to an unrequested stop without summary.
                self.stop(false).await;
                return TurnFlow::Hold;
            }
        };

        if epoch != self.current_epoch() {
            // A newer run owns the transcript now; this turn's remnants are
            // dropped rather than recorded.
            return TurnFlow::Hold;
        }

        // The fragments received so far are kept even when the stream was
        // abandoned by an interrupt.
        self.transcript.lock().unwrap().push(TurnRecord {
            id: turn_id.clone(),
            role: TurnRole::Speaker(speaker_index),
            speaker: Some(speaker_name),
            text: text.clone(),
        });

        if !completed {
            return TurnFlow::Hold;
        }

        self.emit(DebateEvent::TurnCompleted {
            turn_id,
            speaker_index,
            text: text.clone(),
        });
        // The finished utterance becomes the other speaker's incoming message.
        *self.pending.lock().unwrap() = Some(text.clone());

        self.set_state(EngineState::Vocalizing(speaker_index));
        let outcome = self
            .sequencer
            .speak_with(&text, &voice, || {
                self.emit(DebateEvent::SpeakerStateChanged {
                    speaker_index,
                    state: SpeakerState::Speaking,
                });
            })
            .await;
        if let SpeakOutcome::Failed(message) = outcome {
            self.emit(DebateEvent::PlaybackFailed { message });
        }
        self.emit(DebateEvent::SpeakerStateChanged {
            speaker_index,
            state: SpeakerState::Idle,
        });

        if self.interrupted() || self.paused() || epoch != self.current_epoch() {
            return TurnFlow::Hold;
        }
        self.turn_index.fetch_add(1, Ordering::SeqCst);
        TurnFlow::Advance
    }

    /// Consume one reply stream. Returns the accumulated text and whether the
    /// stream ran to natural completion. Interruption abandons the remaining
    /// fragments cooperatively; the network call itself is not aborted, its
    /// remainder is simply ignored.
    async fn stream_reply(
        &self,
        speaker_index: usize,
        message: &str,
        turn_id: &str,
        epoch: u64,
    ) -> Result<(String, bool), DebateError> {
        let mut stream = {
            let mut sessions = self.sessions.lock().await;
            sessions[speaker_index].send_streaming(message).await?
        };

        let mut text = String::new();
        let mut completed = true;
        while let Some(fragment) = stream.next().await {
            if self.interrupted() || epoch != self.current_epoch() {
                completed = false;
                break;
            }
            text.push_str(&fragment?);
            self.emit(DebateEvent::TurnTextUpdated {
                turn_id: turn_id.to_string(),
                text: text.clone(),
            });
        }
        Ok((text, completed))
    }

    async fn stop(&self, with_summary: bool) {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(with_summary, "debate stopping");
        self.running.store(false, Ordering::SeqCst);
        self.run_token.lock().unwrap().cancel();
        self.wake.notify_one();
        self.sequencer.stop_all();
        self.emit_speakers_idle();

        let had_exchange = self
            .transcript
            .lock()
            .unwrap()
            .iter()
            .any(|r| matches!(r.role, TurnRole::Speaker(_)));

        if with_summary && had_exchange {
            self.set_state(EngineState::Summarizing);
            let summary_id = format!(
                "summary-{}",
                self.record_counter.fetch_add(1, Ordering::SeqCst)
            );
            self.emit(DebateEvent::SummaryStarted {
                turn_id: summary_id.clone(),
            });
            self.generate_summary(summary_id).await;
        }

        self.set_state(EngineState::Stopped);
        self.emit(DebateEvent::DebateStopped);
    }

    /// Best-effort prose summary of the whole run. Failure is rendered
    /// inline; it never re-throws.
    async fn generate_summary(&self, summary_id: String) {
        let Some(prompt) = self.summary_prompt() else {
            return;
        };
        let epoch = self.current_epoch();
        match self.language.generate_once(&self.models.summary, &prompt).await {
            Ok(text) => {
                if epoch != self.current_epoch() {
                    debug!("dropping stale summary result");
                    return;
                }
                self.transcript.lock().unwrap().push(TurnRecord {
                    id: summary_id.clone(),
                    role: TurnRole::Summary,
                    speaker: None,
                    text: text.clone(),
                });
                self.emit(DebateEvent::SummaryReady {
                    turn_id: summary_id,
                    text,
                });
            }
            Err(e) => {
                warn!(error = %e, "summary generation failed");
                self.emit(DebateEvent::SummaryFailed {
                    turn_id: summary_id,
                    message: e.to_string(),
                });
            }
        }
    }

    fn summary_prompt(&self) -> Option<String> {
        let setup = self.setup.lock().unwrap().clone()?;
        let (first, second) = {
            let personas = self.personas.lock().unwrap();
            if personas.len() != 2 {
                return None;
            }
            (personas[0].name.clone(), personas[1].name.clone())
        };
        let log = self
            .transcript
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r.role, TurnRole::Speaker(_)))
            .map(|r| format!("{}: {}", r.speaker.as_deref().unwrap_or("Speaker"), r.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        Some(setup.summary_prompt(&first, &second, &log))
    }

    fn record_voice(&self, turn_id: &str) -> Option<(String, String)> {
        let transcript = self.transcript.lock().unwrap();
        let record = transcript.iter().find(|r| r.id == turn_id)?;
        let TurnRole::Speaker(speaker_index) = record.role else {
            return None;
        };
        let personas = self.personas.lock().unwrap();
        let voice = personas.get(speaker_index)?.voice.clone();
        Some((record.text.clone(), voice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioClip, FragmentStream};
    use crate::persona::{AnswerLength, DebateMode};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Semaphore;

    enum Script {
        Reply(Vec<&'static str>),
        Fail,
    }

    /// Language backend that replays scripted turns. Replies are handed out
    /// in send order across both sessions, which matches the strict
    /// alternation of the loop. An exhausted script hangs the stream, so a
    /// test ends its debate explicitly.
    #[derive(Default)]
    struct ScriptedBackend {
        scripts: Mutex<VecDeque<Script>>,
        sent: Mutex<Vec<String>>,
        instructions: Mutex<Vec<String>>,
        summary_prompts: Mutex<Vec<String>>,
        fail_summaries: AtomicBool,
        gate: Mutex<Option<Arc<Semaphore>>>,
    }

    impl ScriptedBackend {
        fn with_replies(replies: &[&[&'static str]]) -> Arc<Self> {
            let backend = Self::default();
            *backend.scripts.lock().unwrap() = replies
                .iter()
                .map(|fragments| Script::Reply(fragments.to_vec()))
                .collect();
            Arc::new(backend)
        }

        fn gated(self: &Arc<Self>) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn summary_prompts(&self) -> Vec<String> {
            self.summary_prompts.lock().unwrap().clone()
        }
    }

    struct ScriptedSession {
        backend: Arc<ScriptedBackend>,
    }

    #[async_trait]
    impl ChatSession for ScriptedSession {
        async fn send_streaming(&mut self, message: &str) -> Result<FragmentStream, DebateError> {
            self.backend.sent.lock().unwrap().push(message.to_string());
            let script = self.backend.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Fail) => Err(DebateError::Backend("scripted failure".to_string())),
                Some(Script::Reply(fragments)) => {
                    let gate = self.backend.gate.lock().unwrap().clone();
                    let fragments: Vec<String> =
                        fragments.into_iter().map(str::to_string).collect();
                    Ok(Box::pin(async_stream::stream! {
                        for fragment in fragments {
                            if let Some(gate) = &gate {
                                gate.acquire().await.unwrap().forget();
                            }
                            yield Ok(fragment);
                        }
                    }))
                }
                None => Ok(Box::pin(futures::stream::pending())),
            }
        }
    }

    #[async_trait]
    impl LanguageBackend for Arc<ScriptedBackend> {
        async fn create_session(
            &self,
            _model: &str,
            system_instruction: &str,
        ) -> Result<Box<dyn ChatSession>, DebateError> {
            self.instructions
                .lock()
                .unwrap()
                .push(system_instruction.to_string());
            Ok(Box::new(ScriptedSession {
                backend: Arc::clone(self),
            }))
        }

        async fn generate_once(&self, _model: &str, prompt: &str) -> Result<String, DebateError> {
            self.summary_prompts.lock().unwrap().push(prompt.to_string());
            if self.fail_summaries.load(Ordering::SeqCst) {
                return Err(DebateError::Backend("summary unavailable".to_string()));
            }
            Ok("A concise summary.".to_string())
        }
    }

    struct TinySpeech;

    #[async_trait]
    impl crate::backend::SpeechBackend for TinySpeech {
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<AudioClip, DebateError> {
            Ok(AudioClip {
                samples: vec![0.0; 16],
                sample_rate: 24_000,
            })
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

    type EventLog = Arc<Mutex<Vec<DebateEvent>>>;

    fn engine_with(backend: Arc<ScriptedBackend>) -> (TurnEngine, EventLog) {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        let engine = TurnEngine::new(
            Arc::new(backend),
            Arc::new(TinySpeech),
            Arc::new(InstantSink),
            EngineModels {
                chat: "chat-model".to_string(),
                summary: "summary-model".to_string(),
            },
        )
        .with_callback(Box::new(move |event| log.lock().unwrap().push(event)));
        (engine, events)
    }

    fn setup() -> DebateSetup {
        DebateSetup::new(
            "Is remote work better?",
            DebateMode::FormalDebate,
            AnswerLength::Short,
            "English",
        )
    }

    fn debaters() -> Vec<Persona> {
        vec![
            Persona::new("ada", "Ada").with_voice("af_sky"),
            Persona::new("ben", "Ben").with_voice("am_adam"),
        ]
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn count_turn_starts(events: &EventLog) -> usize {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, DebateEvent::TurnStarted { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_speakers_alternate_and_replies_flow_across() {
        let backend = ScriptedBackend::with_replies(&[
            &["The floor is mine."],
            &["I disagree entirely."],
            &["Let me expand on that."],
            &["Still no."],
        ]);
        let (engine, _events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        wait_for(|| engine.transcript().len() >= 4).await;
        engine.stop(false).await;

        let transcript = engine.transcript();
        for (i, record) in transcript.iter().take(4).enumerate() {
            assert_eq!(record.role, TurnRole::Speaker(i % 2));
        }
        assert_eq!(transcript[0].speaker.as_deref(), Some("Ada"));
        assert_eq!(transcript[1].speaker.as_deref(), Some("Ben"));

        let sent = backend.sent();
        assert!(sent[0].contains("\"Is remote work better?\""));
        assert!(sent[0].contains("opening statement"));
        // Each completed reply becomes the next speaker's incoming message.
        assert_eq!(sent[1], "The floor is mine.");
        assert_eq!(sent[2], "I disagree entirely.");
        assert_eq!(sent[3], "Let me expand on that.");

        let instructions = backend.instructions.lock().unwrap().clone();
        assert!(instructions[0].contains("a character named Ada"));
        assert!(instructions[0].contains("You are interacting with Ben."));
        assert!(instructions[1].contains("You are interacting with Ada."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_keeps_turn_index_and_records_finished_stream() {
        let backend =
            ScriptedBackend::with_replies(&[&["Hello ", "world."], &["Round two."]]);
        let gate = backend.gated();
        let (engine, events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        wait_for(|| engine.state() == EngineState::Speaking(0)).await;

        assert!(engine.toggle_hold());
        assert!(engine.is_paused());

        // The in-flight stream is not aborted by hold; it finishes, lands in
        // the transcript, and the loop then parks without advancing.
        gate.add_permits(2);
        wait_for(|| engine.transcript().len() == 1).await;
        wait_for(|| engine.state() == EngineState::Paused).await;
        assert_eq!(engine.transcript()[0].text, "Hello world.");
        assert_eq!(count_turn_starts(&events), 1);

        assert!(!engine.toggle_hold());
        wait_for(|| count_turn_starts(&events) == 2).await;

        // The turn index never advanced while paused, so the same speaker
        // goes again, fed the utterance that completed under hold.
        let second_speaker = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                DebateEvent::TurnStarted { speaker_index, .. } => Some(*speaker_index),
                _ => None,
            })
            .nth(1)
            .unwrap();
        assert_eq!(second_speaker, 0);
        assert_eq!(backend.sent()[1], "Hello world.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_mid_stream_keeps_partial_text() {
        let backend = ScriptedBackend::with_replies(&[&["one ", "two ", "three"]]);
        let gate = backend.gated();
        let (engine, events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        wait_for(|| engine.state() == EngineState::Speaking(0)).await;

        gate.add_permits(1);
        wait_for(|| {
            events.lock().unwrap().iter().any(|e| {
                matches!(e, DebateEvent::TurnTextUpdated { text, .. } if text == "one ")
            })
        })
        .await;

        engine.stop(false).await;
        gate.add_permits(5);
        wait_for(|| engine.transcript().len() == 1).await;

        // Exactly the fragments received before the interrupt survive.
        assert_eq!(engine.transcript()[0].text, "one ");
        assert!(!events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, DebateEvent::TurnCompleted { .. })));
        assert_eq!(engine.state(), EngineState::Stopped);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(count_turn_starts(&events), 1);
        assert_eq!(backend.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_requests_one_summary() {
        let backend =
            ScriptedBackend::with_replies(&[&["Opening words."], &["Counter words."]]);
        let (engine, events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        wait_for(|| engine.transcript().len() >= 2).await;

        engine.stop(true).await;
        engine.stop(true).await;

        let prompts = backend.summary_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("between Ada and Ben"));
        let ada = prompts[0].find("Ada: Opening words.").unwrap();
        let ben = prompts[0].find("Ben: Counter words.").unwrap();
        assert!(ada < ben);

        let ready = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, DebateEvent::SummaryReady { .. }))
            .count();
        assert_eq!(ready, 1);

        let transcript = engine.transcript();
        let last = transcript.last().unwrap();
        assert_eq!(last.role, TurnRole::Summary);
        assert_eq!(last.text, "A concise summary.");
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_spoken_turns_skips_summary() {
        let backend = ScriptedBackend::with_replies(&[]);
        let (engine, events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        engine.stop(true).await;

        assert!(backend.summary_prompts().is_empty());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, DebateEvent::DebateStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_failure_still_ends_stopped() {
        let backend = ScriptedBackend::with_replies(&[&["Only turn."]]);
        backend.fail_summaries.store(true, Ordering::SeqCst);
        let (engine, events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        wait_for(|| engine.transcript().len() == 1).await;
        engine.stop(true).await;

        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, DebateEvent::SummaryFailed { .. })));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine
            .transcript()
            .iter()
            .any(|r| r.role == TurnRole::Summary));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_bad_input_without_side_effects() {
        let backend = ScriptedBackend::with_replies(&[]);
        let (engine, _events) = engine_with(backend.clone());

        let blank = DebateSetup::new("   ", DebateMode::FormalDebate, AnswerLength::Short, "English");
        assert!(matches!(
            engine.start(blank, debaters()).await,
            Err(DebateError::Validation(_))
        ));

        let mut lonely = debaters();
        lonely.pop();
        assert!(matches!(
            engine.start(setup(), lonely).await,
            Err(DebateError::Validation(_))
        ));

        assert_eq!(engine.state(), EngineState::Idle);
        assert!(backend.instructions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_emits_error_and_stops() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.scripts.lock().unwrap().push_back(Script::Fail);
        let (engine, events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        wait_for(|| engine.state() == EngineState::Stopped).await;

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, DebateEvent::ErrorRecord { .. })));
        assert!(events.iter().any(|e| matches!(e, DebateEvent::DebateStopped)));
        assert!(backend.summary_prompts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_again_replays_known_turns_only() {
        let backend = ScriptedBackend::with_replies(&[&["Spoken once."]]);
        let (engine, _events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        wait_for(|| engine.transcript().len() == 1).await;
        engine.stop(false).await;

        assert!(engine.speak_again("turn-0").await);
        assert!(!engine.speak_again("turn-99").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes_previous_run() {
        let backend = ScriptedBackend::with_replies(&[&["stuck"], &["Fresh start."]]);
        let gate = backend.gated();
        let (engine, events) = engine_with(backend.clone());

        engine.start(setup(), debaters()).await.unwrap();
        wait_for(|| engine.state() == EngineState::Speaking(0)).await;

        // Second start supersedes the first; the old stream's output must not
        // land in the new transcript.
        engine.start(setup(), debaters()).await.unwrap();
        gate.add_permits(10);
        wait_for(|| !engine.transcript().is_empty()).await;

        let transcript = engine.transcript();
        assert_eq!(transcript[0].text, "Fresh start.");
        assert!(!transcript.iter().any(|r| r.text == "stuck"));

        let started = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, DebateEvent::DebateStarted { .. }))
            .count();
        assert_eq!(started, 2);
    }
}
