//! Podium CLI - AI Persona Debate Tool
//!
//! A command-line tool for staging spoken debates between two AI personas
//! using OpenAI-compatible APIs and local speech synthesis.

use std::collections::HashMap;
use std::env;
use std::io::Write as _;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use colored::Colorize;
use podium_core::audio::SAMPLE_RATE;
use podium_core::persona::find_persona;
use podium_core::{
    AudioClip, AudioSink, Config, DebateError, DebateEvent, DebateSetup, EngineModels,
    KokoroSpeech, OpenAiBackend, Persona, PlaybackSequencer, SpeakOutcome, SpeechBackend,
    TurnEngine,
};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "podium",
    version,
    about = "AI Persona Debate Tool - Stage spoken debates between AI personas",
    long_about = "A CLI tool for running turn-based debates between two AI personas, \
                  with streamed text and synthesized speech."
)]
struct Cli {
    /// The topic to debate
    #[arg(value_name = "TOPIC", required_unless_present_any = ["list_personas", "preview"])]
    topic: Option<String>,

    /// Personas to debate (specify exactly twice: -p frank-miller -p leo-valdez)
    #[arg(short, long, action = ArgAction::Append, value_name = "PERSONA")]
    persona: Vec<String>,

    /// Conversation mode: formal, casual, or panel
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,

    /// Response length: short, medium, or long
    #[arg(long, value_name = "LENGTH")]
    length: Option<String>,

    /// Response language
    #[arg(long, value_name = "LANGUAGE")]
    language: Option<String>,

    /// Number of turns before the debate is stopped
    #[arg(short, long, default_value = "6", value_name = "TURNS")]
    turns: u32,

    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Chat model override
    #[arg(long, value_name = "MODEL")]
    chat_model: Option<String>,

    /// Summary model override
    #[arg(long, value_name = "MODEL")]
    summary_model: Option<String>,

    /// Directory for utterance WAV files
    #[arg(long, default_value = "audio", value_name = "DIR")]
    audio_dir: String,

    /// Pace playback in real time instead of writing files as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Disable speech synthesis entirely
    #[arg(long)]
    no_audio: bool,

    /// Skip the end-of-debate summary
    #[arg(long)]
    no_summary: bool,

    /// Write the finished transcript as JSON to this file
    #[arg(long, value_name = "FILE")]
    transcript: Option<String>,

    /// List the available personas and exit
    #[arg(long)]
    list_personas: bool,

    /// Speak a sample line for the given persona and exit
    #[arg(long, value_name = "PERSONA")]
    preview: Option<String>,
}

/// Speech backend that produces a beat of silence; used with --no-audio so
/// the engine's vocalization phase still sequences turns.
struct SilentSpeech;

#[async_trait::async_trait]
impl SpeechBackend for SilentSpeech {
    async fn synthesize(&self, _text: &str, _voice: &str) -> Result<AudioClip, DebateError> {
        Ok(AudioClip {
            samples: Vec::new(),
            sample_rate: SAMPLE_RATE,
        })
    }
}

struct DiscardSink;

#[async_trait::async_trait]
impl AudioSink for DiscardSink {
    async fn play(&self, _clip: AudioClip) -> Result<(), DebateError> {
        Ok(())
    }

    fn stop(&self) {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let roster = config.roster();

    if cli.list_personas {
        print_roster(&roster);
        return Ok(());
    }

    if let Some(key) = &cli.preview {
        return preview_voice(&roster, key).await;
    }

    let topic = cli.topic.clone().unwrap_or_default();

    // Resolve debaters: explicit picks, or the first two roster entries.
    let personas: Vec<Persona> = if cli.persona.is_empty() {
        roster.iter().take(2).cloned().collect()
    } else {
        let mut picked = Vec::new();
        for key in &cli.persona {
            let persona = find_persona(&roster, key).ok_or_else(|| {
                format!(
                    "Unknown persona: '{}'. Run with --list-personas to see the roster.",
                    key
                )
            })?;
            picked.push(persona.clone());
        }
        picked
    };
    if personas.len() != 2 {
        eprintln!(
            "{} A debate needs exactly 2 personas, but {} were selected.",
            "Error:".red().bold(),
            personas.len()
        );
        std::process::exit(1);
    }

    let mode = cli
        .mode
        .as_deref()
        .unwrap_or(&config.defaults.mode)
        .parse()?;
    let length = cli
        .length
        .as_deref()
        .unwrap_or(&config.defaults.length)
        .parse()?;
    let language = cli
        .language
        .clone()
        .unwrap_or_else(|| config.defaults.language.clone());
    let setup = DebateSetup::new(topic.clone(), mode, length, language);

    // Get API configuration from environment
    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });

    let language_backend = Arc::new(OpenAiBackend::new(&api_base, &api_key)?);
    let (speech, sink): (Arc<dyn SpeechBackend>, Arc<dyn AudioSink>) = if cli.no_audio {
        (Arc::new(SilentSpeech), Arc::new(DiscardSink))
    } else {
        std::fs::create_dir_all(&cli.audio_dir)?;
        (
            Arc::new(KokoroSpeech::new().await?),
            Arc::new(podium_core::WavWriterSink::new(&cli.audio_dir, cli.realtime)),
        )
    };

    let models = EngineModels {
        chat: cli.chat_model.clone().unwrap_or(config.models.chat.clone()),
        summary: cli
            .summary_model
            .clone()
            .unwrap_or(config.models.summary.clone()),
    };

    print_header(&topic, &personas, &models.chat);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = TurnEngine::new(language_backend, speech, sink, models).with_callback(Box::new(
        move |event| {
            let _ = tx.send(event);
        },
    ));

    engine.start(setup, personas).await?;

    // Render events until the engine announces it has stopped. Ctrl-C turns
    // into a stop without summary.
    let mut printed: HashMap<String, usize> = HashMap::new();
    let mut completed_turns = 0u32;
    let mut stop_requested = false;
    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stop_requested => {
                eprintln!("\n{}", "Interrupted, stopping debate.".yellow());
                stop_requested = true;
                engine.stop(false).await;
                continue;
            }
        };

        match event {
            DebateEvent::TurnStarted { turn_id, speaker_name, .. } => {
                println!("{} {}", "▶".bright_cyan(), speaker_name.bright_cyan().bold());
                printed.insert(turn_id, 0);
            }
            DebateEvent::TurnTextUpdated { turn_id, text } => {
                // Streamed text grows append-only; print just the new tail.
                let seen = printed.entry(turn_id).or_insert(0);
                if text.len() > *seen {
                    print!("{}", &text[*seen..]);
                    std::io::stdout().flush().ok();
                    *seen = text.len();
                }
            }
            DebateEvent::TurnCompleted { .. } => {
                println!();
                println!();
                completed_turns += 1;
                if completed_turns >= cli.turns && !stop_requested {
                    stop_requested = true;
                    engine.stop(!cli.no_summary).await;
                }
            }
            DebateEvent::ErrorRecord { message, .. } => {
                println!();
                println!("{} {}", "Error:".red().bold(), message.red());
            }
            DebateEvent::PlaybackFailed { message } => {
                eprintln!("{} {}", "Audio:".yellow(), message.yellow());
            }
            DebateEvent::SummaryStarted { .. } => {
                println!("{}", "─".repeat(70).dimmed());
                println!("{}", "  Summary".bright_magenta().bold());
                println!("{}", "─".repeat(70).dimmed());
            }
            DebateEvent::SummaryReady { text, .. } => {
                for line in textwrap(&text, 66).lines() {
                    println!("  {}", line);
                }
                println!();
            }
            DebateEvent::SummaryFailed { message, .. } => {
                println!("  {}", format!("Summary unavailable: {message}").red());
            }
            DebateEvent::DebateStopped => break,
            DebateEvent::DebateStarted { .. } | DebateEvent::SpeakerStateChanged { .. } => {}
        }
    }

    if let Some(path) = &cli.transcript {
        let json = serde_json::to_string_pretty(&engine.transcript())?;
        std::fs::write(path, json)?;
        println!("{} {}", "Transcript written to".dimmed(), path.dimmed());
    }

    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Debate concluded.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    Ok(())
}

fn print_header(topic: &str, personas: &[Persona], model: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  {}", "Podium".bold()).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), topic.bright_white());
    println!();
    println!("{}", "Debaters:".bold());
    for (i, p) in personas.iter().enumerate() {
        println!(
            "  {}. {} ({}) - using {}",
            i + 1,
            p.name.bright_cyan(),
            p.voice.yellow(),
            model.dimmed()
        );
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
    println!();
}

fn print_roster(roster: &[Persona]) {
    println!("{}", "Available personas:".bold());
    for p in roster {
        println!(
            "  {} ({}) - {}",
            p.id.bright_cyan(),
            p.voice.yellow(),
            p.description.dimmed()
        );
    }
}

/// Speak one sample line in a persona's voice through its own playback slot.
async fn preview_voice(roster: &[Persona], key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let persona = find_persona(roster, key).ok_or_else(|| {
        format!(
            "Unknown persona: '{}'. Run with --list-personas to see the roster.",
            key
        )
    })?;

    let speech = Arc::new(KokoroSpeech::new().await?);
    let sink = Arc::new(podium_core::WavWriterSink::new(".", true));
    let sequencer = PlaybackSequencer::new(speech, sink);

    let sample = format!("Hello, I'm {}. {}", persona.name, persona.description);
    println!("{} {}", "Previewing".bold(), persona.name.bright_cyan());
    match sequencer.speak(&sample, &persona.voice).await {
        SpeakOutcome::Completed => Ok(()),
        SpeakOutcome::Superseded => Ok(()),
        SpeakOutcome::Failed(message) => Err(message.into()),
    }
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
