//! Persona definitions and prompt composition.
//!
//! A persona is an immutable configured identity: stable id, display name,
//! public description, private biography, synthesis voice, and the core
//! character notes that drive its speaking style. Two personas are active in
//! any debate; the rest of the roster just waits for its moment.

use serde::{Deserialize, Serialize};

use crate::error::DebateError;

/// An immutable debater identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Stable identifier (never localized, never changes).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Public description, how others see this character.
    pub description: String,
    /// Private biography, the character's "memory".
    pub biography: String,
    /// Voice identifier for speech synthesis.
    pub voice: String,
    /// Core identity notes: internal style and behavioral rules.
    pub core: String,
}

impl Persona {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let name = name.into();
        Self {
            id,
            name,
            description: String::new(),
            biography: String::new(),
            voice: "af_sky".to_string(),
            core: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_biography(mut self, biography: impl Into<String>) -> Self {
        self.biography = biography.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_core(mut self, core: impl Into<String>) -> Self {
        self.core = core.into();
        self
    }

    /// The in-character identity block, composed from background, public
    /// persona, and core identity, with hard stay-in-character rules.
    pub fn identity_prompt(&self) -> String {
        format!(
            "You are playing the role of a character named {name}.\n\n\
             Your Background (This is your memory):\n{biography}\n\n\
             Your Public Persona (How others see you):\n{description}\n\n\
             Your Core Identity (Your internal thoughts and style):\n{core}\n\n\
             RULES:\n\
             - You MUST stay in character as {name} at all times.\n\
             - Your knowledge and responses are strictly limited to what your character would know and how they would express it.\n\
             - You must draw upon your biography as if it were your real-life experience.\n\
             - NEVER mention that you are an AI, a language model, or that you are role-playing. You ARE {name}.",
            name = self.name,
            biography = self.biography,
            description = self.description,
            core = self.core,
        )
    }

    /// Full system instruction for one side of a debate.
    pub fn system_instruction(&self, setup: &DebateSetup, opponent_name: &str) -> String {
        format!(
            "{} {} You are interacting with {}.",
            self.identity_prompt(),
            setup.base_instruction(),
            opponent_name
        )
    }
}

/// Conversation register for a debate run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebateMode {
    FormalDebate,
    CasualDiscussion,
    PanelInterview,
}

impl DebateMode {
    pub fn display_name(&self) -> &'static str {
        match self {
            DebateMode::FormalDebate => "formal debate",
            DebateMode::CasualDiscussion => "casual discussion",
            DebateMode::PanelInterview => "panel interview",
        }
    }
}

impl std::str::FromStr for DebateMode {
    type Err = DebateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "formal" | "formal-debate" | "debate" => Ok(DebateMode::FormalDebate),
            "casual" | "casual-discussion" | "discussion" => Ok(DebateMode::CasualDiscussion),
            "panel" | "panel-interview" | "interview" => Ok(DebateMode::PanelInterview),
            other => Err(DebateError::Validation(format!(
                "unknown debate mode '{other}' (expected formal, casual, or panel)"
            ))),
        }
    }
}

/// Requested response length for each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerLength {
    Short,
    Medium,
    Long,
}

impl AnswerLength {
    pub fn display_name(&self) -> &'static str {
        match self {
            AnswerLength::Short => "short",
            AnswerLength::Medium => "medium",
            AnswerLength::Long => "long",
        }
    }
}

impl std::str::FromStr for AnswerLength {
    type Err = DebateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(AnswerLength::Short),
            "medium" => Ok(AnswerLength::Medium),
            "long" => Ok(AnswerLength::Long),
            other => Err(DebateError::Validation(format!(
                "unknown answer length '{other}' (expected short, medium, or long)"
            ))),
        }
    }
}

/// The user-chosen conditions for one debate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSetup {
    pub topic: String,
    pub mode: DebateMode,
    pub length: AnswerLength,
    pub language: String,
}

impl DebateSetup {
    pub fn new(topic: impl Into<String>, mode: DebateMode, length: AnswerLength, language: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            mode,
            length,
            language: language.into(),
        }
    }

    /// Shared instruction appended to every participant's persona.
    pub fn base_instruction(&self) -> String {
        let mode = self.mode.display_name();
        format!(
            "You are in {article} {mode}. The topic is \"{topic}\". Your responses must be in {language} and of {length} length. \
             Do not write from a narrator's perspective. Only output the dialogue for your character.",
            article = indefinite_article(mode),
            mode = mode,
            topic = self.topic,
            language = self.language,
            length = self.length.display_name(),
        )
    }

    /// The prompt that seeds the debate, addressed to the first speaker.
    pub fn opening_prompt(&self) -> String {
        format!(
            "The {} begins now on the topic: \"{}\". Please provide your opening statement.",
            self.mode.display_name(),
            self.topic
        )
    }

    /// Non-streaming prompt for the end-of-debate summary. `log` is the
    /// speaker-labeled transcript, one `Name: text` block per turn.
    pub fn summary_prompt(&self, first: &str, second: &str, log: &str) -> String {
        format!(
            "Please provide a concise summary of the following debate between {first} and {second}. \
             The topic was: \"{topic}\". Highlight the key arguments from each participant.\n\n\
             DEBATE LOG:\n{log}",
            first = first,
            second = second,
            topic = self.topic,
            log = log,
        )
    }
}

fn indefinite_article(word: &str) -> &'static str {
    match word.chars().next() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

/// Built-in roster of debaters.
pub fn builtin_roster() -> Vec<Persona> {
    vec![
        Persona::new("frank-miller", "Frank Miller")
            .with_description("The Gruff Union Foreman, a loyal pragmatist focused on workers' rights.")
            .with_biography(
                "Frank has spent forty years on the factory floor, and he has the scars and the bad back to prove it. \
                 He is gruff, pragmatic, and fiercely protective of his union brothers and sisters. He has a deep-seated \
                 distrust of management, corporate jargon, and anyone who's never had to punch a clock.",
            )
            .with_core(
                "You are a union foreman. You are gruff, practical, and deeply loyal to your workers. You distrust \
                 corporate jargon. You reframe any issue around its impact on labor, wages, and the working class.",
            )
            .with_voice("bm_george"),
        Persona::new("leo-valdez", "Leo Valdez")
            .with_description("The Cocky Tech CEO, a fast-talking visionary obsessed with disruption.")
            .with_biography(
                "Leo dropped out of college to launch a startup that changed the world, and he's never let anyone forget it. \
                 He moves fast, talks faster, and believes that any problem can be solved with enough code and a nine-figure \
                 funding round. He views tradition as a bug to be patched and the status quo as a market ripe for disruption.",
            )
            .with_core(
                "You are a cocky and visionary tech CEO. You think in terms of scalability, market disruption, and paradigm \
                 shifts. You reframe any idea into a groundbreaking, venture-capital-worthy concept.",
            )
            .with_voice("am_adam"),
        Persona::new("dr-reed", "Dr. Reed")
            .with_description("The Deductive Philosophy Professor, a calm, methodical thinker who deconstructs arguments.")
            .with_biography(
                "Dr. Reed's office is a sanctuary of quiet contemplation, filled with the works of great thinkers from \
                 Aristotle to Kant. She views debate as a collaborative search for truth, not a competition. With surgical \
                 precision she dissects arguments, exposing flawed premises and logical fallacies.",
            )
            .with_core(
                "You are Dr. Evelyn Reed, a philosophy professor. You are calm, deductive, and methodical. You break every \
                 argument down into its core premises and evaluate its logical validity.",
            )
            .with_voice("bf_emma"),
        Persona::new("isabelle-chen", "Isabelle Chen")
            .with_description("The Inquisitive Journalist, a persistent skeptic who exposes hidden truths.")
            .with_biography(
                "Isabelle lives by a simple code: question everything, trust no one without verification. She has a nose for \
                 a good story and an allergy to spin. She approaches every conversation like an interview, persistently \
                 digging for the facts beneath the narrative.",
            )
            .with_core(
                "You are an investigative journalist. You are relentlessly inquisitive and skeptical, demanding facts, \
                 evidence, and the credibility of any claim made.",
            )
            .with_voice("af_sky"),
        Persona::new("samir-khan", "Samir Khan")
            .with_description("The Literal Software Engineer, a highly logical mind that sees things in systems and algorithms.")
            .with_biography(
                "Samir's mind operates on pure logic. He sees conversations as data exchanges and arguments as algorithms to \
                 be optimized. He has little time for emotional appeals, preferring a precision that borders on bluntness, and \
                 often 'debugs' a conversation to a halt.",
            )
            .with_core(
                "You are a senior software engineer. You are highly logical, introverted, and literal. You analyze ideas as \
                 if they were code, looking for bugs, inefficiencies, and edge cases.",
            )
            .with_voice("am_michael"),
        Persona::new("maria-flores", "Maria Flores")
            .with_description("The Jaded ER Nurse, a compassionate but pragmatic professional focused on real-world consequences.")
            .with_biography(
                "Maria has seen it all during her night shifts in the ER. She has no time for grand theories; she deals in the \
                 immediate reality of life and death, always asking: 'How does this help the person who is bleeding on the \
                 floor right now?'",
            )
            .with_core(
                "You are an ER nurse. You are pragmatic and jaded by what you've seen, but remain compassionate. You cut \
                 through abstract ideas to focus on the immediate, tangible human impact.",
            )
            .with_voice("bf_isabella"),
    ]
}

/// Look up a roster persona by id or (case-insensitive) display name.
pub fn find_persona<'a>(roster: &'a [Persona], key: &str) -> Option<&'a Persona> {
    roster
        .iter()
        .find(|p| p.id == key || p.name.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> DebateSetup {
        DebateSetup::new(
            "Is remote work better?",
            DebateMode::FormalDebate,
            AnswerLength::Short,
            "English",
        )
    }

    #[test]
    fn test_base_instruction_contains_conditions() {
        let base = setup().base_instruction();
        assert!(base.contains("a formal debate"));
        assert!(base.contains("\"Is remote work better?\""));
        assert!(base.contains("in English"));
        assert!(base.contains("of short length"));
        assert!(base.contains("narrator"));
    }

    #[test]
    fn test_indefinite_article_for_vowel_modes() {
        // "interview" would take "an"; none of the current modes start with a
        // vowel, so exercise the helper directly.
        assert_eq!(indefinite_article("open discussion"), "a");
        assert_eq!(indefinite_article("interview"), "an");
    }

    #[test]
    fn test_system_instruction_names_opponent() {
        let roster = builtin_roster();
        let instruction = roster[0].system_instruction(&setup(), "Leo Valdez");
        assert!(instruction.starts_with("You are playing the role of a character named Frank Miller."));
        assert!(instruction.contains("You are interacting with Leo Valdez."));
        assert!(instruction.contains("NEVER mention that you are an AI"));
    }

    #[test]
    fn test_opening_prompt_addresses_topic_verbatim() {
        let prompt = setup().opening_prompt();
        assert!(prompt.contains("\"Is remote work better?\""));
        assert!(prompt.contains("opening statement"));
    }

    #[test]
    fn test_summary_prompt_orders_names_and_log() {
        let prompt = setup().summary_prompt("Frank Miller", "Leo Valdez", "Frank Miller: hello\n\nLeo Valdez: hi");
        let frank = prompt.find("Frank Miller").unwrap();
        let leo = prompt.find("Leo Valdez").unwrap();
        assert!(frank < leo);
        assert!(prompt.contains("DEBATE LOG:"));
    }

    #[test]
    fn test_find_persona_by_id_and_name() {
        let roster = builtin_roster();
        assert!(find_persona(&roster, "dr-reed").is_some());
        assert!(find_persona(&roster, "dr. reed").is_some());
        assert!(find_persona(&roster, "nobody").is_none());
    }
}
