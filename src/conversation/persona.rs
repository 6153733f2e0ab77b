//! Builtin persona catalog and welcome messages

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Id of the persona whose celebrity identity is revealed progressively.
pub const MYSTERY_PERSONA_ID: &str = "mystery";

/// A named conversational role the agent adopts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub icon: String,
}

impl Persona {
    pub fn new(id: impl Into<String>, name: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: icon.into(),
        }
    }

    pub fn is_mystery(&self) -> bool {
        self.id == MYSTERY_PERSONA_ID
    }
}

/// All builtin personas.
pub fn all() -> Vec<Persona> {
    vec![
        Persona::new("therapist", "Therapist", "🛋️"),
        Persona::new("tutor", "Language Tutor", "📚"),
        Persona::new("chef", "Master Chef", "👨‍🍳"),
        Persona::new("trainer", "Fitness Trainer", "💪"),
        Persona::new(MYSTERY_PERSONA_ID, "Mystery Celebrity", "🎭"),
    ]
}

/// Look up a builtin persona by id.
pub fn find(persona_id: &str) -> Option<Persona> {
    all().into_iter().find(|p| p.id == persona_id)
}

fn welcome_text(persona_id: &str) -> &'static str {
    match persona_id {
        "therapist" => {
            "You are talking with a professional therapist. Feel free to share your thoughts and feelings in a safe, confidential space."
        }
        "tutor" => {
            "You are talking with a language tutor. Feel free to practice and ask any questions about language learning."
        }
        "chef" => {
            "You are talking with a master chef. Feel free to ask about recipes, cooking techniques, and culinary tips."
        }
        "trainer" => {
            "You are talking with a fitness trainer. Feel free to ask about workouts, nutrition, and achieving your fitness goals."
        }
        MYSTERY_PERSONA_ID => {
            "You are talking with a well-known celebrity! They'll share authentic stories and experiences, but won't reveal their identity directly. Try to guess who they are through your conversation!"
        }
        _ => "Welcome to the chat!",
    }
}

/// Welcome message content for a persona.
///
/// The text is JSON-wrapped as `{"content": ...}` rather than stored raw.
/// This matches the persisted format readers already parse; only the initial
/// welcome message is wrapped this way, regular turns carry plain text.
pub fn welcome_content(persona_id: &str) -> String {
    json!({ "content": welcome_text(persona_id) }).to_string()
}

/// Unwrap a JSON-wrapped welcome payload. Returns `None` for plain content.
pub fn unwrap_welcome(content: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    value.get("content")?.as_str().map(|s| s.to_string())
}
