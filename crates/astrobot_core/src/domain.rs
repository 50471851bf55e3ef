//! crates/astrobot_core/src/domain.rs
//!
//! Defines the pure, core data structures for the chat session.
//! These structs are independent of any transport or persistence format
//! beyond the serde shapes the protocol and trial store share.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The languages the session can speak. Every user-facing string is
/// resolved through this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ta,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ta => "ta",
        }
    }
}

/// Who authored a timeline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Identifier of a timeline message.
///
/// `Typing` is the reserved literal `"typing"`: it marks the single
/// in-flight placeholder of the general query path. At most one message
/// with this id exists in a timeline at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MessageId {
    Typing,
    Unique(Uuid),
}

impl MessageId {
    /// A fresh unique id.
    pub fn new() -> Self {
        MessageId::Unique(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        MessageId::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Typing => f.write_str("typing"),
            MessageId::Unique(id) => write!(f, "{id}"),
        }
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> String {
        id.to_string()
    }
}

impl TryFrom<String> for MessageId {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "typing" {
            Ok(MessageId::Typing)
        } else {
            Uuid::parse_str(&value).map(MessageId::Unique)
        }
    }
}

/// The astronomical reference-point convention used for birth computations.
/// The wire format is the numeric code the computation service expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Ayanamsa {
    Lahiri,
    Raman,
    KrishnamurtiPaddhati,
}

impl Ayanamsa {
    pub fn code(&self) -> u8 {
        match self {
            Ayanamsa::Lahiri => 1,
            Ayanamsa::Raman => 3,
            Ayanamsa::KrishnamurtiPaddhati => 5,
        }
    }
}

impl From<Ayanamsa> for u8 {
    fn from(a: Ayanamsa) -> u8 {
        a.code()
    }
}

impl TryFrom<u8> for Ayanamsa {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Ayanamsa::Lahiri),
            3 => Ok(Ayanamsa::Raman),
            5 => Ok(Ayanamsa::KrishnamurtiPaddhati),
            other => Err(format!("unsupported ayanamsa code {other}")),
        }
    }
}

/// The tuple needed to compute astrological data for a person, carried
/// forward on messages so a later chart request need not re-collect input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthContext {
    pub datetime: String,
    pub coordinates: String,
    pub ayanamsa: Ayanamsa,
    /// Per-card language override; falls back to the session language.
    #[serde(rename = "la", skip_serializing_if = "Option::is_none", default)]
    pub lang_override: Option<Language>,
}

/// Fetch lifecycle of a daily-rasi card, embedded in the message that
/// rendered the card so each card tracks its own request independently
/// of the session-wide send state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DailyRasiState {
    Idle,
    Loading { sign: String },
    Ready { sign: String, prediction: String },
    Failed { sign: String, error: String },
}

impl DailyRasiState {
    pub fn sign(&self) -> Option<&str> {
        match self {
            DailyRasiState::Idle => None,
            DailyRasiState::Loading { sign }
            | DailyRasiState::Ready { sign, .. }
            | DailyRasiState::Failed { sign, .. } => Some(sign),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, DailyRasiState::Loading { .. })
    }
}

/// Rich rendering attached to a message instead of (or alongside) plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Card {
    /// Birth-details input form.
    Birth,
    /// "Shall I draw your chart?" prompt; uses the message's birth context.
    ChartPrompt,
    /// Rendered chart image (scalable-vector markup as text).
    ChartResult { svg: String },
    /// Daily prediction picker with its own fetch lifecycle.
    DailyRasi(DailyRasiState),
    /// Rasi-chart input form (direct chart path, no prior birth lookup).
    RasiChart,
}

/// One timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Marks an in-flight placeholder awaiting replacement.
    #[serde(default)]
    pub typing: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub card: Option<Card>,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub birth_context: Option<BirthContext>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            typing: false,
            card: None,
            ts: Utc::now(),
            birth_context: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: content.into(),
            typing: false,
            card: None,
            ts: Utc::now(),
            birth_context: None,
        }
    }

    pub fn assistant_card(card: Card) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            typing: false,
            card: Some(card),
            ts: Utc::now(),
            birth_context: None,
        }
    }

    /// A pending placeholder with its own unique id (card flows).
    pub fn placeholder() -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            typing: true,
            card: None,
            ts: Utc::now(),
            birth_context: None,
        }
    }

    /// The reserved single placeholder of the general query path.
    pub fn typing_placeholder() -> Self {
        Self {
            id: MessageId::Typing,
            role: Role::Assistant,
            content: String::new(),
            typing: true,
            card: None,
            ts: Utc::now(),
            birth_context: None,
        }
    }

    pub fn with_birth_context(mut self, ctx: BirthContext) -> Self {
        self.birth_context = Some(ctx);
        self
    }
}

/// The trial record persisted per caller identity.
///
/// The serialized field names are the persisted key/value layout; changing
/// them orphans every record already written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRecord {
    /// Epoch milliseconds when the trial timer first started.
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub expired: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expired_at: Option<i64>,
}

/// A name-bearing component of a birth-details response (rasi, zodiac).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedBody {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nakshatra {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pada: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NakshatraExtras {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ganam: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub animal_sign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub syllables: Option<String>,
}

/// Structured birth/nakshatra computation result. Every field is optional;
/// the summary renders only what is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BirthDetails {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nakshatra: Option<Nakshatra>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chandra_rasi: Option<NamedBody>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub soorya_rasi: Option<NamedBody>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub zodiac: Option<NamedBody>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub additional_info: Option<NakshatraExtras>,
}

/// Acknowledgement of a waitlist signup. `duplicate` is set when the email
/// was already enrolled and the signup was treated as a success anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistAck {
    #[serde(default)]
    pub duplicate: bool,
}
