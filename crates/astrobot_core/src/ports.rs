//! crates/astrobot_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the session's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of the concrete downstream services (identity
//! resolution, AI completion, astrology computation, persistence).

use async_trait::async_trait;

use crate::domain::{BirthContext, BirthDetails, Language, TrialRecord, WaitlistAck};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services
/// (network stack, storage, AI client).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The downstream replied non-success and provided a usable error string.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// The request exceeded its time budget or was cancelled mid-flight.
    #[error("request timed out")]
    Timeout,
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("an unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Key/value persistence for trial records.
///
/// A value that exists but cannot be read or parsed is an `Err`, not a
/// panic and not `None`; the caller's fallback chain depends on the
/// distinction between "absent" and "unreadable".
#[async_trait]
pub trait TrialStore: Send + Sync {
    async fn load(&self, key: &str) -> PortResult<Option<TrialRecord>>;
    async fn save(&self, key: &str, record: &TrialRecord) -> PortResult<()>;
}

/// Resolves the caller's public IP, which keys the trial record.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_ip(&self) -> PortResult<String>;
}

/// One-shot AI chat completion for general astrology questions.
/// The implementation fixes the system prompt per language; the user text
/// is the sole conversation turn.
#[async_trait]
pub trait AiChatService: Send + Sync {
    async fn complete(&self, lang: Language, user_text: &str) -> PortResult<String>;
}

/// Computes birth/nakshatra data from a birth context.
#[async_trait]
pub trait BirthDetailsService: Send + Sync {
    async fn birth_details(&self, ctx: &BirthContext) -> PortResult<BirthDetails>;
}

/// Renders a rasi chart for a birth context. The result is raw
/// scalable-vector markup returned as text.
#[async_trait]
pub trait ChartRenderService: Send + Sync {
    async fn render_chart(&self, ctx: &BirthContext) -> PortResult<String>;
}

/// Fetches today's prediction for a zodiac sign.
#[async_trait]
pub trait DailyHoroscopeService: Send + Sync {
    async fn daily_prediction(&self, sign: &str, datetime: &str) -> PortResult<String>;
}

/// Enrolls an email on the waitlist once the trial has expired.
/// Duplicate enrollment is reported as success with `duplicate` set.
#[async_trait]
pub trait WaitlistService: Send + Sync {
    async fn join(&self, email: &str, language: Language, source: &str) -> PortResult<WaitlistAck>;
}
