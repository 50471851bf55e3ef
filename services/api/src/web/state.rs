//! services/api/src/web/state.rs
//!
//! Defines the application's shared state: the configuration plus one handle
//! per downstream service port. Created once at startup and shared by every
//! connection; all per-session state lives in the `SessionController`.

use crate::config::Config;
use astrobot_core::ports::{
    AiChatService, BirthDetailsService, ChartRenderService, DailyHoroscopeService,
    IdentityResolver, TrialStore, WaitlistService,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub trial_store: Arc<dyn TrialStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub ai: Arc<dyn AiChatService>,
    pub birth: Arc<dyn BirthDetailsService>,
    pub chart: Arc<dyn ChartRenderService>,
    pub daily: Arc<dyn DailyHoroscopeService>,
    pub waitlist: Arc<dyn WaitlistService>,
}
