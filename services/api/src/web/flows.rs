//! services/api/src/web/flows.rs
//!
//! The asynchronous "worker" functions behind the interactive flows. Every
//! flow has the same shape: issue one cancellable, time-bounded request, then
//! hand the outcome back to the controller, which owns the timeline mutation.

use std::future::Future;
use std::time::Duration;

use astrobot_core::{
    domain::{BirthContext, Language, MessageId},
    ports::{PortError, PortResult},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::web::session::SessionController;

/// Time budget for one flow request.
pub(crate) const FLOW_TIMEOUT: Duration = Duration::from_secs(20);

/// Runs a request under the flow's cancellation token and time budget.
/// Cancellation and timeout collapse into the same failure; the caller
/// renders both as the standard localized error.
async fn bounded<T, F>(token: &CancellationToken, request: F) -> PortResult<T>
where
    F: Future<Output = PortResult<T>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(PortError::Timeout),
        result = tokio::time::timeout(FLOW_TIMEOUT, request) => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(PortError::Timeout),
        },
    }
}

/// General astrology question through the AI completion service.
pub(crate) async fn run_general_query(
    ctrl: SessionController,
    lang: Language,
    question: String,
    token: CancellationToken,
    gen: u64,
) {
    info!("General query flow started.");
    let outcome = bounded(&token, ctrl.app().ai.complete(lang, &question)).await;
    ctrl.finish_general_query(outcome, gen).await;
}

/// Birth/nakshatra computation; on success the controller chains the
/// chart prompt.
pub(crate) async fn run_birth_details(
    ctrl: SessionController,
    placeholder: MessageId,
    ctx: BirthContext,
    token: CancellationToken,
    gen: u64,
) {
    info!("Birth details flow started.");
    let outcome = bounded(&token, ctrl.app().birth.birth_details(&ctx)).await;
    ctrl.finish_birth(placeholder, ctx, outcome, gen).await;
}

/// Chart image render, from an accepted prompt or the direct chart card.
pub(crate) async fn run_chart_render(
    ctrl: SessionController,
    lang: Language,
    placeholder: MessageId,
    ctx: BirthContext,
    token: CancellationToken,
    gen: u64,
) {
    info!("Chart render flow started.");
    let outcome = bounded(&token, ctrl.app().chart.render_chart(&ctx)).await;
    ctrl.finish_chart(placeholder, lang, outcome, gen).await;
}

/// Today's prediction for a picked sign; mutates the card's embedded state.
pub(crate) async fn run_daily_prediction(
    ctrl: SessionController,
    lang: Language,
    card_id: MessageId,
    sign: String,
    datetime: String,
    token: CancellationToken,
    gen: u64,
) {
    info!("Daily prediction flow started for sign '{sign}'.");
    let outcome = bounded(&token, ctrl.app().daily.daily_prediction(&sign, &datetime)).await;
    ctrl.finish_daily(card_id, lang, sign, outcome, gen).await;
}
