//! services/api/src/web/session.rs
//!
//! The per-connection session controller. It exclusively owns the timeline
//! and the trial gate; flow tasks hand their results back through the
//! `finish_*` methods and the controller applies the mutation and emits the
//! protocol event. Nothing is mutated after shutdown (liveness token), and
//! every mutation is routed by the placeholder id the flow created.

use std::sync::Arc;

use astrobot_core::{
    domain::{BirthContext, BirthDetails, Card, DailyRasiState, Language, Message, MessageId},
    intent::{classify, Intent},
    ports::{PortError, PortResult},
    text,
    timeline::Timeline,
    trial::{load_trial, trial_storage_key, TickOutcome, TrialGate, TrialPhase, FALLBACK_TRIAL_KEY},
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::web::{
    flows,
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};

/// Source tag sent with waitlist signups from this surface.
const WAITLIST_SOURCE: &str = "chatbot-waitlist";

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

//=========================================================================================
// Per-Flow Cancellation Slots
//=========================================================================================

/// The orchestrator kinds, each owning one cancellation slot. Arming a flow
/// cancels only its own kind's predecessor, never an unrelated flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowKind {
    Birth,
    Chart,
    Daily,
    Query,
}

#[derive(Default)]
struct Slot {
    gen: u64,
    token: Option<CancellationToken>,
}

#[derive(Default)]
struct FlowSlots {
    birth: Slot,
    chart: Slot,
    daily: Slot,
    query: Slot,
}

impl FlowSlots {
    fn slot(&self, kind: FlowKind) -> &Slot {
        match kind {
            FlowKind::Birth => &self.birth,
            FlowKind::Chart => &self.chart,
            FlowKind::Daily => &self.daily,
            FlowKind::Query => &self.query,
        }
    }

    fn slot_mut(&mut self, kind: FlowKind) -> &mut Slot {
        match kind {
            FlowKind::Birth => &mut self.birth,
            FlowKind::Chart => &mut self.chart,
            FlowKind::Daily => &mut self.daily,
            FlowKind::Query => &mut self.query,
        }
    }

    /// Supersedes any in-flight flow of this kind and returns the new
    /// generation and token.
    fn arm(&mut self, kind: FlowKind) -> (u64, CancellationToken) {
        let slot = self.slot_mut(kind);
        if let Some(old) = slot.token.take() {
            old.cancel();
        }
        slot.gen += 1;
        let token = CancellationToken::new();
        slot.token = Some(token.clone());
        (slot.gen, token)
    }

    /// Whether `gen` still owns this kind's slot.
    fn is_current(&self, kind: FlowKind, gen: u64) -> bool {
        self.slot(kind).gen == gen
    }

    /// Drops the handle when the finishing flow still owns the slot.
    fn clear(&mut self, kind: FlowKind, gen: u64) {
        let slot = self.slot_mut(kind);
        if slot.gen == gen {
            slot.token = None;
        }
    }

    fn cancel_all(&mut self) {
        for kind in [FlowKind::Birth, FlowKind::Chart, FlowKind::Daily, FlowKind::Query] {
            if let Some(token) = self.slot_mut(kind).token.take() {
                token.cancel();
            }
        }
    }
}

//=========================================================================================
// The Session Controller
//=========================================================================================

struct SessionInner {
    timeline: Timeline,
    gate: TrialGate,
    lang: Language,
    /// Guards the general query path: one completion in flight at a time.
    is_sending: bool,
    /// Resolved caller IP, carried into the persisted trial record.
    ip: Option<String>,
    identity_key: String,
    slots: FlowSlots,
    /// Quick-intent shortcut already expanded this session, if any.
    processed_intent: Option<String>,
}

/// One chat session. Cheap to clone; flow tasks hold a clone and report back.
#[derive(Clone)]
pub struct SessionController {
    app: Arc<AppState>,
    inner: Arc<Mutex<SessionInner>>,
    updates: mpsc::UnboundedSender<ServerMessage>,
    alive: CancellationToken,
}

impl SessionController {
    /// Builds the session: resolves the caller identity, restores any
    /// persisted trial through the fallback ladder, and seeds the timeline
    /// with the welcome message.
    pub async fn connect(
        app: Arc<AppState>,
        lang: Language,
        updates: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let dev_override = app.config.trial_dev_override;
        let mut gate = TrialGate::new(dev_override);
        let mut ip = None;
        let mut identity_key = FALLBACK_TRIAL_KEY.to_string();

        if !dev_override {
            match app.identity.resolve_ip().await {
                Ok(resolved) => {
                    identity_key = trial_storage_key(Some(&resolved));
                    ip = Some(resolved);
                }
                Err(e) => {
                    warn!("Identity resolution failed, using fallback trial key: {e}");
                }
            }
            let record =
                load_trial(app.trial_store.as_ref(), &identity_key, FALLBACK_TRIAL_KEY).await;
            gate.restore(record, now_ms());
        }

        let controller = Self {
            app,
            inner: Arc::new(Mutex::new(SessionInner {
                timeline: Timeline::new(),
                gate,
                lang,
                is_sending: false,
                ip,
                identity_key,
                slots: FlowSlots::default(),
                processed_intent: None,
            })),
            updates,
            alive: CancellationToken::new(),
        };

        controller.emit(ServerMessage::SessionInitialized { lang });
        {
            let mut inner = controller.inner.lock().await;
            let welcome = Message::assistant(text::welcome(lang));
            inner.timeline.push(welcome.clone());
            controller.emit(ServerMessage::MessageAppended { message: welcome });

            // Surface a restored countdown or an already-spent trial.
            match inner.gate.phase() {
                TrialPhase::Running { .. } => {
                    if let Some(secs) = inner.gate.seconds_remaining(now_ms()) {
                        controller.emit(ServerMessage::TrialTick {
                            seconds_remaining: secs,
                        });
                    }
                }
                TrialPhase::Expired => {
                    controller.emit(ServerMessage::TrialTick {
                        seconds_remaining: 0,
                    });
                    controller.emit(ServerMessage::TrialExpired);
                }
                TrialPhase::NotStarted => {}
            }
        }
        controller
    }

    fn emit(&self, msg: ServerMessage) {
        // The receiver only drops at teardown; a failed send is harmless then.
        let _ = self.updates.send(msg);
    }

    /// Dispatches one client message. The returned handle (when a flow was
    /// spawned) exists so callers that need completion can await it.
    pub async fn handle(&self, msg: ClientMessage) -> Option<JoinHandle<()>> {
        match msg {
            ClientMessage::Init { .. } => {
                warn!("Received subsequent Init message, which is ignored.");
                None
            }
            ClientMessage::Submit { text } => self.submit(&text).await,
            ClientMessage::BirthSubmit { birth } => self.birth_submit(birth).await,
            ClientMessage::RasiChartSubmit { birth } => self.rasi_chart_submit(birth).await,
            ClientMessage::ChartAccept { message_id } => self.chart_accept(message_id).await,
            ClientMessage::ChartDecline { message_id } => {
                self.chart_decline(message_id).await;
                None
            }
            ClientMessage::DailySignPick { message_id, sign } => {
                self.daily_sign_pick(message_id, sign).await
            }
            ClientMessage::WaitlistJoin { email } => self.waitlist_join(email).await,
        }
    }

    /// Expands a quick-intent shortcut to its trigger phrase and submits it
    /// through the normal path, at most once per session.
    pub async fn quick_intent(&self, intent: &str) -> Option<JoinHandle<()>> {
        let lang = {
            let mut inner = self.inner.lock().await;
            if inner.processed_intent.as_deref() == Some(intent) {
                return None;
            }
            inner.processed_intent = Some(intent.to_string());
            inner.lang
        };
        let phrase = text::quick_intent_phrase(lang, intent)?;
        self.submit(phrase).await
    }

    /// A free-text submission: the head of the control flow described by the
    /// session design — gate check, user message, intent dispatch.
    pub async fn submit(&self, text: &str) -> Option<JoinHandle<()>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut inner = self.inner.lock().await;
        if !inner.gate.can_send() || inner.is_sending {
            return None;
        }

        let first_user_message = !inner.timeline.has_user_message();
        let user_msg = Message::user(trimmed);
        inner.timeline.push(user_msg.clone());
        self.emit(ServerMessage::MessageAppended { message: user_msg });

        if first_user_message {
            let ip = inner.ip.clone();
            if let Some(record) = inner.gate.start(now_ms(), ip) {
                info!("Trial timer started for {}", inner.identity_key);
                let key = inner.identity_key.clone();
                if let Err(e) = self.app.trial_store.save(&key, &record).await {
                    // Storage trouble never blocks the chat itself.
                    warn!("Failed to persist trial start: {e}");
                }
            }
        }

        match classify(trimmed) {
            Intent::DailyRasiCard => {
                self.append_card(&mut inner, Card::DailyRasi(DailyRasiState::Idle));
                None
            }
            Intent::BirthCard => {
                self.append_card(&mut inner, Card::Birth);
                None
            }
            Intent::RasiChartCard => {
                self.append_card(&mut inner, Card::RasiChart);
                None
            }
            Intent::OutOfDomainRefusal => {
                let refusal = Message::assistant(text::refusal(inner.lang));
                inner.timeline.push(refusal.clone());
                self.emit(ServerMessage::MessageAppended { message: refusal });
                None
            }
            Intent::GeneralQuery => {
                inner.is_sending = true;
                let placeholder = Message::typing_placeholder();
                inner.timeline.push(placeholder.clone());
                self.emit(ServerMessage::MessageAppended {
                    message: placeholder,
                });
                let (gen, token) = inner.slots.arm(FlowKind::Query);
                let lang = inner.lang;
                drop(inner);

                let ctrl = self.clone();
                let question = trimmed.to_string();
                Some(tokio::spawn(async move {
                    flows::run_general_query(ctrl, lang, question, token, gen).await;
                }))
            }
        }
    }

    fn append_card(&self, inner: &mut SessionInner, card: Card) {
        let msg = Message::assistant_card(card);
        inner.timeline.push(msg.clone());
        self.emit(ServerMessage::MessageAppended { message: msg });
    }

    /// Birth form submission: placeholder, then the birth computation flow.
    pub async fn birth_submit(&self, mut ctx: BirthContext) -> Option<JoinHandle<()>> {
        let mut inner = self.inner.lock().await;
        if !inner.gate.can_send() {
            return None;
        }
        if ctx.lang_override.is_none() {
            ctx.lang_override = Some(inner.lang);
        }

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id.clone();
        inner.timeline.push(placeholder.clone());
        self.emit(ServerMessage::MessageAppended {
            message: placeholder,
        });
        let (gen, token) = inner.slots.arm(FlowKind::Birth);
        drop(inner);

        let ctrl = self.clone();
        Some(tokio::spawn(async move {
            flows::run_birth_details(ctrl, placeholder_id, ctx, token, gen).await;
        }))
    }

    /// Chart-prompt acceptance: the prompt message itself becomes the
    /// placeholder, reusing the birth context it carried.
    pub async fn chart_accept(&self, message_id: MessageId) -> Option<JoinHandle<()>> {
        let mut inner = self.inner.lock().await;
        if !inner.gate.can_send() {
            return None;
        }
        let Some(mut ctx) = inner
            .timeline
            .get(&message_id)
            .and_then(|m| m.birth_context.clone())
        else {
            // No prompt with birth context under this id; nothing to do.
            return None;
        };
        if ctx.lang_override.is_none() {
            ctx.lang_override = Some(inner.lang);
        }

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id.clone();
        if !inner.timeline.replace(&message_id, placeholder.clone()) {
            return None;
        }
        self.emit(ServerMessage::MessageReplaced {
            id: message_id,
            message: placeholder,
        });
        let (gen, token) = inner.slots.arm(FlowKind::Chart);
        let lang = inner.lang;
        drop(inner);

        let ctrl = self.clone();
        Some(tokio::spawn(async move {
            flows::run_chart_render(ctrl, lang, placeholder_id, ctx, token, gen).await;
        }))
    }

    /// Direct chart path from the rasi-chart input card.
    pub async fn rasi_chart_submit(&self, mut ctx: BirthContext) -> Option<JoinHandle<()>> {
        let mut inner = self.inner.lock().await;
        if !inner.gate.can_send() {
            return None;
        }
        if ctx.lang_override.is_none() {
            ctx.lang_override = Some(inner.lang);
        }

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id.clone();
        inner.timeline.push(placeholder.clone());
        self.emit(ServerMessage::MessageAppended {
            message: placeholder,
        });
        let (gen, token) = inner.slots.arm(FlowKind::Chart);
        let lang = inner.lang;
        drop(inner);

        let ctrl = self.clone();
        Some(tokio::spawn(async move {
            flows::run_chart_render(ctrl, lang, placeholder_id, ctx, token, gen).await;
        }))
    }

    /// Chart-prompt rejection removes exactly the prompt message.
    pub async fn chart_decline(&self, message_id: MessageId) {
        let mut inner = self.inner.lock().await;
        if inner.timeline.remove(&message_id) {
            self.emit(ServerMessage::MessageRemoved { id: message_id });
        }
    }

    /// Sign pick inside a daily-rasi card: the card's own embedded state goes
    /// to `Loading` and the fetch is owned by the daily slot.
    pub async fn daily_sign_pick(
        &self,
        message_id: MessageId,
        sign: String,
    ) -> Option<JoinHandle<()>> {
        let mut inner = self.inner.lock().await;
        if !inner.gate.can_send() {
            return None;
        }
        let loading = DailyRasiState::Loading { sign: sign.clone() };
        let Some(updated) = inner.timeline.set_daily_state(&message_id, loading).cloned() else {
            return None;
        };
        self.emit(ServerMessage::MessageReplaced {
            id: message_id.clone(),
            message: updated,
        });
        let (gen, token) = inner.slots.arm(FlowKind::Daily);
        let lang = inner.lang;
        drop(inner);

        let ctrl = self.clone();
        let datetime = Utc::now().to_rfc3339();
        Some(tokio::spawn(async move {
            flows::run_daily_prediction(ctrl, lang, message_id, sign, datetime, token, gen).await;
        }))
    }

    /// Waitlist signup, offered once the trial is spent. Invalid addresses
    /// are rejected locally without a request.
    pub async fn waitlist_join(&self, email: String) -> Option<JoinHandle<()>> {
        let lang = self.inner.lock().await.lang;
        let normalized = email.trim().to_lowercase();
        if !EMAIL_REGEX.is_match(&normalized) {
            self.emit(ServerMessage::Error {
                message: text::waitlist_failure(lang).to_string(),
            });
            return None;
        }

        let ctrl = self.clone();
        Some(tokio::spawn(async move {
            let result = ctrl
                .app
                .waitlist
                .join(&normalized, lang, WAITLIST_SOURCE)
                .await;
            if ctrl.alive.is_cancelled() {
                return;
            }
            match result {
                Ok(ack) => ctrl.emit(ServerMessage::WaitlistAccepted {
                    duplicate: ack.duplicate,
                }),
                Err(e) => {
                    error!("Waitlist signup failed: {e}");
                    let message = match e {
                        PortError::Upstream(m) => m,
                        _ => text::waitlist_failure(lang).to_string(),
                    };
                    ctrl.emit(ServerMessage::Error { message });
                }
            }
        }))
    }

    /// One second of wall clock. Emits the countdown and, on the expiry
    /// transition, persists the stamped record and surfaces the waitlist.
    pub async fn tick(&self) {
        let mut inner = self.inner.lock().await;
        match inner.gate.tick(now_ms()) {
            TickOutcome::Idle => {}
            TickOutcome::Running { remaining_secs } => {
                self.emit(ServerMessage::TrialTick {
                    seconds_remaining: remaining_secs,
                });
            }
            TickOutcome::JustExpired => {
                info!("Trial expired for {}", inner.identity_key);
                self.emit(ServerMessage::TrialTick {
                    seconds_remaining: 0,
                });
                self.emit(ServerMessage::TrialExpired);
                if let Some(record) = inner.gate.record().cloned() {
                    let key = inner.identity_key.clone();
                    if let Err(e) = self.app.trial_store.save(&key, &record).await {
                        warn!("Failed to persist trial expiry: {e}");
                    }
                }
            }
        }
    }

    /// Tears the session down: no mutation may be applied afterwards.
    pub async fn shutdown(&self) {
        self.alive.cancel();
        self.inner.lock().await.slots.cancel_all();
    }

    //-------------------------------------------------------------------------
    // Flow completions. Each routes its mutation to the placeholder the flow
    // created, checks liveness first, and cedes its cancellation slot.
    //-------------------------------------------------------------------------

    pub(crate) async fn finish_general_query(&self, outcome: PortResult<String>, gen: u64) {
        if self.alive.is_cancelled() {
            return;
        }
        let mut inner = self.inner.lock().await;
        if !inner.slots.is_current(FlowKind::Query, gen) {
            return;
        }
        inner.slots.clear(FlowKind::Query, gen);
        inner.is_sending = false;
        let lang = inner.lang;

        if inner.timeline.remove(&MessageId::Typing) {
            self.emit(ServerMessage::MessageRemoved {
                id: MessageId::Typing,
            });
        }
        let reply = match outcome {
            Ok(content) => Message::assistant(content),
            Err(e) => {
                error!("General query failed: {e}");
                Message::assistant(text::ai_failure(lang))
            }
        };
        inner.timeline.push(reply.clone());
        self.emit(ServerMessage::MessageAppended { message: reply });
    }

    pub(crate) async fn finish_birth(
        &self,
        placeholder: MessageId,
        ctx: BirthContext,
        outcome: PortResult<BirthDetails>,
        gen: u64,
    ) {
        if self.alive.is_cancelled() {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.slots.clear(FlowKind::Birth, gen);
        let lang = ctx.lang_override.unwrap_or(inner.lang);

        match outcome {
            Ok(details) => {
                let mut summary = Message::assistant(text::birth_summary(lang, &details));
                summary.id = placeholder.clone();
                summary.birth_context = Some(ctx.clone());
                if inner.timeline.replace(&placeholder, summary.clone()) {
                    self.emit(ServerMessage::MessageReplaced {
                        id: placeholder,
                        message: summary,
                    });
                    // Chained step: offer the chart with the same context.
                    let prompt = Message::assistant_card(Card::ChartPrompt).with_birth_context(ctx);
                    inner.timeline.push(prompt.clone());
                    self.emit(ServerMessage::MessageAppended { message: prompt });
                }
            }
            Err(e) => {
                error!("Birth details flow failed: {e}");
                let detail = error_detail(lang, &e);
                let mut failure = Message::assistant(text::birth_failure(lang, &detail));
                failure.id = placeholder.clone();
                if inner.timeline.replace(&placeholder, failure.clone()) {
                    self.emit(ServerMessage::MessageReplaced {
                        id: placeholder,
                        message: failure,
                    });
                }
            }
        }
    }

    pub(crate) async fn finish_chart(
        &self,
        placeholder: MessageId,
        lang: Language,
        outcome: PortResult<String>,
        gen: u64,
    ) {
        if self.alive.is_cancelled() {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.slots.clear(FlowKind::Chart, gen);

        let replacement = match outcome {
            Ok(svg) => {
                let mut msg = Message::assistant_card(Card::ChartResult { svg });
                msg.id = placeholder.clone();
                msg
            }
            Err(e) => {
                error!("Chart render flow failed: {e}");
                let detail = error_detail(lang, &e);
                let mut msg = Message::assistant(text::chart_failure(lang, &detail));
                msg.id = placeholder.clone();
                msg
            }
        };
        if inner.timeline.replace(&placeholder, replacement.clone()) {
            self.emit(ServerMessage::MessageReplaced {
                id: placeholder,
                message: replacement,
            });
        }
    }

    pub(crate) async fn finish_daily(
        &self,
        card_id: MessageId,
        lang: Language,
        sign: String,
        outcome: PortResult<String>,
        gen: u64,
    ) {
        if self.alive.is_cancelled() {
            return;
        }
        let mut inner = self.inner.lock().await;
        // A newer pick owns the card's embedded state; a superseded fetch
        // applies nothing.
        if !inner.slots.is_current(FlowKind::Daily, gen) {
            return;
        }
        inner.slots.clear(FlowKind::Daily, gen);

        let state = match outcome {
            Ok(prediction) => DailyRasiState::Ready { sign, prediction },
            Err(e) => {
                error!("Daily prediction flow failed: {e}");
                let error = error_detail(lang, &e);
                DailyRasiState::Failed { sign, error }
            }
        };
        if let Some(updated) = inner.timeline.set_daily_state(&card_id, state).cloned() {
            self.emit(ServerMessage::MessageReplaced {
                id: card_id,
                message: updated,
            });
        }
    }

    //-------------------------------------------------------------------------
    // Introspection (used by the handler and by integration tests)
    //-------------------------------------------------------------------------

    pub async fn timeline_snapshot(&self) -> Vec<Message> {
        self.inner.lock().await.timeline.messages().to_vec()
    }

    pub async fn seconds_remaining(&self) -> Option<u32> {
        self.inner.lock().await.gate.seconds_remaining(now_ms())
    }

    pub async fn is_blocked(&self) -> bool {
        !self.inner.lock().await.gate.can_send()
    }

    pub(crate) fn app(&self) -> &AppState {
        &self.app
    }
}

/// What a failure message carries: the upstream-provided error string when
/// one exists, the generic localized word otherwise.
fn error_detail(lang: Language, e: &PortError) -> String {
    match e {
        PortError::Upstream(m) => m.clone(),
        _ => text::generic_error(lang).to_string(),
    }
}
