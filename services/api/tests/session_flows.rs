//! services/api/tests/session_flows.rs
//!
//! End-to-end scenarios for the session controller, driven against stub
//! implementations of the downstream service ports. The WebSocket layer is
//! not involved; the controller is exercised directly the way the handler
//! drives it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use api_lib::config::Config;
use api_lib::web::protocol::ServerMessage;
use api_lib::web::state::AppState;
use api_lib::web::SessionController;
use astrobot_core::domain::{
    Ayanamsa, BirthContext, BirthDetails, Card, DailyRasiState, Language, MessageId, Nakshatra,
    NamedBody, Role, TrialRecord, WaitlistAck,
};
use astrobot_core::ports::{
    AiChatService, BirthDetailsService, ChartRenderService, DailyHoroscopeService,
    IdentityResolver, PortError, PortResult, TrialStore, WaitlistService,
};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;

//=========================================================================================
// Stub Ports
//=========================================================================================

#[derive(Default)]
struct StubStore {
    records: Mutex<HashMap<String, TrialRecord>>,
    fail_keys: Vec<String>,
    saves: AtomicUsize,
}

#[async_trait]
impl TrialStore for StubStore {
    async fn load(&self, key: &str) -> PortResult<Option<TrialRecord>> {
        if self.fail_keys.iter().any(|k| k == key) {
            return Err(PortError::Unexpected("corrupted record".into()));
        }
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    async fn save(&self, key: &str, record: &TrialRecord) -> PortResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .insert(key.to_string(), record.clone());
        Ok(())
    }
}

struct StubIdentity {
    ip: Option<String>,
}

#[async_trait]
impl IdentityResolver for StubIdentity {
    async fn resolve_ip(&self) -> PortResult<String> {
        self.ip
            .clone()
            .ok_or_else(|| PortError::Unexpected("identity service down".into()))
    }
}

#[derive(Default)]
struct StubAi {
    calls: AtomicUsize,
    /// When set, the completion waits for a notification before answering,
    /// letting tests observe the in-flight placeholder.
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl AiChatService for StubAi {
    async fn complete(&self, _lang: Language, _user_text: &str) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok("Jupiter favors patience today.".to_string())
    }
}

#[derive(Default)]
struct StubBirth {
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl BirthDetailsService for StubBirth {
    async fn birth_details(&self, _ctx: &BirthContext) -> PortResult<BirthDetails> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(BirthDetails {
            nakshatra: Some(Nakshatra {
                name: "Bharani".into(),
                pada: Some(2),
            }),
            chandra_rasi: Some(NamedBody {
                name: "Mesha".into(),
            }),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct StubChart;

#[async_trait]
impl ChartRenderService for StubChart {
    async fn render_chart(&self, _ctx: &BirthContext) -> PortResult<String> {
        Ok("<svg viewBox=\"0 0 10 10\"/>".to_string())
    }
}

#[derive(Default)]
struct StubDaily {
    fail: bool,
}

#[async_trait]
impl DailyHoroscopeService for StubDaily {
    async fn daily_prediction(&self, sign: &str, _datetime: &str) -> PortResult<String> {
        if self.fail {
            return Err(PortError::Upstream("Failed (502)".into()));
        }
        Ok(format!("A calm day ahead for {sign}."))
    }
}

#[derive(Default)]
struct StubWaitlist {
    calls: AtomicUsize,
    duplicate: bool,
}

#[async_trait]
impl WaitlistService for StubWaitlist {
    async fn join(
        &self,
        _email: &str,
        _language: Language,
        _source: &str,
    ) -> PortResult<WaitlistAck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(WaitlistAck {
            duplicate: self.duplicate,
        })
    }
}

//=========================================================================================
// Harness
//=========================================================================================

struct Stubs {
    store: Arc<StubStore>,
    identity: Arc<StubIdentity>,
    ai: Arc<StubAi>,
    birth: Arc<StubBirth>,
    chart: Arc<StubChart>,
    daily: Arc<StubDaily>,
    waitlist: Arc<StubWaitlist>,
}

impl Default for Stubs {
    fn default() -> Self {
        Self {
            store: Arc::new(StubStore::default()),
            identity: Arc::new(StubIdentity {
                ip: Some("203.0.113.9".into()),
            }),
            ai: Arc::new(StubAi::default()),
            birth: Arc::new(StubBirth::default()),
            chart: Arc::new(StubChart),
            daily: Arc::new(StubDaily::default()),
            waitlist: Arc::new(StubWaitlist::default()),
        }
    }
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        database_url: "sqlite::memory:".into(),
        log_level: tracing::Level::INFO,
        openai_api_key: None,
        chat_model: "gpt-4o-mini".into(),
        identity_url: "http://identity.invalid".into(),
        astrology_base_url: "http://astrology.invalid".into(),
        astrology_client_id: None,
        astrology_client_secret: None,
        waitlist_url: None,
        trial_dev_override: false,
    }
}

async fn session(stubs: &Stubs) -> (SessionController, UnboundedReceiver<ServerMessage>) {
    let app = Arc::new(AppState {
        config: Arc::new(test_config()),
        trial_store: stubs.store.clone(),
        identity: stubs.identity.clone(),
        ai: stubs.ai.clone(),
        birth: stubs.birth.clone(),
        chart: stubs.chart.clone(),
        daily: stubs.daily.clone(),
        waitlist: stubs.waitlist.clone(),
    });
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = SessionController::connect(app, Language::En, tx).await;
    (controller, rx)
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn birth_context() -> BirthContext {
    BirthContext {
        datetime: "2004-02-12T15:19:21+05:30".into(),
        coordinates: "10.214747,78.097626".into(),
        ayanamsa: Ayanamsa::Lahiri,
        lang_override: None,
    }
}

//=========================================================================================
// Scenarios
//=========================================================================================

#[tokio::test]
async fn welcome_seeds_the_timeline() {
    let stubs = Stubs::default();
    let (controller, mut rx) = session(&stubs).await;

    let timeline = controller.timeline_snapshot().await;
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].role, Role::Assistant);
    assert!(timeline[0].content.starts_with("Hello! I'm AstroBot"));

    let events = drain(&mut rx);
    assert!(matches!(events[0], ServerMessage::SessionInitialized { .. }));
    assert!(matches!(events[1], ServerMessage::MessageAppended { .. }));
}

#[tokio::test]
async fn daily_rasi_card_lifecycle() {
    let stubs = Stubs::default();
    let (controller, mut rx) = session(&stubs).await;

    // Trigger phrase routes to the card, not the AI path.
    controller.submit("daily rasi palan").await;
    let timeline = controller.timeline_snapshot().await;
    let card = timeline.last().unwrap();
    assert_eq!(
        card.card,
        Some(Card::DailyRasi(DailyRasiState::Idle))
    );
    assert_eq!(stubs.ai.calls.load(Ordering::SeqCst), 0);

    drain(&mut rx);
    let handle = controller
        .daily_sign_pick(card.id.clone(), "LEO".into())
        .await
        .expect("pick spawns the fetch");
    handle.await.unwrap();

    // The same card went Loading, then Ready; its id never changed.
    let events = drain(&mut rx);
    let mut states = events.iter().filter_map(|e| match e {
        ServerMessage::MessageReplaced { id, message } => {
            assert_eq!(id, &card.id);
            match &message.card {
                Some(Card::DailyRasi(state)) => Some(state.clone()),
                _ => None,
            }
        }
        _ => None,
    });
    assert_eq!(
        states.next(),
        Some(DailyRasiState::Loading { sign: "LEO".into() })
    );
    assert_eq!(
        states.next(),
        Some(DailyRasiState::Ready {
            sign: "LEO".into(),
            prediction: "A calm day ahead for LEO.".into()
        })
    );
}

#[tokio::test]
async fn daily_rasi_failure_lands_in_the_card() {
    let mut stubs = Stubs::default();
    stubs.daily = Arc::new(StubDaily { fail: true });
    let (controller, _rx) = session(&stubs).await;

    controller.submit("daily rasi palan").await;
    let card_id = controller.timeline_snapshot().await.last().unwrap().id.clone();

    controller
        .daily_sign_pick(card_id.clone(), "VIRGO".into())
        .await
        .unwrap()
        .await
        .unwrap();

    let timeline = controller.timeline_snapshot().await;
    let card = timeline.iter().find(|m| m.id == card_id).unwrap();
    match &card.card {
        Some(Card::DailyRasi(DailyRasiState::Failed { sign, error })) => {
            assert_eq!(sign, "VIRGO");
            assert_eq!(error, "Failed (502)");
        }
        other => panic!("unexpected card state {other:?}"),
    }
}

#[tokio::test]
async fn birth_flow_chains_chart_prompt_and_chart_result() {
    let gate = Arc::new(Notify::new());
    let mut stubs = Stubs::default();
    stubs.birth = Arc::new(StubBirth {
        gate: Some(gate.clone()),
    });
    let (controller, _rx) = session(&stubs).await;

    let handle = controller
        .birth_submit(birth_context())
        .await
        .expect("birth flow spawns");

    // While the request is in flight, a placeholder is visible.
    let timeline = controller.timeline_snapshot().await;
    assert_eq!(timeline.iter().filter(|m| m.typing).count(), 1);

    gate.notify_one();
    handle.await.unwrap();

    let timeline = controller.timeline_snapshot().await;
    assert_eq!(timeline.iter().filter(|m| m.typing).count(), 0);

    // The placeholder became the formatted summary carrying the context.
    let summary = timeline
        .iter()
        .find(|m| m.content.starts_with("Birth details:"))
        .expect("summary message");
    assert!(summary.content.contains("Nakshatra: Bharani (pada 2)"));
    assert!(summary.content.contains("Chandra rasi: Mesha"));
    let summary_ctx = summary.birth_context.as_ref().unwrap();
    assert_eq!(summary_ctx.coordinates, birth_context().coordinates);

    // A chart prompt follows, referencing the same context.
    let prompt = timeline.last().unwrap();
    assert_eq!(prompt.card, Some(Card::ChartPrompt));
    assert_eq!(
        prompt.birth_context.as_ref().unwrap().datetime,
        birth_context().datetime
    );

    // Accepting the prompt replaces it, in place, with the chart.
    let prompt_id = prompt.id.clone();
    let prompt_pos = timeline.len() - 1;
    controller
        .chart_accept(prompt_id.clone())
        .await
        .expect("chart flow spawns")
        .await
        .unwrap();

    let timeline = controller.timeline_snapshot().await;
    assert_eq!(timeline.len(), prompt_pos + 1);
    match &timeline[prompt_pos].card {
        Some(Card::ChartResult { svg }) => assert!(svg.starts_with("<svg")),
        other => panic!("expected chart result, got {other:?}"),
    }
    assert!(timeline.iter().all(|m| m.id != prompt_id));
}

#[tokio::test]
async fn declining_the_chart_prompt_removes_only_that_message() {
    let stubs = Stubs::default();
    let (controller, mut rx) = session(&stubs).await;

    controller
        .birth_submit(birth_context())
        .await
        .unwrap()
        .await
        .unwrap();

    let before = controller.timeline_snapshot().await;
    let prompt_id = before.last().unwrap().id.clone();
    drain(&mut rx);

    controller.chart_decline(prompt_id.clone()).await;

    let after = controller.timeline_snapshot().await;
    assert_eq!(after.len(), before.len() - 1);
    assert!(after.iter().all(|m| m.id != prompt_id));
    // Everything else is untouched, in order.
    for (kept, original) in after.iter().zip(before.iter()) {
        assert_eq!(kept.id, original.id);
    }

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerMessage::MessageRemoved { id } if id == &prompt_id)));
}

#[tokio::test]
async fn out_of_domain_input_is_refused_without_a_request() {
    let stubs = Stubs::default();
    let (controller, _rx) = session(&stubs).await;

    controller.submit("what's the weather today").await;

    let timeline = controller.timeline_snapshot().await;
    let reply = timeline.last().unwrap();
    assert_eq!(reply.content, "I only answer astrology-related questions.");
    assert_eq!(stubs.ai.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn general_query_replaces_the_single_typing_placeholder() {
    let gate = Arc::new(Notify::new());
    let mut stubs = Stubs::default();
    stubs.ai = Arc::new(StubAi {
        calls: AtomicUsize::new(0),
        gate: Some(gate.clone()),
    });
    let (controller, _rx) = session(&stubs).await;

    let handle = controller
        .submit("what does my horoscope say")
        .await
        .expect("query flow spawns");

    let timeline = controller.timeline_snapshot().await;
    assert_eq!(
        timeline
            .iter()
            .filter(|m| m.id == MessageId::Typing)
            .count(),
        1
    );

    // A second submission while the first is pending is rejected locally.
    assert!(controller.submit("another horoscope question").await.is_none());

    gate.notify_one();
    handle.await.unwrap();

    // Exactly one completion ran; the rejected submission issued nothing.
    assert_eq!(stubs.ai.calls.load(Ordering::SeqCst), 1);

    let timeline = controller.timeline_snapshot().await;
    assert!(timeline.iter().all(|m| m.id != MessageId::Typing));
    assert_eq!(
        timeline.last().unwrap().content,
        "Jupiter favors patience today."
    );
}

#[tokio::test]
async fn trial_starts_once_on_first_user_message() {
    let stubs = Stubs::default();
    let (controller, _rx) = session(&stubs).await;

    assert_eq!(controller.seconds_remaining().await, None);

    // Two rapid card-trigger submissions: the timer starts exactly once.
    controller.submit("birth details").await;
    controller.submit("rasi chart").await;

    assert_eq!(stubs.store.saves.load(Ordering::SeqCst), 1);
    let remaining = controller.seconds_remaining().await.unwrap();
    assert!(remaining >= 59, "fresh timer, got {remaining}");

    let saved = stubs
        .store
        .records
        .lock()
        .unwrap()
        .get("chat_trial_203.0.113.9")
        .cloned()
        .expect("record persisted under the resolved-IP key");
    assert_eq!(saved.ip.as_deref(), Some("203.0.113.9"));
    assert!(!saved.expired);
}

#[tokio::test]
async fn expired_persisted_trial_blocks_the_session() {
    let stubs = Stubs::default();
    stubs.store.records.lock().unwrap().insert(
        "chat_trial_203.0.113.9".into(),
        TrialRecord {
            start_time: 0,
            ip: Some("203.0.113.9".into()),
            expired: true,
            expired_at: Some(60_000),
        },
    );
    let (controller, mut rx) = session(&stubs).await;

    assert!(controller.is_blocked().await);
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, ServerMessage::TrialExpired)));

    // Submissions are rejected silently; the timeline stays welcome-only.
    assert!(controller.submit("daily rasi palan").await.is_none());
    assert_eq!(controller.timeline_snapshot().await.len(), 1);
}

#[tokio::test]
async fn corrupted_primary_record_falls_back_to_the_fixed_key() {
    let mut stubs = Stubs::default();
    let mut store = StubStore::default();
    store.fail_keys.push("chat_trial_203.0.113.9".into());
    store.records.lock().unwrap().insert(
        "chat_trial_fallback".into(),
        TrialRecord {
            start_time: 0,
            ip: None,
            expired: true,
            expired_at: Some(60_000),
        },
    );
    stubs.store = Arc::new(store);
    let (controller, _rx) = session(&stubs).await;

    // The fallback record decides: this caller's trial is spent.
    assert!(controller.is_blocked().await);
}

#[tokio::test]
async fn double_storage_failure_degrades_to_a_fresh_trial() {
    let mut stubs = Stubs::default();
    let mut store = StubStore::default();
    store.fail_keys.push("chat_trial_203.0.113.9".into());
    store.fail_keys.push("chat_trial_fallback".into());
    stubs.store = Arc::new(store);
    let (controller, _rx) = session(&stubs).await;

    assert!(!controller.is_blocked().await);
    assert_eq!(controller.seconds_remaining().await, None);
}

#[tokio::test]
async fn identity_failure_uses_the_fallback_key_for_persistence() {
    let mut stubs = Stubs::default();
    stubs.identity = Arc::new(StubIdentity { ip: None });
    let (controller, _rx) = session(&stubs).await;

    controller.submit("birth details").await;

    let records = stubs.store.records.lock().unwrap();
    assert!(records.contains_key("chat_trial_fallback"));
}

#[tokio::test]
async fn waitlist_signup_validates_locally_then_joins() {
    let stubs = Stubs::default();
    let (controller, mut rx) = session(&stubs).await;
    drain(&mut rx);

    // Invalid address: rejected before any request.
    assert!(controller.waitlist_join("not-an-email".into()).await.is_none());
    assert_eq!(stubs.waitlist.calls.load(Ordering::SeqCst), 0);
    let events = drain(&mut rx);
    assert!(matches!(events[0], ServerMessage::Error { .. }));

    controller
        .waitlist_join("Reader@Example.com".into())
        .await
        .expect("signup spawns")
        .await
        .unwrap();
    assert_eq!(stubs.waitlist.calls.load(Ordering::SeqCst), 1);
    let events = drain(&mut rx);
    assert!(matches!(
        events[0],
        ServerMessage::WaitlistAccepted { duplicate: false }
    ));
}

#[tokio::test]
async fn quick_intent_expands_once() {
    let stubs = Stubs::default();
    let (controller, _rx) = session(&stubs).await;

    controller.quick_intent("daily-rasi").await;
    controller.quick_intent("daily-rasi").await;

    let timeline = controller.timeline_snapshot().await;
    let cards = timeline
        .iter()
        .filter(|m| matches!(m.card, Some(Card::DailyRasi(_))))
        .count();
    assert_eq!(cards, 1);
    // The expansion went through the normal submission path.
    assert!(timeline
        .iter()
        .any(|m| m.role == Role::User && m.content == "Daily Rasi Palan"));
}
