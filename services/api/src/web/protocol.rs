//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the
//! API server for the astrology chat session.

use astrobot_core::domain::{BirthContext, Language, Message, MessageId};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Initializes the session. This must be the first message sent on the
    /// connection. `intent` is an optional quick-action shortcut
    /// (`birth-details`, `kundli`, `rasi-chart`, `daily-rasi`) expanded into
    /// its trigger phrase and submitted once.
    Init {
        #[serde(default)]
        lang: Language,
        #[serde(default)]
        intent: Option<String>,
    },

    /// A free-text chat submission.
    Submit { text: String },

    /// Submission of the birth-details input card.
    BirthSubmit {
        #[serde(flatten)]
        birth: BirthContext,
    },

    /// Submission of the rasi-chart input card (direct chart path).
    RasiChartSubmit {
        #[serde(flatten)]
        birth: BirthContext,
    },

    /// The user accepted a chart prompt.
    ChartAccept { message_id: MessageId },

    /// The user rejected a chart prompt; the prompt message is removed.
    ChartDecline { message_id: MessageId },

    /// The user picked a zodiac sign inside a daily-rasi card.
    DailySignPick { message_id: MessageId, sign: String },

    /// Waitlist signup, offered once the trial has expired.
    WaitlistJoin { email: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms successful session initialization.
    SessionInitialized { lang: Language },

    /// A message was appended to the timeline.
    MessageAppended { message: Message },

    /// The message with `id` was replaced in place.
    MessageReplaced { id: MessageId, message: Message },

    /// The message with `id` was removed.
    MessageRemoved { id: MessageId },

    /// One second of trial countdown elapsed.
    TrialTick { seconds_remaining: u32 },

    /// The trial reached zero; the client should swap the input control for
    /// the waitlist affordance.
    TrialExpired,

    /// The waitlist signup succeeded (possibly as a tolerated duplicate).
    WaitlistAccepted { duplicate: bool },

    /// Reports an error to the client, which should display it.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrobot_core::domain::Ayanamsa;

    #[test]
    fn client_messages_deserialize() {
        let init: ClientMessage =
            serde_json::from_str(r#"{"type":"init","lang":"ta","intent":"daily-rasi"}"#).unwrap();
        match init {
            ClientMessage::Init { lang, intent } => {
                assert_eq!(lang, Language::Ta);
                assert_eq!(intent.as_deref(), Some("daily-rasi"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let birth: ClientMessage = serde_json::from_str(
            r#"{"type":"birth_submit","datetime":"2004-02-12T15:19:21+05:30","coordinates":"10.2,78.6","ayanamsa":1,"la":"en"}"#,
        )
        .unwrap();
        match birth {
            ClientMessage::BirthSubmit { birth } => {
                assert_eq!(birth.ayanamsa, Ayanamsa::Lahiri);
                assert_eq!(birth.lang_override, Some(Language::En));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn message_ids_round_trip_the_reserved_literal() {
        let pick: ClientMessage = serde_json::from_str(
            r#"{"type":"daily_sign_pick","message_id":"typing","sign":"LEO"}"#,
        )
        .unwrap();
        match pick {
            ClientMessage::DailySignPick { message_id, .. } => {
                assert_eq!(message_id, MessageId::Typing);
            }
            other => panic!("unexpected {other:?}"),
        }

        let tick = ServerMessage::TrialTick {
            seconds_remaining: 42,
        };
        assert_eq!(
            serde_json::to_string(&tick).unwrap(),
            r#"{"type":"trial_tick","seconds_remaining":42}"#
        );
    }
}
