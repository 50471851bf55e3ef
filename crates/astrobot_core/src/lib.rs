pub mod domain;
pub mod intent;
pub mod ports;
pub mod text;
pub mod timeline;
pub mod trial;

pub use domain::{
    Ayanamsa, BirthContext, BirthDetails, Card, DailyRasiState, Language, Message, MessageId,
    Role, TrialRecord, WaitlistAck,
};
pub use intent::{classify, Intent};
pub use ports::{
    AiChatService, BirthDetailsService, ChartRenderService, DailyHoroscopeService,
    IdentityResolver, PortError, PortResult, TrialStore, WaitlistService,
};
pub use timeline::Timeline;
pub use trial::{TrialGate, TrialPhase};
