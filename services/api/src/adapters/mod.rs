pub mod ai_chat;
pub mod astrology;
pub mod identity;
pub mod trial_store;
pub mod waitlist;

pub use ai_chat::OpenAiChatAdapter;
pub use astrology::AstrologyApiClient;
pub use identity::HttpIdentityResolver;
pub use trial_store::SqliteTrialStore;
pub use waitlist::HttpWaitlistAdapter;
