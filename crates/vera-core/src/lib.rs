//! Vera core: research identities, bearer sessions, the conversation ledger and
//! the chat orchestrator that ties them to an answer engine and a speech
//! synthesizer.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod speech;
pub mod store;
pub mod types;

pub use auth::{secrets_match, IssuedToken, SessionAuthenticator, TokenSigner};
pub use config::{CoreConfig, EngineConfig, EngineMode, SpeechConfig};
pub use engine::{Answer, AnswerEngine, AnswerRequest, AnswerStream, ChatTurn, Citation, EngineError, EngineResult};
pub use error::{UpstreamKind, VeraError, VeraResult};
pub use ledger::{ConversationLedger, LedgerLimits};
pub use orchestrator::stream::{ChannelState, ChatChannel, Disconnected, EventSink, InboundFrame, OutboundEvent};
pub use orchestrator::{ChatOrchestrator, ChatRequest, ChatSettings, IngestRequest};
pub use speech::{AudioArtifact, SpeechError, SpeechResult, SpeechSynthesizer};
pub use store::admin::{AdminQueries, IdentityDetail, UsageStats};
pub use store::identity::IdentityStore;
pub use store::{blocking, Database};
pub use types::{
    new_conversation_id, DisclaimerAck, HistoryPage, Identity, Message, NewMessage, Origin, ProviderMeta, Role,
    SessionRecord,
};
