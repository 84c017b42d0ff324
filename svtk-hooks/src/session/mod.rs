//! Session state: durable rows, transport context, and the abandoned-session guard

pub mod guard;
pub mod store;
pub mod transport;

pub use guard::GuardEnforcer;
pub use store::{correlation_key, CompletionOutcome, Heartbeat, SessionStore, UpsertOutcome};
pub use transport::{SessionContext, SqliteTransportSessions, SurveyScope, TransportSessions};
