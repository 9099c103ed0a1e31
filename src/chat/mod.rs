//! Conversation core: session state, the per-connection orchestrator,
//! the event model and error classification.

pub mod errors;
pub mod orchestrator;
pub mod session;
pub mod types;

pub use orchestrator::{spawn_session, Orchestrator, SessionDeps};
pub use session::ChatSession;
