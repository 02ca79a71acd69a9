//! Client session tracking for the interactive and streaming transports.

mod file_store;
mod manager;
mod session;
mod store;

pub use file_store::FileSessionStore;
pub use manager::{SessionManager, DEFAULT_SESSION_TIMEOUT};
pub use session::{Session, SessionView, Transport};
pub use store::{PostgresSessionStore, SessionStore};
