//! GymDesk client core
//!
//! Authenticated access to the GymDesk backend: a [`SessionManager`] that
//! signs requests and transparently refreshes expired access tokens, and
//! reconnecting [`RosterChannel`]s that keep trainer and user lists in sync.

pub mod config;
pub mod error;
pub mod network;
pub mod realtime;
pub mod session;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::ClientConfig;
pub use error::{GymError, GymResult};
pub use network::{ApiRequest, ApiResponse, HttpTransport, Method, ReqwestTransport};
pub use realtime::{ConnectionState, Roster, RosterChannel, RosterConnector, WsConnector};
pub use session::{
    CredentialStore, FileStore, LOGIN_ROUTE, MemoryStore, Role, Session, SessionEvent,
    SessionManager, TerminationReason,
};
