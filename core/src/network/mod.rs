//! Backend communication
//!
//! HTTP request descriptors and transport, plus the JSON shapes exchanged
//! with the REST and WebSocket endpoints.

pub mod http;
pub mod protocol;

pub use http::{ApiRequest, ApiResponse, HttpTransport, Method, ReqwestTransport, RequestBody};
pub use protocol::{LoginResponse, RosterFrame, RosterRequest};
