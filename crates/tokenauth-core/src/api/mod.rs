//! HTTP side of the session: the coordinator and its transport.
//!
//! `SessionCoordinator` attaches stored credentials to every request and
//! persists the rotated credentials token-auth APIs return on each
//! authenticated response. The wire is abstracted behind `Transport`, with
//! `ReqwestTransport` for real traffic.

pub mod coordinator;
pub mod error;
pub mod transport;

pub use reqwest::{Method, StatusCode};

pub use coordinator::{Exchange, SessionCoordinator};
pub use error::{ApiError, AuthError, TransportError};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
