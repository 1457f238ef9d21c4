//! Connection to the Aura backend.
//!
//! [`Session`] owns the socket and its lifecycle; [`ProtocolClient`] matches
//! responses to requests over whatever link the session currently holds;
//! [`BackendApi`] gives the backend's commands typed signatures.

pub mod api;
pub mod client;
pub mod options;
pub mod session;
pub mod transport;

pub use api::{BackendApi, ChatOptions};
pub use client::ProtocolClient;
pub use options::ClientOptions;
pub use session::{ConnectionStatus, Session, StatusChange, StatusReport};
pub use transport::{Connector, Endpoint, InvalidEndpoint, SocketConnector};
