//! The `initialize` handshake.
//!
//! A two-message state machine layered on the dispatcher:
//!
//! ```text
//! Uninitialized --initialize--> Negotiating --notifications/initialized--> Ready
//! ```
//!
//! Other methods are not gated on it unless the protocol core was built with
//! `strict_lifecycle`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::McpError;
use crate::mcp::capabilities::{
    merge_capabilities, ClientInfo, InitializeParams, InitializeResult, ServerCapabilities,
    ServerIdentity,
};
use crate::mcp::protocol::{ErrorObject, MCP_PROTOCOL_VERSION};

/// Request method that opens the handshake.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Notification method that completes the handshake.
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Request methods that are always allowed, even before the handshake completes.
const UNGATED_METHODS: [&str; 2] = [INITIALIZE_METHOD, "ping"];

/// Where a connection is in the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the initialize request.
    #[default]
    Uninitialized,
    /// Initialize answered, waiting for the initialized notification.
    Negotiating,
    /// Ready for normal operation.
    Ready,
}

#[derive(Debug, Default)]
struct Session {
    state: HandshakeState,
    client_info: Option<ClientInfo>,
    client_protocol_version: Option<String>,
}

/// Handshake bookkeeping for one protocol core.
#[derive(Debug)]
pub struct Handshake {
    result: InitializeResult,
    session: Mutex<Session>,
}

impl Handshake {
    /// Creates the handshake for a server identity.
    ///
    /// The capability descriptor is merged here, once.
    #[must_use]
    pub fn new(identity: &ServerIdentity) -> Self {
        let capabilities =
            merge_capabilities(&ServerCapabilities::default(), &identity.capabilities);

        Self {
            result: InitializeResult {
                protocol_version: MCP_PROTOCOL_VERSION.to_string(),
                capabilities,
                server_info: identity.info.clone(),
                instructions: identity.instructions.clone(),
            },
            session: Mutex::new(Session::default()),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles an `initialize` request.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if the params lack a protocol version,
    /// a capabilities object, or a client name and version.
    pub fn initialize(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params = parse_initialize_params(params)?;

        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol_version = %params.protocol_version,
            "initialize request"
        );
        if params.protocol_version != MCP_PROTOCOL_VERSION {
            debug!(
                requested = %params.protocol_version,
                offered = MCP_PROTOCOL_VERSION,
                "client asked for a different protocol version"
            );
        }

        {
            let mut session = self.session();
            session.client_info = Some(params.client_info);
            session.client_protocol_version = Some(params.protocol_version);
            if session.state == HandshakeState::Uninitialized {
                session.state = HandshakeState::Negotiating;
            }
        }

        Ok(serde_json::to_value(&self.result)?)
    }

    /// Handles the `notifications/initialized` acknowledgment.
    ///
    /// Only a session that has answered `initialize` becomes ready; an early
    /// or repeated acknowledgment is ignored.
    pub fn acknowledge(&self) {
        let mut session = self.session();
        match session.state {
            HandshakeState::Negotiating => {
                session.state = HandshakeState::Ready;
                debug!("handshake complete");
            }
            state => debug!(?state, "ignoring initialized notification"),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.session().state
    }

    /// Returns the client's identity, once `initialize` has been received.
    #[must_use]
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.session().client_info.clone()
    }

    /// Returns the protocol version the client asked for.
    #[must_use]
    pub fn client_protocol_version(&self) -> Option<String> {
        self.session().client_protocol_version.clone()
    }

    /// Returns the merged capability descriptor.
    #[must_use]
    pub const fn capabilities(&self) -> &Value {
        &self.result.capabilities
    }

    /// Returns `true` if `method` may run in the current state under a strict lifecycle.
    #[must_use]
    pub fn permits(&self, method: &str) -> bool {
        UNGATED_METHODS.contains(&method) || self.state() == HandshakeState::Ready
    }
}

fn parse_initialize_params(params: Option<Value>) -> Result<InitializeParams, ErrorObject> {
    let params = params.ok_or_else(|| ErrorObject::invalid_request("Missing initialize params"))?;
    serde_json::from_value(params)
        .map_err(|e| ErrorObject::invalid_request(format!("Invalid initialize params: {e}")))
}
