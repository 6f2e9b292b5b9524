//! RDM JSON Message Types
//!
//! Wire format types for the `tr_json2` websocket protocol. Inbound messages
//! are decoded into [`InboundMessage`]; outbound requests are built as
//! [`OutboundMessage`] and serialized to a single JSON object per frame.
//!
//! # Message Types
//!
//! ## Inbound
//! - `Refresh`: Initial image for a stream (login response or item data)
//! - `Update`: Incremental change on an open stream
//! - `Status`: Stream/data state change (including item rejection)
//! - `Ping`: Server keepalive probe, must be answered with a `Pong`
//! - `Error`: Server-side protocol error
//!
//! ## Outbound
//! - Login request (plain user or authentication token)
//! - Item request (batch of names on one stream ID)
//! - Login close
//! - Pong
//!
//! Fields the session does not interpret are kept in an `extra` map so a
//! message can be reported verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::subscription::{SubscriptionRequest, ViewFields};

// =============================================================================
// Constants
// =============================================================================

/// Domain name of the login stream.
pub const LOGIN_DOMAIN: &str = "Login";

/// Domain assumed when an inbound message carries no `Domain` field.
pub const DEFAULT_DOMAIN: &str = "MarketPrice";

/// Websocket subprotocol spoken by the server.
pub const SUBPROTOCOL: &str = "tr_json2";

/// `NameType` sent with token-based logins.
pub const TOKEN_NAME_TYPE: &str = "AuthnToken";

// =============================================================================
// Stream State
// =============================================================================

/// Stream state reported in `State.Stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStateKind {
    /// Stream is open and will receive updates.
    Open,
    /// Snapshot stream, no updates will follow.
    NonStreaming,
    /// Stream closed, may be re-requested later.
    ClosedRecover,
    /// Stream closed by the provider.
    Closed,
    /// Stream redirected to another key.
    Redirected,
    /// Any value this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Data state reported in `State.Data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataState {
    /// Data is current.
    Ok,
    /// Data may be stale or unavailable.
    Suspect,
    /// Data state unchanged.
    NoChange,
    /// Any value this client does not know about.
    #[serde(other)]
    Unknown,
}

/// `State` object carried by Refresh and Status messages.
///
/// # Wire Format (JSON)
/// ```json
/// {"Stream": "Closed", "Data": "Suspect", "Code": "NotFound", "Text": "**The record could not be found"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    /// Stream state.
    #[serde(rename = "Stream")]
    pub stream: StreamStateKind,

    /// Data state.
    #[serde(rename = "Data")]
    pub data: DataState,

    /// Optional state code.
    #[serde(rename = "Code", default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Optional human readable text.
    #[serde(rename = "Text", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl StreamState {
    /// Create a state without code or text.
    #[must_use]
    pub const fn new(stream: StreamStateKind, data: DataState) -> Self {
        Self {
            stream,
            data,
            code: None,
            text: None,
        }
    }

    /// `(Open, Ok)`: the only state that counts as a healthy login.
    #[must_use]
    pub fn is_open_ok(&self) -> bool {
        self.stream == StreamStateKind::Open && self.data == DataState::Ok
    }

    /// `(Closed, Suspect)`: the server rejected the request.
    #[must_use]
    pub fn is_closed_suspect(&self) -> bool {
        self.stream == StreamStateKind::Closed && self.data == DataState::Suspect
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Discriminator of an inbound message, used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Refresh message.
    Refresh,
    /// Update message.
    Update,
    /// Status message.
    Status,
    /// Ping message.
    Ping,
    /// Error message.
    Error,
}

impl MessageKind {
    /// Parse the wire `Type` value.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Refresh" => Some(Self::Refresh),
            "Update" => Some(Self::Update),
            "Status" => Some(Self::Status),
            "Ping" => Some(Self::Ping),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Wire `Type` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Refresh => "Refresh",
            Self::Update => "Update",
            Self::Status => "Status",
            Self::Ping => "Ping",
            Self::Error => "Error",
        }
    }
}

/// Refresh message: the initial image of a stream.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "ID": 1, "Type": "Refresh", "Domain": "Login",
///   "Key": {"Name": "user"},
///   "State": {"Stream": "Open", "Data": "Ok"},
///   "Elements": {"PingTimeout": 30, "MaxMsgSize": 61426}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshMessage {
    /// Stream ID.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Domain model; absent means `MarketPrice`.
    #[serde(rename = "Domain", default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// `false` when more refresh fragments follow.
    #[serde(rename = "Complete", default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,

    /// Stream state.
    #[serde(rename = "State", default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StreamState>,

    /// Login elements (`PingTimeout`, ...).
    #[serde(rename = "Elements", default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Map<String, Value>>,

    /// Uninterpreted fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RefreshMessage {
    /// Effective domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }

    /// A refresh is partial only when `Complete` is explicitly `false`.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.complete == Some(false)
    }

    /// Server ping interval in seconds from `Elements.PingTimeout`.
    ///
    /// Accepts either a JSON number or a numeric string.
    #[must_use]
    pub fn ping_timeout_secs(&self) -> Option<u64> {
        let value = self.elements.as_ref()?.get("PingTimeout")?;
        match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Update message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    /// Stream ID.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Domain model; absent means `MarketPrice`.
    #[serde(rename = "Domain", default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Uninterpreted fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpdateMessage {
    /// Effective domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }
}

/// Status message.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "ID": 3, "Type": "Status", "Key": {"Name": "BAD.RIC"},
///   "State": {"Stream": "Closed", "Data": "Suspect", "Code": "NotFound"}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Stream ID.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Domain model; absent means `MarketPrice`.
    #[serde(rename = "Domain", default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Stream state.
    #[serde(rename = "State", default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StreamState>,

    /// Uninterpreted fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusMessage {
    /// Effective domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }

    /// True when the state is present and equals `(Closed, Suspect)`.
    #[must_use]
    pub fn is_closed_suspect(&self) -> bool {
        self.state.as_ref().is_some_and(StreamState::is_closed_suspect)
    }
}

/// Error message sent by the server for an unprocessable request.
///
/// # Wire Format (JSON)
/// ```json
/// {"Type": "Error", "Text": "JSON parsing error", "Debug": {"File": "...", "Line": 1}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Stream ID, when the error relates to a request.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Error text.
    #[serde(rename = "Text", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Uninterpreted fields (`Debug`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Refresh message.
    Refresh(RefreshMessage),
    /// Update message.
    Update(UpdateMessage),
    /// Status message.
    Status(StatusMessage),
    /// Ping message.
    Ping,
    /// Error message.
    Error(ErrorMessage),
}

impl InboundMessage {
    /// Message discriminator.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Refresh(_) => MessageKind::Refresh,
            Self::Update(_) => MessageKind::Update,
            Self::Status(_) => MessageKind::Status,
            Self::Ping => MessageKind::Ping,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Effective domain; `None` for Ping and Error.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::Refresh(m) => Some(m.domain()),
            Self::Update(m) => Some(m.domain()),
            Self::Status(m) => Some(m.domain()),
            Self::Ping | Self::Error(_) => None,
        }
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// `Key.Elements` of a login request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginElements {
    /// Application identifier.
    #[serde(rename = "ApplicationId")]
    pub application_id: String,

    /// Application position (usually the host IP).
    #[serde(rename = "Position")]
    pub position: String,

    /// Authentication token for token logins.
    #[serde(
        rename = "AuthenticationToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub authentication_token: Option<String>,
}

impl std::fmt::Debug for LoginElements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginElements")
            .field("application_id", &self.application_id)
            .field("position", &self.position)
            .field(
                "authentication_token",
                &self.authentication_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// `Key` of a login request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginKey {
    /// User name (plain logins).
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Name type (`AuthnToken` for token logins).
    #[serde(rename = "NameType", default, skip_serializing_if = "Option::is_none")]
    pub name_type: Option<String>,

    /// Login elements.
    #[serde(rename = "Elements")]
    pub elements: LoginElements,
}

/// Login request.
///
/// # Wire Format (JSON)
/// ```json
/// {"ID": 1, "Domain": "Login", "Key": {"Name": "user", "Elements": {"ApplicationId": "256", "Position": "10.0.0.1"}}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login stream ID.
    #[serde(rename = "ID")]
    pub id: i64,

    /// Always `Login`.
    #[serde(rename = "Domain")]
    pub domain: String,

    /// Login key.
    #[serde(rename = "Key")]
    pub key: LoginKey,

    /// `false` on a token reissue: no new refresh is wanted.
    #[serde(rename = "Refresh", default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<bool>,
}

/// `Key` of an item request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemKey {
    /// Item names.
    #[serde(rename = "Name")]
    pub name: Vec<String>,
}

/// Item (batch) request.
///
/// # Wire Format (JSON)
/// ```json
/// {"ID": 2, "Key": {"Name": ["VOD.L", "BT.L"]}, "View": ["BID", "ASK"], "Domain": "MarketPrice", "Streaming": false}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    /// Stream ID.
    #[serde(rename = "ID")]
    pub id: i64,

    /// Item key.
    #[serde(rename = "Key")]
    pub key: ItemKey,

    /// Optional field view.
    #[serde(rename = "View", default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewFields>,

    /// Domain model; omitted means the server default.
    #[serde(rename = "Domain", default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Present and `false` for snapshot requests.
    #[serde(rename = "Streaming", default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

impl From<&SubscriptionRequest> for ItemRequest {
    fn from(req: &SubscriptionRequest) -> Self {
        Self {
            id: req.stream_id,
            key: ItemKey {
                name: req.items.clone(),
            },
            view: req.view.clone(),
            domain: req.domain.clone(),
            streaming: (!req.streaming).then_some(false),
        }
    }
}

impl From<ItemRequest> for SubscriptionRequest {
    fn from(wire: ItemRequest) -> Self {
        Self {
            stream_id: wire.id,
            domain: wire.domain,
            items: wire.key.name,
            view: wire.view,
            streaming: wire.streaming.unwrap_or(true),
        }
    }
}

/// Login stream close.
///
/// # Wire Format (JSON)
/// ```json
/// {"ID": 1, "Domain": "Login", "Type": "Close"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    /// Stream to close.
    #[serde(rename = "ID")]
    pub id: i64,

    /// Domain of the stream.
    #[serde(rename = "Domain")]
    pub domain: String,

    /// Always `Close`.
    #[serde(rename = "Type")]
    pub msg_type: String,
}

impl CloseRequest {
    /// Close request for the login stream.
    #[must_use]
    pub fn login(id: i64) -> Self {
        Self {
            id,
            domain: LOGIN_DOMAIN.to_string(),
            msg_type: "Close".to_string(),
        }
    }
}

#[derive(Serialize)]
struct PongFrame {
    #[serde(rename = "Type")]
    msg_type: &'static str,
}

/// A message the session wants written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Login (initial or token reissue).
    Login(LoginRequest),
    /// Item request.
    Subscribe(SubscriptionRequest),
    /// Answer to a server Ping.
    Pong,
    /// Login close (logout).
    Close(CloseRequest),
}

impl OutboundMessage {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Subscribe(_) => "subscribe",
            Self::Pong => "pong",
            Self::Close(_) => "close",
        }
    }

    /// Serialize the message to its wire JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen with valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Login(req) => serde_json::to_string(req),
            Self::Subscribe(req) => serde_json::to_string(&ItemRequest::from(req)),
            Self::Pong => serde_json::to_string(&PongFrame { msg_type: "Pong" }),
            Self::Close(req) => serde_json::to_string(req),
        }
    }
}
