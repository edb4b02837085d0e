use serde::{Deserialize, Serialize};

pub const SUBSCRIBE_OAUTH: &str = "data:subscribe_oauth";
pub const CONTROL_HELLO: &str = "control:hello";
pub const DATA_UPDATE: &str = "data:update";
pub const DATA_ERROR: &str = "data:error";

/// Handshake sent once right after the socket opens.
#[derive(Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "msg_type")]
    pub kind: String,
    pub token: String,
    /// Comma-joined column names.
    pub value: String,
    /// Vehicle id as a decimal string.
    pub tag: String,
}

impl Subscription {
    pub fn new(vehicle_id: u64, columns: &[String], token: impl Into<String>) -> Self {
        Subscription {
            kind: SUBSCRIBE_OAUTH.to_string(),
            token: token.into(),
            value: columns.join(","),
            tag: vehicle_id.to_string(),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("msg_type", &self.kind)
            .field("value", &self.value)
            .field("tag", &self.tag)
            .finish()
    }
}

/// Inbound frame as sent by the streaming endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "msg_type", default)]
    pub kind: String,
    #[serde(default)]
    pub connection_timeout: i64,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub error_type: String,
}

impl Frame {
    /// CSV fields of a data update. The first is the server timestamp,
    /// followed by the subscribed columns in order. Empty fields are kept.
    pub fn values(&self) -> Vec<&str> {
        if self.value.is_empty() {
            return Vec::new();
        }
        self.value.split(',').collect()
    }

    /// Pairs subscribed column names with their values, skipping the timestamp.
    pub fn columns<'a>(&'a self, columns: &'a [String]) -> Vec<(&'a str, &'a str)> {
        columns
            .iter()
            .map(String::as_str)
            .zip(self.values().into_iter().skip(1))
            .collect()
    }

    pub fn classify(self) -> StreamMessage {
        match self.kind.as_str() {
            CONTROL_HELLO => StreamMessage::Hello {
                connection_timeout: self.connection_timeout,
            },
            DATA_UPDATE => StreamMessage::DataUpdate(self),
            DATA_ERROR => StreamMessage::DataError(StreamErrorKind::from(self.error_type.as_str())),
            _ => StreamMessage::Unrecognized(self.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Hello { connection_timeout: i64 },
    DataUpdate(Frame),
    DataError(StreamErrorKind),
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamErrorKind {
    ClientError,
    VehicleDisconnected,
    Other(String),
}

impl From<&str> for StreamErrorKind {
    fn from(error_type: &str) -> Self {
        match error_type {
            "client_error" => StreamErrorKind::ClientError,
            "vehicle_disconnected" => StreamErrorKind::VehicleDisconnected,
            other => StreamErrorKind::Other(other.to_string()),
        }
    }
}
