// Shared message envelopes exchanged between the bus and broker-facing clients.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Private-reply routing attached to a request or response.
///
/// On an outgoing response it targets a single connection at a specific
/// destination; on an incoming request it tells downstream handlers where
/// the requester expects its reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerDestinationConfig {
    pub destination: String,
    pub connection_id: String,
}

impl BrokerDestinationConfig {
    pub fn new(destination: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            connection_id: connection_id.into(),
        }
    }
}

/// Request envelope published into a bus channel on behalf of a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    // Operation name; free-form, interpreted by channel handlers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_destination: Option<BrokerDestinationConfig>,
}

impl Request {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Response envelope delivered back to broker-facing clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub response_payload: Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_destination: Option<BrokerDestinationConfig>,
}

impl Response {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
