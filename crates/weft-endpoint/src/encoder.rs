// Outgoing payload encoding for STOMP delivery.
//
// The encoder picks the wire bytes and reports an optional private route;
// combining that with the registered destination is the endpoint's job.
use bytes::Bytes;
use weft_bus::{Message, Payload};

#[derive(thiserror::Error, Debug)]
pub(crate) enum EncodeError {
    #[error("serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Unicast target carried by a structured response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PrivateRoute {
    pub connection_id: String,
    pub destination: String,
}

pub(crate) fn encode_response(
    message: &Message,
) -> Result<(Bytes, Option<PrivateRoute>), EncodeError> {
    match &message.payload {
        Payload::Text(text) => Ok((Bytes::copy_from_slice(text.as_bytes()), None)),
        // Byte payloads pass through untouched.
        Payload::Bytes(bytes) => Ok((bytes.clone(), None)),
        Payload::Response(response) => {
            let body = Bytes::from(serde_json::to_vec(response)?);
            let route = response.broker_destination.as_ref().map(|target| PrivateRoute {
                connection_id: target.connection_id.clone(),
                destination: target.destination.clone(),
            });
            Ok((body, route))
        }
        Payload::Request(request) => Ok((Bytes::from(serde_json::to_vec(request)?), None)),
        Payload::Value(value) => Ok((Bytes::from(serde_json::to_vec(value)?), None)),
    }
}
