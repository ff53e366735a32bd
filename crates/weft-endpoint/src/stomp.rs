// Contract consumed from the STOMP-facing server.
//
// Framing, authentication and connection management all live behind this
// trait; the endpoint installs callbacks and pushes encoded bytes back.
use bytes::Bytes;

/// Invoked for every SUBSCRIBE frame: connection id, subscription id,
/// destination, and the raw frame body when the server retained one.
pub type SubscribeHandler = Box<dyn Fn(&str, &str, &str, Option<&[u8]>) + Send + Sync>;

/// Invoked for every UNSUBSCRIBE frame: connection id, subscription id,
/// destination.
pub type UnsubscribeHandler = Box<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Invoked for every application SEND frame: destination, body bytes,
/// connection id.
pub type ApplicationRequestHandler = Box<dyn Fn(&str, &[u8], &str) + Send + Sync>;

/// STOMP-facing server driven by the fabric endpoint.
///
/// Callback registration must complete before `start` so no frame can be
/// delivered into an unwired handler slot. `send_message` broadcasts to
/// every subscriber of the destination; `send_message_to_client` delivers
/// to one connection only. Send failures are the server's to handle.
pub trait StompServer: Send + Sync {
    fn start(&self);

    fn stop(&self);

    fn send_message(&self, destination: &str, body: Bytes);

    fn send_message_to_client(&self, connection_id: &str, destination: &str, body: Bytes);

    fn on_subscribe_event(&self, handler: SubscribeHandler);

    fn on_unsubscribe_event(&self, handler: UnsubscribeHandler);

    fn on_application_request(&self, handler: ApplicationRequestHandler);
}
