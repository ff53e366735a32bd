// Fabric endpoint: bridges bus channels onto a STOMP-facing server.
//
// Subscribe/unsubscribe bookkeeping, request ingestion and response
// dispatch all funnel through here. Client misuse is absorbed: a bad frame
// can drop its own message but never destabilize other subscribers.
use bytes::Bytes;
use std::sync::{Arc, Weak};
use weft_bus::{EventBus, Message};
use weft_common::{BrokerDestinationConfig, Request};

use crate::config::EndpointConfig;
use crate::destination::DestinationKind;
use crate::encoder::{self, PrivateRoute};
use crate::registry::{SubscriptionRegistry, composite_id};
use crate::stomp::StompServer;

/// Couples the in-process bus to a STOMP-facing server.
///
/// A channel mapping is created on the first subscribe for a channel and
/// destroyed when its last subscriber leaves; the bus listener lives
/// exactly as long as the mapping. There is no happens-before between a
/// subscribe and messages already in flight on the channel: a subscriber
/// installed after a message was dispatched misses it.
pub struct FabricEndpoint {
    bus: Arc<EventBus>,
    server: Arc<dyn StompServer>,
    config: EndpointConfig,
    registry: SubscriptionRegistry,
    // Handed out to callbacks so they never keep the endpoint alive.
    weak_self: Weak<FabricEndpoint>,
}

impl FabricEndpoint {
    pub fn new(
        bus: Arc<EventBus>,
        server: Arc<dyn StompServer>,
        config: EndpointConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            bus,
            server,
            config: config.normalized(),
            registry: SubscriptionRegistry::default(),
            weak_self: weak_self.clone(),
        })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Register the STOMP callbacks, then start the server. Registration
    /// comes first so no frame can arrive before the handlers are wired.
    pub fn start(&self) {
        self.register_handlers();
        self.server.start();
    }

    /// Tear down every channel mapping (detaching the bus listeners) and
    /// stop the server. In-flight dispatches are allowed to finish.
    pub fn stop(&self) {
        self.registry.clear();
        self.server.stop();
    }

    pub(crate) fn register_handlers(&self) {
        let endpoint = self.weak_self.clone();
        self.server
            .on_subscribe_event(Box::new(move |con_id, sub_id, destination, _frame| {
                if let Some(endpoint) = endpoint.upgrade() {
                    endpoint.handle_subscribe(con_id, sub_id, destination);
                }
            }));

        let endpoint = self.weak_self.clone();
        self.server
            .on_unsubscribe_event(Box::new(move |con_id, sub_id, destination| {
                if let Some(endpoint) = endpoint.upgrade() {
                    endpoint.handle_unsubscribe(con_id, sub_id, destination);
                }
            }));

        let endpoint = self.weak_self.clone();
        self.server
            .on_application_request(Box::new(move |destination, body, con_id| {
                if let Some(endpoint) = endpoint.upgrade() {
                    endpoint.handle_app_request(destination, body, con_id);
                }
            }));
    }

    fn handle_subscribe(&self, con_id: &str, sub_id: &str, destination: &str) {
        let Some(classified) = self.config.classify(destination) else {
            tracing::debug!(destination, "ignoring subscribe for unrecognized destination");
            return;
        };
        if !matches!(
            classified.kind,
            DestinationKind::Topic | DestinationKind::UserQueue
        ) {
            tracing::debug!(destination, "ignoring subscribe for non-subscribable destination");
            return;
        }
        let channel = classified.channel_name;
        // The endpoint never creates channels; unknown ones are ignored.
        if self.bus.channel_manager().get_channel(&channel).is_none() {
            tracing::debug!(channel = %channel, "ignoring subscribe for unknown channel");
            metrics::counter!("weft_endpoint_unknown_channel_total").increment(1);
            return;
        }

        let attach = || {
            let listener = self.bus.listen_stream(&channel)?;
            let on_message = {
                let endpoint = self.weak_self.clone();
                let channel = channel.clone();
                move |message: &Message| {
                    if let Some(endpoint) = endpoint.upgrade() {
                        endpoint.dispatch_response(&channel, message);
                    }
                }
            };
            let on_error = {
                let endpoint = self.weak_self.clone();
                let channel = channel.clone();
                move |error: &str| {
                    if let Some(endpoint) = endpoint.upgrade() {
                        endpoint.dispatch_error(&channel, error);
                    }
                }
            };
            listener.handle(on_message, on_error);
            Ok(listener)
        };

        match self
            .registry
            .add(&channel, composite_id(con_id, sub_id), attach)
        {
            Ok(created) => {
                if created {
                    tracing::debug!(channel = %channel, "channel mapping created");
                }
                metrics::counter!("weft_endpoint_subscribes_total").increment(1);
            }
            Err(err) => {
                // Channel vanished between the existence check and attach.
                tracing::debug!(channel = %channel, error = %err, "subscribe dropped");
            }
        }
    }

    fn handle_unsubscribe(&self, con_id: &str, sub_id: &str, destination: &str) {
        let Some(classified) = self.config.classify(destination) else {
            tracing::debug!(destination, "ignoring unsubscribe for unrecognized destination");
            return;
        };
        if !matches!(
            classified.kind,
            DestinationKind::Topic | DestinationKind::UserQueue
        ) {
            return;
        }
        let removal = self.registry.remove(
            &classified.channel_name,
            &composite_id(con_id, sub_id),
        );
        if !removal.existed {
            tracing::debug!(
                channel = %classified.channel_name,
                "ignoring unsubscribe for unknown subscription"
            );
            return;
        }
        if removal.last {
            tracing::debug!(channel = %classified.channel_name, "channel mapping removed");
        }
        metrics::counter!("weft_endpoint_unsubscribes_total").increment(1);
    }

    fn handle_app_request(&self, destination: &str, body: &[u8], con_id: &str) {
        let Some(classified) = self.config.classify(destination) else {
            tracing::debug!(destination, "ignoring request for unrecognized destination");
            metrics::counter!("weft_endpoint_misrouted_requests_total").increment(1);
            return;
        };
        if !matches!(
            classified.kind,
            DestinationKind::AppRequest | DestinationKind::AppRequestQueue
        ) {
            tracing::debug!(destination, "ignoring request for non-request destination");
            metrics::counter!("weft_endpoint_misrouted_requests_total").increment(1);
            return;
        }
        let channel = classified.channel_name;
        if self.bus.channel_manager().get_channel(&channel).is_none() {
            tracing::debug!(channel = %channel, "ignoring request for unknown channel");
            metrics::counter!("weft_endpoint_unknown_channel_total").increment(1);
            return;
        }

        let mut request = match Request::from_json(body) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(channel = %channel, error = %err, "dropping malformed request");
                metrics::counter!("weft_endpoint_malformed_requests_total").increment(1);
                return;
            }
        };
        if classified.kind == DestinationKind::AppRequestQueue
            && !self.config.user_queue_prefix.is_empty()
        {
            // Tell downstream handlers where the requester expects its
            // private reply. Without a user-queue prefix the private route
            // is inactive and the request stays anonymous.
            request.broker_destination = Some(BrokerDestinationConfig::new(
                format!("{}{}", self.config.user_queue_prefix, channel),
                con_id,
            ));
        }

        let destination_id = request.id;
        if let Err(err) = self
            .bus
            .send_request_message(&channel, request, destination_id)
        {
            tracing::debug!(channel = %channel, error = %err, "request dropped");
        } else {
            metrics::counter!("weft_endpoint_requests_total").increment(1);
        }
    }

    // Fan-out for one bus response. The subscriber snapshot is taken under
    // the registry lock and iterated outside it; the STOMP layer performs
    // the per-subscriber delivery, so one send call covers the broadcast.
    fn dispatch_response(&self, channel: &str, message: &Message) {
        if self.registry.snapshot(channel).is_empty() {
            return;
        }
        let (body, route) = match encoder::encode_response(message) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(channel = %channel, error = %err, "dropping unencodable response");
                metrics::counter!("weft_endpoint_encode_failures_total").increment(1);
                return;
            }
        };
        match route {
            Some(PrivateRoute {
                connection_id,
                destination,
            }) => {
                self.server
                    .send_message_to_client(&connection_id, &destination, body);
                metrics::counter!("weft_endpoint_private_sends_total").increment(1);
            }
            None => {
                let destination = format!("{}{}", self.config.topic_prefix, channel);
                self.server.send_message(&destination, body);
                metrics::counter!("weft_endpoint_broadcasts_total").increment(1);
            }
        }
    }

    // Bus errors bypass the encoder and go out as plain error text.
    fn dispatch_error(&self, channel: &str, error: &str) {
        if self.registry.snapshot(channel).is_empty() {
            return;
        }
        let destination = format!("{}{}", self.config.topic_prefix, channel);
        self.server
            .send_message(&destination, Bytes::copy_from_slice(error.as_bytes()));
        metrics::counter!("weft_endpoint_error_broadcasts_total").increment(1);
    }
}
