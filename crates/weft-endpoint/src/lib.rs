//! Fabric endpoint coupling the weft event bus to a STOMP-framed server.
//!
//! # Purpose
//! External clients subscribe to bus channels through broker destinations,
//! publish requests into them, and receive responses and error messages,
//! including private per-connection replies.
//!
//! # Design notes
//! The STOMP framing layer stays behind the [`StompServer`] trait; the
//! endpoint only installs the three callbacks of that contract and sends
//! encoded bytes back through it. Subscription state lives in a single
//! mutex-guarded registry so the `mapping exists ⇔ bus listener live`
//! invariant holds under concurrent subscribe, unsubscribe and dispatch.

pub mod config;
mod destination;
mod encoder;
pub mod endpoint;
mod registry;
pub mod stomp;

pub use config::EndpointConfig;
pub use endpoint::FabricEndpoint;
pub use stomp::{ApplicationRequestHandler, StompServer, SubscribeHandler, UnsubscribeHandler};
