// Destination classification against the configured prefixes.
use crate::config::EndpointConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DestinationKind {
    Topic,
    UserQueue,
    AppRequest,
    AppRequestQueue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClassifiedDestination {
    pub kind: DestinationKind,
    pub channel_name: String,
}

impl EndpointConfig {
    /// Map a broker destination onto a channel name and routing intent.
    /// Returns `None` for destinations outside every configured prefix and
    /// for prefix-only destinations with no channel suffix.
    pub(crate) fn classify(&self, destination: &str) -> Option<ClassifiedDestination> {
        // The request-queue prefix nests under the request prefix, so the
        // more specific prefixes must win; this order is a hard tie-break.
        let candidates = [
            (&self.app_request_queue_prefix, DestinationKind::AppRequestQueue),
            (&self.app_request_prefix, DestinationKind::AppRequest),
            (&self.user_queue_prefix, DestinationKind::UserQueue),
            (&self.topic_prefix, DestinationKind::Topic),
        ];
        for (prefix, kind) in candidates {
            if prefix.is_empty() {
                continue;
            }
            if let Some(channel_name) = destination.strip_prefix(prefix.as_str()) {
                if channel_name.is_empty() {
                    return None;
                }
                return Some(ClassifiedDestination {
                    kind,
                    channel_name: channel_name.to_string(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EndpointConfig {
        EndpointConfig {
            topic_prefix: "/topic".into(),
            app_request_prefix: "/pub".into(),
            app_request_queue_prefix: "/pub/queue".into(),
            user_queue_prefix: "/user/queue".into(),
            ..EndpointConfig::default()
        }
        .normalized()
    }

    #[test]
    fn topic_destination_maps_to_channel() {
        let classified = config().classify("/topic/test-service").expect("classified");
        assert_eq!(classified.kind, DestinationKind::Topic);
        assert_eq!(classified.channel_name, "test-service");
    }

    #[test]
    fn request_queue_wins_over_request() {
        let classified = config()
            .classify("/pub/queue/test-service")
            .expect("classified");
        assert_eq!(classified.kind, DestinationKind::AppRequestQueue);
        assert_eq!(classified.channel_name, "test-service");

        let classified = config().classify("/pub/test-service").expect("classified");
        assert_eq!(classified.kind, DestinationKind::AppRequest);
    }

    #[test]
    fn user_queue_destination_maps_to_channel() {
        let classified = config()
            .classify("/user/queue/test-service")
            .expect("classified");
        assert_eq!(classified.kind, DestinationKind::UserQueue);
        assert_eq!(classified.channel_name, "test-service");
    }

    #[test]
    fn unmatched_prefix_is_unknown() {
        assert!(config().classify("/topic2/test-service").is_none());
        assert!(config().classify("unrelated").is_none());
    }

    #[test]
    fn empty_channel_suffix_is_unknown() {
        assert!(config().classify("/topic/").is_none());
        assert!(config().classify("/pub/queue/").is_none());
    }

    #[test]
    fn disabled_prefixes_are_skipped() {
        let config = EndpointConfig {
            user_queue_prefix: "/user/queue".into(),
            ..EndpointConfig::default()
        }
        .normalized();
        assert!(config.classify("/topic/test-service").is_none());
        let classified = config.classify("/user/queue/ch").expect("classified");
        assert_eq!(classified.kind, DestinationKind::UserQueue);
    }
}
