//! Routing engine
//!
//! Decides which class of supporter a new session is restricted to. Every
//! entry point that creates a session calls [`route`]; nothing else decides
//! the routing target.

use harbor_shared::{RoutingTarget, Topic, Urgency};

/// Topics that always require a professional counselor
pub const SENSITIVE_TOPICS: &[Topic] = &[Topic::Anxiety, Topic::Health, Topic::Family];

/// Map intake urgency and topic to a routing target.
///
/// Rules in priority order: crisis or high urgency goes to a counselor, a
/// sensitive topic goes to a counselor, everything else goes to a peer.
pub fn route(urgency: Urgency, topic: Topic) -> RoutingTarget {
    match urgency {
        Urgency::Crisis | Urgency::High => RoutingTarget::Counselor,
        Urgency::Medium | Urgency::Low if SENSITIVE_TOPICS.contains(&topic) => {
            RoutingTarget::Counselor
        }
        Urgency::Medium | Urgency::Low => RoutingTarget::PeerSupporter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_URGENCIES: [Urgency; 4] = [Urgency::Low, Urgency::Medium, Urgency::High, Urgency::Crisis];
    const ALL_TOPICS: [Topic; 13] = [
        Topic::Anxiety,
        Topic::Depression,
        Topic::Stress,
        Topic::Loneliness,
        Topic::Relationships,
        Topic::Family,
        Topic::Health,
        Topic::Grief,
        Topic::Academic,
        Topic::Work,
        Topic::Sleep,
        Topic::Identity,
        Topic::Other,
    ];

    #[test]
    fn test_sensitive_topic_overrides_medium_urgency() {
        assert_eq!(route(Urgency::Medium, Topic::Anxiety), RoutingTarget::Counselor);
    }

    #[test]
    fn test_low_urgency_ordinary_topic_goes_to_peer() {
        assert_eq!(route(Urgency::Low, Topic::Sleep), RoutingTarget::PeerSupporter);
    }

    #[test]
    fn test_crisis_and_high_always_counselor() {
        for topic in ALL_TOPICS {
            assert_eq!(route(Urgency::Crisis, topic), RoutingTarget::Counselor);
            assert_eq!(route(Urgency::High, topic), RoutingTarget::Counselor);
        }
    }

    #[test]
    fn test_routing_is_deterministic() {
        for urgency in ALL_URGENCIES {
            for topic in ALL_TOPICS {
                assert_eq!(route(urgency, topic), route(urgency, topic));
            }
        }
    }

    #[test]
    fn test_non_sensitive_topics_route_to_peer_below_high() {
        for topic in ALL_TOPICS.iter().filter(|t| !SENSITIVE_TOPICS.contains(t)) {
            assert_eq!(route(Urgency::Low, *topic), RoutingTarget::PeerSupporter);
            assert_eq!(route(Urgency::Medium, *topic), RoutingTarget::PeerSupporter);
        }
    }
}
