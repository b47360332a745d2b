// Topic and consumer group naming
//
// Topic names are `{entity}-{operation}`, lowercase and hyphen-separated.
// Publisher and subscriber must agree on them exactly.

use super::command::{EntityKind, Operation, Route};
use super::constants::{
    DEAD_LETTER_SUFFIX, GROUP_LOG_DELETE, GROUP_LOG_UPDATE, GROUP_POST_DELETE, GROUP_POST_UPDATE,
    TOPIC_LOG_DELETE, TOPIC_LOG_UPDATE, TOPIC_POST_DELETE, TOPIC_POST_UPDATE,
};

impl Route {
    pub fn topic(self) -> &'static str {
        match (self.entity, self.operation) {
            (EntityKind::Post, Operation::Update) => TOPIC_POST_UPDATE,
            (EntityKind::Post, Operation::Delete) => TOPIC_POST_DELETE,
            (EntityKind::Log, Operation::Update) => TOPIC_LOG_UPDATE,
            (EntityKind::Log, Operation::Delete) => TOPIC_LOG_DELETE,
        }
    }

    /// Inverse of [`Route::topic`]; `None` for topics the relay does not carry
    pub fn from_topic(topic: &str) -> Option<Route> {
        Route::ALL.into_iter().find(|route| route.topic() == topic)
    }

    pub fn default_group(self) -> &'static str {
        match (self.entity, self.operation) {
            (EntityKind::Post, Operation::Update) => GROUP_POST_UPDATE,
            (EntityKind::Post, Operation::Delete) => GROUP_POST_DELETE,
            (EntityKind::Log, Operation::Update) => GROUP_LOG_UPDATE,
            (EntityKind::Log, Operation::Delete) => GROUP_LOG_DELETE,
        }
    }

    pub fn dead_letter_topic(self) -> String {
        dead_letter_topic(self.topic())
    }
}

pub fn dead_letter_topic(topic: &str) -> String {
    format!("{}{}", topic, DEAD_LETTER_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_entity_operation() {
        for route in Route::ALL {
            assert_eq!(
                route.topic(),
                format!("{}-{}", route.entity, route.operation)
            );
        }
    }

    #[test]
    fn test_from_topic_inverse() {
        for route in Route::ALL {
            assert_eq!(Route::from_topic(route.topic()), Some(route));
        }
        assert_eq!(Route::from_topic("user-update"), None);
        assert_eq!(Route::from_topic("post-update.dlq"), None);
    }

    #[test]
    fn test_default_groups() {
        let post_update = Route::new(EntityKind::Post, Operation::Update);
        let log_delete = Route::new(EntityKind::Log, Operation::Delete);
        assert_eq!(post_update.default_group(), "post-u");
        assert_eq!(log_delete.default_group(), "log-d");
    }

    #[test]
    fn test_dead_letter_topic() {
        let route = Route::new(EntityKind::Log, Operation::Update);
        assert_eq!(route.dead_letter_topic(), "log-update.dlq");
    }
}
