//! Group addressing shared by the push gateway and anything that publishes to it.

use std::fmt::Display;

/// Group every authenticated connection joins; presence events go here.
pub const BROADCAST_GROUP: &str = "broadcast";

/// Personal group of a single user: every connection that user holds.
pub fn user_group(user_id: impl Display) -> String {
    format!("user_{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_group_is_prefixed_with_user() {
        assert_eq!(user_group(7), "user_7");
        assert_eq!(user_group("42"), "user_42");
    }

    #[test]
    fn broadcast_group_never_collides_with_a_user_group() {
        assert!(!BROADCAST_GROUP.starts_with("user_"));
    }
}
