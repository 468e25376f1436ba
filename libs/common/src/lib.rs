pub mod group;
pub mod id;

pub use group::{user_group, BROADCAST_GROUP};
