//! The two maps the linking engine keeps consistent.

/// Channel name to shared inventory store.
pub mod channels;
/// Container to channel bindings.
pub mod membership;

pub use channels::{validate_channel_name, ChannelStore};
pub use membership::MembershipMap;
