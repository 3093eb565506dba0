//! Channel naming and subscription rules.

use super::message::MessageError;

pub const DEBATES: &str = "debates";
pub const EXTRACTIONS: &str = "extractions";
pub const SYSTEM: &str = "system";

/// Fixed channels advertised in the welcome message.
pub const WELL_KNOWN_CHANNELS: [&str; 3] = [DEBATES, EXTRACTIONS, SYSTEM];

const DEBATE_PREFIX: &str = "debate:";
const USER_PREFIX: &str = "user:";

/// Per-resource channel for one debate.
pub fn debate_channel(debate_id: &str) -> String {
    format!("{DEBATE_PREFIX}{debate_id}")
}

/// Channel private to one user.
pub fn user_channel(user_id: &str) -> String {
    format!("{USER_PREFIX}{user_id}")
}

/// Check that a connection owned by `user_id` may subscribe to `channel`.
///
/// Accepted: a well-known channel, the connection's own user channel, or any
/// `debate:<id>` with a non-empty id.
pub fn validate_subscription(channel: &str, user_id: Option<&str>) -> Result<(), MessageError> {
    if WELL_KNOWN_CHANNELS.contains(&channel) {
        return Ok(());
    }

    if let Some(id) = channel.strip_prefix(DEBATE_PREFIX)
        && !id.is_empty()
    {
        return Ok(());
    }

    if let (Some(requested), Some(own)) = (channel.strip_prefix(USER_PREFIX), user_id)
        && requested == own
    {
        return Ok(());
    }

    Err(MessageError::ChannelRejected(channel.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_channels() {
        for channel in WELL_KNOWN_CHANNELS {
            assert!(validate_subscription(channel, None).is_ok());
        }
        assert!(validate_subscription("debate:d1", None).is_ok());
        assert!(validate_subscription("user:42", Some("42")).is_ok());
    }

    #[test]
    fn rejects_foreign_and_unknown_channels() {
        assert!(validate_subscription("user:42", Some("7")).is_err());
        assert!(validate_subscription("user:42", None).is_err());
        assert!(validate_subscription("user", Some("42")).is_err());
        assert!(validate_subscription("debate:", None).is_err());
        assert!(validate_subscription("admin", None).is_err());
        assert_eq!(
            validate_subscription("Debates", None),
            Err(MessageError::ChannelRejected("Debates".to_string()))
        );
    }

    #[test]
    fn builds_resource_channels() {
        assert_eq!(debate_channel("d1"), "debate:d1");
        assert_eq!(user_channel("42"), "user:42");
    }
}
