use std::sync::Arc;

use crate::{
    domain::{ChannelId, Post, TeamId, UserId},
    events::types::{MessageKind, RawEvent},
};

/// A fully resolved chat event, ready for the consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub text: String,
    /// Normalized channel name; the author's username for direct messages.
    pub channel: Option<String>,
    pub team: Option<String>,
    pub channel_id: ChannelId,
    pub team_id: Option<TeamId>,
    pub user_id: UserId,
    pub username: String,
    pub kind: MessageKind,
    /// Server-side post type (`""` for ordinary posts, `system_*` for system messages).
    pub post_type: String,
    pub post: Post,
    pub raw: Arc<RawEvent>,
}
