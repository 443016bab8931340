//! Turns raw push events into [`Message`]s, updating the cache on the way.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::{
    cache::EntityCache,
    dedup::{fingerprint, DedupFilter},
    domain::{ChannelType, Post, UserId},
    events::{
        message::Message,
        types::{PostEvent, PushEvent, RawEvent},
    },
    refresh::Refresher,
};

/// Why an event produced no message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discard {
    Duplicate,
    Malformed(String),
    UnknownAuthor(UserId),
}

/// Outcome of handling one event.
#[derive(Clone, Debug, PartialEq)]
pub enum Disposition {
    Emit(Box<Message>),
    Discard(Discard),
    /// A cache update was applied; nothing to deliver.
    Applied,
    /// Event kind we do not act on.
    Ignored,
}

pub struct Normalizer {
    cache: Arc<EntityCache>,
    dedup: Arc<DedupFilter>,
    refresher: Arc<Refresher>,
}

impl Normalizer {
    pub fn new(cache: Arc<EntityCache>, dedup: Arc<DedupFilter>, refresher: Arc<Refresher>) -> Self {
        Self {
            cache,
            dedup,
            refresher,
        }
    }

    /// Handle one event. Never fails: undecodable or unattributable events
    /// are logged and discarded.
    pub async fn handle(&self, raw: RawEvent) -> Disposition {
        let raw = Arc::new(raw);
        let event = match PushEvent::decode(&raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(kind = %raw.event, seq = raw.seq, "dropping undecodable event: {e}");
                return Disposition::Discard(Discard::Malformed(e.to_string()));
            }
        };

        match event {
            PushEvent::Post(post) => self.normalize_post(post, raw).await,
            PushEvent::UserUpdated { user_id } => {
                if let Err(e) = self.refresher.refresh_user(&user_id).await {
                    warn!(user_id = %user_id, "failed to refresh updated user: {e}");
                }
                Disposition::Applied
            }
            PushEvent::GroupAdded => {
                if let Err(e) = self.refresher.refresh_all_channels().await {
                    error!("failed to update channels: {e}");
                }
                Disposition::Applied
            }
            PushEvent::Unknown { kind } => {
                trace!(kind = %kind, "ignoring event");
                Disposition::Ignored
            }
        }
    }

    async fn normalize_post(&self, event: PostEvent, raw: Arc<RawEvent>) -> Disposition {
        if self.dedup.seen(&fingerprint(&event.payload)).await {
            debug!(seq = raw.seq, "post already delivered, not processing again");
            return Disposition::Discard(Discard::Duplicate);
        }

        let post: Post = match serde_json::from_str(&event.payload) {
            Ok(post) => post,
            Err(e) => {
                debug!(seq = raw.seq, "dropping post with undecodable payload: {e}");
                return Disposition::Discard(Discard::Malformed(e.to_string()));
            }
        };

        let Some(author) = self.cache.user(&post.user_id).await else {
            info!(
                user_id = %post.user_id,
                channel_id = %post.channel_id,
                "user is not known, ignoring message"
            );
            return Disposition::Discard(Discard::UnknownAuthor(post.user_id));
        };

        let channel = if event.channel_type == Some(ChannelType::Direct) {
            // direct channels are named after the two user ids; use the sender instead
            Some(author.username.clone())
        } else {
            match self.cache.channel_name(&post.channel_id).await {
                Some(name) => Some(name),
                None => self
                    .refresher
                    .resolve_channel(&post.channel_id)
                    .await
                    .map(|c| c.normalized_name()),
            }
        };

        let team_id = match event.team_id {
            Some(id) => Some(id),
            None => self.cache.channel_team_id(&post.channel_id).await,
        };
        let team = match &team_id {
            Some(id) => self.cache.team_name(id).await,
            None => None,
        };

        Disposition::Emit(Box::new(Message {
            text: post.message.clone(),
            channel,
            team,
            channel_id: post.channel_id.clone(),
            team_id,
            user_id: author.id,
            username: author.username,
            kind: event.kind,
            post_type: post.post_type.clone(),
            post,
            raw,
        }))
    }
}
