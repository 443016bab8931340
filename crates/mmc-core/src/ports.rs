use async_trait::async_trait;

use crate::{
    domain::{
        Channel, ChannelId, NewPost, Post, PostId, PostList, TeamId, TeamInfo, User, UserId,
        UserStatus,
    },
    Result,
};

/// Read side of the remote service: everything the cache is populated from.
///
/// Implemented by the HTTP adapter; tests use in-memory fakes.
#[async_trait]
pub trait DirectoryPort: Send + Sync {
    /// The user the session is authenticated as.
    async fn me(&self) -> Result<User>;

    async fn teams_for_user(&self, user: &UserId) -> Result<Vec<TeamInfo>>;

    async fn user(&self, id: &UserId) -> Result<User>;

    /// One page of the user directory. An empty page marks the end.
    async fn users_page(&self, page: usize, per_page: usize) -> Result<Vec<User>>;

    /// Channels of `team` that `user` is a member of (including direct/group channels).
    async fn member_channels(&self, team: &TeamId, user: &UserId) -> Result<Vec<Channel>>;

    /// Public channels of `team` the user has not joined.
    async fn more_channels(&self, team: &TeamId, page: usize, per_page: usize)
        -> Result<Vec<Channel>>;

    async fn channel(&self, id: &ChannelId) -> Result<Channel>;

    async fn user_statuses(&self, ids: &[UserId]) -> Result<Vec<(UserId, UserStatus)>>;
}

/// One-shot REST calls that do not touch the cache.
#[async_trait]
pub trait ActionPort: Send + Sync {
    async fn create_post(&self, post: &NewPost) -> Result<Post>;
    async fn update_post(&self, id: &PostId, message: &str) -> Result<Post>;
    async fn delete_post(&self, id: &PostId) -> Result<()>;

    async fn posts_for_channel(&self, channel: &ChannelId, page: usize, per_page: usize)
        -> Result<PostList>;
    async fn posts_since(&self, channel: &ChannelId, since_millis: i64) -> Result<PostList>;
    async fn search_posts(&self, team: &TeamId, terms: &str) -> Result<PostList>;

    async fn file_link(&self, file_id: &str) -> Result<String>;
    /// Upload a file into `channel`, returning the new file id.
    async fn upload_file(&self, channel: &ChannelId, filename: &str, data: Vec<u8>)
        -> Result<String>;

    async fn create_direct_channel(&self, a: &UserId, b: &UserId) -> Result<Channel>;
    async fn add_channel_member(&self, channel: &ChannelId, user: &UserId) -> Result<()>;
    async fn update_channel_header(&self, channel: &ChannelId, header: &str) -> Result<()>;
    async fn channel_member_ids(&self, channel: &ChannelId) -> Result<Vec<UserId>>;
    async fn last_viewed_at(&self, channel: &ChannelId, user: &UserId) -> Result<i64>;
    async fn view_channel(&self, user: &UserId, channel: &ChannelId) -> Result<()>;

    async fn user_status(&self, id: &UserId) -> Result<UserStatus>;
    async fn update_user_status(&self, id: &UserId, status: UserStatus) -> Result<()>;
    async fn update_nickname(&self, id: &UserId, nickname: &str) -> Result<()>;
}
