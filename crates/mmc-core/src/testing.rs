//! In-memory fakes shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{
        Channel, ChannelId, ChannelType, NewPost, Post, PostId, PostList, TeamId, TeamInfo, User,
        UserId, UserStatus,
    },
    errors::Error,
    ports::{ActionPort, DirectoryPort},
    Result,
};

pub fn user(id: &str, username: &str) -> User {
    User {
        id: UserId::from(id),
        username: username.to_string(),
        nickname: format!("{username}-nick"),
        status: UserStatus::Offline,
    }
}

pub fn team_info(id: &str, name: &str) -> TeamInfo {
    TeamInfo {
        id: TeamId::from(id),
        name: name.to_string(),
        display_name: name.to_uppercase(),
    }
}

pub fn channel(id: &str, name: &str, team: &str) -> Channel {
    Channel {
        id: ChannelId::from(id),
        name: name.to_string(),
        display_name: name.to_string(),
        kind: ChannelType::Public,
        header: format!("header of {name}"),
        team_id: Some(TeamId::from(team)),
    }
}

pub fn group_channel(id: &str, display_name: &str) -> Channel {
    Channel {
        id: ChannelId::from(id),
        name: format!("hash-{id}"),
        display_name: display_name.to_string(),
        kind: ChannelType::Group,
        header: String::new(),
        team_id: None,
    }
}

fn not_found(what: &str) -> Error {
    Error::Api {
        status: 404,
        id: "app.not_found".to_string(),
        message: format!("{what} not found"),
    }
}

fn unavailable() -> Error {
    Error::External("service unavailable".to_string())
}

#[derive(Default)]
pub struct FakeDirectory {
    pub me: Mutex<Option<User>>,
    pub teams: Mutex<Vec<TeamInfo>>,
    pub users: Mutex<HashMap<UserId, User>>,
    pub user_delay: Mutex<Duration>,
    pub user_pages: Mutex<Vec<Vec<User>>>,
    /// Page index at which `users_page` starts failing.
    pub fail_users_page: Mutex<Option<usize>>,
    pub member: Mutex<HashMap<TeamId, Vec<Channel>>>,
    pub more: Mutex<HashMap<TeamId, Vec<Channel>>>,
    pub fail_member: Mutex<HashSet<TeamId>>,
    pub fail_more: Mutex<HashSet<TeamId>>,
    pub channels: Mutex<HashMap<ChannelId, Channel>>,
    pub statuses: Mutex<Vec<(UserId, UserStatus)>>,

    pub user_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub member_calls: AtomicUsize,
    pub more_calls: AtomicUsize,
    pub channel_calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn add_user(&self, u: User) {
        self.users.lock().unwrap().insert(u.id.clone(), u);
    }

    pub fn set_user_delay(&self, d: Duration) {
        *self.user_delay.lock().unwrap() = d;
    }

    pub fn set_member(&self, team: &str, channels: Vec<Channel>) {
        self.member
            .lock()
            .unwrap()
            .insert(TeamId::from(team), channels);
    }

    pub fn set_more(&self, team: &str, channels: Vec<Channel>) {
        self.more.lock().unwrap().insert(TeamId::from(team), channels);
    }

    pub fn fail_member_for(&self, team: &str) {
        self.fail_member.lock().unwrap().insert(TeamId::from(team));
    }

    pub fn fail_more_for(&self, team: &str) {
        self.fail_more.lock().unwrap().insert(TeamId::from(team));
    }

    pub fn add_channel(&self, c: Channel) {
        self.channels.lock().unwrap().insert(c.id.clone(), c);
    }
}

#[async_trait]
impl DirectoryPort for FakeDirectory {
    async fn me(&self) -> Result<User> {
        self.me.lock().unwrap().clone().ok_or_else(|| not_found("me"))
    }

    async fn teams_for_user(&self, _user: &UserId) -> Result<Vec<TeamInfo>> {
        Ok(self.teams.lock().unwrap().clone())
    }

    async fn user(&self, id: &UserId) -> Result<User> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.user_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.users
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("user"))
    }

    async fn users_page(&self, page: usize, _per_page: usize) -> Result<Vec<User>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_users_page
            .lock()
            .unwrap()
            .is_some_and(|at| page >= at)
        {
            return Err(unavailable());
        }
        Ok(self
            .user_pages
            .lock()
            .unwrap()
            .get(page)
            .cloned()
            .unwrap_or_default())
    }

    async fn member_channels(&self, team: &TeamId, _user: &UserId) -> Result<Vec<Channel>> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_member.lock().unwrap().contains(team) {
            return Err(unavailable());
        }
        Ok(self
            .member
            .lock()
            .unwrap()
            .get(team)
            .cloned()
            .unwrap_or_default())
    }

    async fn more_channels(
        &self,
        team: &TeamId,
        _page: usize,
        _per_page: usize,
    ) -> Result<Vec<Channel>> {
        self.more_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_more.lock().unwrap().contains(team) {
            return Err(unavailable());
        }
        Ok(self
            .more
            .lock()
            .unwrap()
            .get(team)
            .cloned()
            .unwrap_or_default())
    }

    async fn channel(&self, id: &ChannelId) -> Result<Channel> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        self.channels
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("channel"))
    }

    async fn user_statuses(&self, ids: &[UserId]) -> Result<Vec<(UserId, UserStatus)>> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .cloned()
            .collect())
    }
}

/// Records every call as a short string; lookups are served from the public fields.
#[derive(Default)]
pub struct FakeActions {
    pub log: Mutex<Vec<String>>,
    pub links: Mutex<HashMap<String, String>>,
    pub last_viewed: Mutex<Option<i64>>,
    pub members: Mutex<Vec<UserId>>,
}

impl FakeActions {
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ActionPort for FakeActions {
    async fn create_post(&self, post: &NewPost) -> Result<Post> {
        self.record(format!("create_post {} {}", post.channel_id, post.message));
        Ok(Post {
            id: PostId::from("new-post"),
            channel_id: post.channel_id.clone(),
            message: post.message.clone(),
            ..Default::default()
        })
    }

    async fn update_post(&self, id: &PostId, message: &str) -> Result<Post> {
        self.record(format!("update_post {id} {message}"));
        Ok(Post {
            id: id.clone(),
            message: message.to_string(),
            ..Default::default()
        })
    }

    async fn delete_post(&self, id: &PostId) -> Result<()> {
        self.record(format!("delete_post {id}"));
        Ok(())
    }

    async fn posts_for_channel(
        &self,
        channel: &ChannelId,
        page: usize,
        per_page: usize,
    ) -> Result<PostList> {
        self.record(format!("posts_for_channel {channel} {page} {per_page}"));
        Ok(PostList::default())
    }

    async fn posts_since(&self, channel: &ChannelId, since_millis: i64) -> Result<PostList> {
        self.record(format!("posts_since {channel} {since_millis}"));
        Ok(PostList::default())
    }

    async fn search_posts(&self, team: &TeamId, terms: &str) -> Result<PostList> {
        self.record(format!("search_posts {team} {terms}"));
        Ok(PostList::default())
    }

    async fn file_link(&self, file_id: &str) -> Result<String> {
        self.links
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| not_found("file link"))
    }

    async fn upload_file(
        &self,
        channel: &ChannelId,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.record(format!("upload_file {channel} {filename} {}", data.len()));
        Ok("file-1".to_string())
    }

    async fn create_direct_channel(&self, a: &UserId, b: &UserId) -> Result<Channel> {
        self.record(format!("create_direct_channel {a} {b}"));
        Ok(Channel {
            id: ChannelId::from("dm-created"),
            name: crate::domain::direct_channel_name(a, b),
            display_name: String::new(),
            kind: ChannelType::Direct,
            header: String::new(),
            team_id: None,
        })
    }

    async fn add_channel_member(&self, channel: &ChannelId, user: &UserId) -> Result<()> {
        self.record(format!("add_channel_member {channel} {user}"));
        Ok(())
    }

    async fn update_channel_header(&self, channel: &ChannelId, header: &str) -> Result<()> {
        self.record(format!("update_channel_header {channel} {header}"));
        Ok(())
    }

    async fn channel_member_ids(&self, _channel: &ChannelId) -> Result<Vec<UserId>> {
        Ok(self.members.lock().unwrap().clone())
    }

    async fn last_viewed_at(&self, _channel: &ChannelId, _user: &UserId) -> Result<i64> {
        let at = *self.last_viewed.lock().unwrap();
        at.ok_or_else(unavailable)
    }

    async fn view_channel(&self, user: &UserId, channel: &ChannelId) -> Result<()> {
        self.record(format!("view_channel {user} {channel}"));
        Ok(())
    }

    async fn user_status(&self, _id: &UserId) -> Result<UserStatus> {
        Ok(UserStatus::Online)
    }

    async fn update_user_status(&self, id: &UserId, status: UserStatus) -> Result<()> {
        self.record(format!("update_user_status {id} {}", status.as_str()));
        Ok(())
    }

    async fn update_nickname(&self, id: &UserId, nickname: &str) -> Result<()> {
        self.record(format!("update_nickname {id} {nickname}"));
        Ok(())
    }
}
