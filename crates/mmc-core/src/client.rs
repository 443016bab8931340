//! Caller-facing facade: cache reads, refreshes, the event API and REST passthroughs.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{
    cache::{ChannelOwner, EntityCache},
    config::Config,
    dedup::DedupFilter,
    domain::{
        direct_channel_name, Channel, ChannelId, NewPost, PostId, PostList, TeamId, User, UserId,
        UserStatus,
    },
    errors::Error,
    events::{pump, EventStreams, Frame, Normalizer},
    ports::{ActionPort, DirectoryPort},
    refresh::{RefreshSettings, Refresher},
    Result,
};

pub struct Client {
    cfg: Arc<Config>,
    me: User,
    directory: Arc<dyn DirectoryPort>,
    actions: Arc<dyn ActionPort>,
    cache: Arc<EntityCache>,
    refresher: Arc<Refresher>,
    normalizer: Arc<Normalizer>,
}

impl Client {
    /// Build a client around an empty cache. Most callers want [`Client::bootstrap`].
    pub fn new(
        cfg: Arc<Config>,
        me: User,
        directory: Arc<dyn DirectoryPort>,
        actions: Arc<dyn ActionPort>,
    ) -> Self {
        let cache = Arc::new(EntityCache::new(directory.clone()));
        let refresher = Arc::new(Refresher::new(
            directory.clone(),
            cache.clone(),
            me.id.clone(),
            RefreshSettings::from(cfg.as_ref()),
        ));
        let dedup = Arc::new(DedupFilter::new(cfg.dedup_capacity));
        let normalizer = Arc::new(Normalizer::new(cache.clone(), dedup, refresher.clone()));
        Self {
            cfg,
            me,
            directory,
            actions,
            cache,
            refresher,
            normalizer,
        }
    }

    /// Resolve the session user and teams, then fill the cache.
    pub async fn bootstrap(
        cfg: Arc<Config>,
        directory: Arc<dyn DirectoryPort>,
        actions: Arc<dyn ActionPort>,
    ) -> Result<Self> {
        let me = directory.me().await?;
        let teams = directory.teams_for_user(&me.id).await?;

        let primary = teams
            .iter()
            .find(|t| {
                t.name.eq_ignore_ascii_case(&cfg.team)
                    || t.display_name.eq_ignore_ascii_case(&cfg.team)
            })
            .map(|t| t.id.clone())
            .ok_or_else(|| {
                let known = teams
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Error::Config(format!(
                    "team {:?} not found; {} is a member of: {known}",
                    cfg.team, me.username
                ))
            })?;

        let client = Self::new(cfg, me, directory, actions);
        client.cache.set_teams(&primary, teams).await;
        client.cache.insert_user(client.me.clone()).await;

        client.refresher.refresh_all_channels().await?;
        let users = client.refresher.refresh_users().await?;
        info!(
            user = %client.me.username,
            team_id = %primary,
            channels = client.cache.list_channels().await.len(),
            users,
            "session bootstrapped"
        );
        Ok(client)
    }

    pub fn me(&self) -> &User {
        &self.me
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Start normalizing frames from the transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, frames: mpsc::Receiver<Frame>) -> EventStreams {
        pump::spawn(self.normalizer.clone(), frames, self.cfg.event_buffer)
    }

    // ============== Refresh ==============

    pub async fn refresh_users(&self) -> Result<usize> {
        self.refresher.refresh_users().await
    }

    pub async fn refresh_user(&self, id: &UserId) -> Result<User> {
        self.refresher.refresh_user(id).await
    }

    pub async fn refresh_channels_for_team(&self, team: &TeamId) -> Result<()> {
        self.refresher.refresh_channels_for_team(team).await
    }

    pub async fn refresh_all_channels(&self) -> Result<()> {
        self.refresher.refresh_all_channels().await
    }

    // ============== Reads ==============

    pub async fn list_channels(&self) -> Vec<Channel> {
        self.cache.list_channels().await
    }

    pub async fn list_unjoined_channels(&self) -> Vec<Channel> {
        self.cache.list_unjoined_channels().await
    }

    pub async fn find_channel_id(&self, name: &str, team: Option<&TeamId>) -> Option<ChannelId> {
        self.cache.find_channel_id(name, team).await
    }

    pub async fn channel_name(&self, id: &ChannelId) -> Option<String> {
        self.cache.channel_name(id).await
    }

    pub async fn channel_header(&self, id: &ChannelId) -> Option<String> {
        self.cache.channel_header(id).await
    }

    pub async fn channel_team_id(&self, id: &ChannelId) -> Option<TeamId> {
        self.cache.channel_team_id(id).await
    }

    pub async fn team_from_channel(&self, id: &ChannelId) -> Option<ChannelOwner> {
        self.cache.team_from_channel(id).await
    }

    pub async fn team_name(&self, id: &TeamId) -> Option<String> {
        self.cache.team_name(id).await
    }

    pub async fn primary_team_id(&self) -> Option<TeamId> {
        self.cache.primary_team_id().await
    }

    pub async fn user_by_id(&self, id: &UserId) -> Option<User> {
        self.cache.user(id).await
    }

    pub async fn user_name(&self, id: &UserId) -> Option<String> {
        self.cache.user(id).await.map(|u| u.username)
    }

    pub async fn nick_name(&self, id: &UserId) -> Option<String> {
        self.cache.user(id).await.map(|u| u.nickname)
    }

    pub async fn all_users(&self) -> HashMap<UserId, User> {
        self.cache.all_users().await
    }

    /// Presence of every cached user; also recorded on the cached records.
    pub async fn statuses(&self) -> Result<HashMap<UserId, UserStatus>> {
        let ids = self.cache.user_ids().await;
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let statuses = self.directory.user_statuses(&ids).await?;
        self.cache.apply_statuses(&statuses).await;
        Ok(statuses.into_iter().collect())
    }

    pub async fn status(&self, id: &UserId) -> Result<UserStatus> {
        self.actions.user_status(id).await
    }

    // ============== Posts ==============

    pub async fn post_message(
        &self,
        channel: &ChannelId,
        text: &str,
        root: Option<&PostId>,
    ) -> Result<PostId> {
        self.post_message_with_files(channel, text, root, Vec::new())
            .await
    }

    pub async fn post_message_with_files(
        &self,
        channel: &ChannelId,
        text: &str,
        root: Option<&PostId>,
        file_ids: Vec<String>,
    ) -> Result<PostId> {
        let post = NewPost {
            channel_id: channel.clone(),
            message: text.to_string(),
            root_id: root.map(|r| r.0.clone()).unwrap_or_default(),
            file_ids,
            ..Default::default()
        };
        Ok(self.actions.create_post(&post).await?.id)
    }

    pub async fn edit_message(&self, id: &PostId, text: &str) -> Result<PostId> {
        Ok(self.actions.update_post(id, text).await?.id)
    }

    pub async fn delete_message(&self, id: &PostId) -> Result<()> {
        self.actions.delete_post(id).await
    }

    /// The latest `limit` posts of a channel.
    pub async fn posts(&self, channel: &ChannelId, limit: usize) -> Result<PostList> {
        self.actions.posts_for_channel(channel, 0, limit).await
    }

    pub async fn posts_since(&self, channel: &ChannelId, since_millis: i64) -> Result<PostList> {
        self.actions.posts_since(channel, since_millis).await
    }

    /// Search posts in the primary team.
    pub async fn search_posts(&self, terms: &str) -> Result<PostList> {
        let team = self
            .primary_team_id()
            .await
            .ok_or_else(|| Error::Config("no primary team".to_string()))?;
        self.actions.search_posts(&team, terms).await
    }

    /// Send a direct message, creating the direct channel on first use.
    pub async fn send_direct_message(
        &self,
        to: &UserId,
        text: &str,
        root: Option<&PostId>,
    ) -> Result<PostId> {
        self.send_direct_message_props(to, text, root, serde_json::Map::new())
            .await
    }

    pub async fn send_direct_message_props(
        &self,
        to: &UserId,
        text: &str,
        root: Option<&PostId>,
        props: serde_json::Map<String, serde_json::Value>,
    ) -> Result<PostId> {
        debug!(to = %to, "sending direct message");
        let created = self.actions.create_direct_channel(&self.me.id, to).await?;

        if let Err(e) = self.refresher.refresh_all_channels().await {
            error!("failed to update channels: {e}");
        }

        let name = direct_channel_name(to, &self.me.id);
        let primary = self.primary_team_id().await;
        let channel_id = self
            .cache
            .find_channel_id(&name, primary.as_ref())
            .await
            .unwrap_or(created.id);

        let post = NewPost {
            channel_id,
            message: text.replace('\r', ""),
            root_id: root.map(|r| r.0.clone()).unwrap_or_default(),
            props,
            ..Default::default()
        };
        Ok(self.actions.create_post(&post).await?.id)
    }

    // ============== Files ==============

    pub async fn upload_file(
        &self,
        channel: &ChannelId,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.actions.upload_file(channel, filename, data).await
    }

    pub async fn public_link(&self, file_id: &str) -> Option<String> {
        match self.actions.file_link(file_id).await {
            Ok(link) => Some(link),
            Err(e) => {
                debug!(file_id, "no public link: {e}");
                None
            }
        }
    }

    /// Public links for the files that have one; the rest are skipped.
    pub async fn public_links(&self, file_ids: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(file_ids.len());
        for id in file_ids {
            if let Some(link) = self.public_link(id).await {
                out.push(link);
            }
        }
        out
    }

    /// A link for every file: the public link, or the authenticated API URL
    /// when public links are disabled on the server.
    pub async fn file_links(&self, file_ids: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(file_ids.len());
        for id in file_ids {
            match self.actions.file_link(id).await {
                Ok(link) => out.push(link),
                Err(_) => out.push(format!("{}/api/v4/files/{id}", self.cfg.base_url())),
            }
        }
        out
    }

    // ============== Channels ==============

    /// Join a channel unless the session is already a member in the primary team.
    pub async fn join_channel(&self, channel: &ChannelId) -> Result<()> {
        if let Some(primary) = self.primary_team_id().await {
            if self.cache.is_member(&primary, channel).await {
                debug!(channel_id = %channel, "not joining, already joined");
                return Ok(());
            }
        }
        debug!(channel_id = %channel, "joining");
        self.actions.add_channel_member(channel, &self.me.id).await
    }

    pub async fn update_channel_header(&self, channel: &ChannelId, header: &str) -> Result<()> {
        debug!(channel_id = %channel, header, "updating channel header");
        self.actions.update_channel_header(channel, header).await
    }

    pub async fn update_last_viewed(&self, channel: &ChannelId) -> Result<()> {
        debug!(channel_id = %channel, "posting last view");
        self.actions
            .view_channel(&self.me.id, channel)
            .await
            .inspect_err(|e| error!(channel_id = %channel, "channel view update failed: {e}"))
    }

    /// When the session last viewed `channel`, in epoch millis; "now" if unknown.
    pub async fn last_viewed_at(&self, channel: &ChannelId) -> i64 {
        match self.actions.last_viewed_at(channel, &self.me.id).await {
            Ok(at) => at,
            Err(e) => {
                debug!(channel_id = %channel, "last viewed lookup failed: {e}");
                Utc::now().timestamp_millis()
            }
        }
    }

    /// Nicknames of the channel's members that are in the cache.
    pub async fn usernames_in_channel(&self, channel: &ChannelId) -> Result<Vec<String>> {
        let members = self
            .actions
            .channel_member_ids(channel)
            .await
            .inspect_err(|e| error!(channel_id = %channel, "listing members failed: {e}"))?;
        let users = self.cache.all_users().await;
        Ok(members
            .iter()
            .filter_map(|id| users.get(id).map(|u| u.nickname.clone()))
            .collect())
    }

    // ============== Users ==============

    pub async fn update_status(&self, id: &UserId, status: UserStatus) -> Result<()> {
        self.actions.update_user_status(id, status).await
    }

    pub async fn update_user_nick(&self, nickname: &str) -> Result<()> {
        self.actions.update_nickname(&self.me.id, nickname).await?;
        if !self.cache.set_nickname(&self.me.id, nickname).await {
            let mut me = self.me.clone();
            me.nickname = nickname.to_string();
            self.cache.insert_user(me).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::{
        config::test_config,
        testing::{channel, team_info, user, FakeActions, FakeDirectory},
    };

    fn directory() -> Arc<FakeDirectory> {
        let dir = Arc::new(FakeDirectory::default());
        *dir.me.lock().unwrap() = Some(user("me", "bot"));
        *dir.teams.lock().unwrap() = vec![team_info("t2", "other"), team_info("t1", "home")];
        dir.set_member("t1", vec![channel("c1", "town-square", "t1")]);
        dir.set_member("t2", vec![channel("c2", "dev", "t2")]);
        *dir.user_pages.lock().unwrap() = vec![vec![user("u1", "alice"), user("u2", "bob")]];
        dir
    }

    async fn client(dir: Arc<FakeDirectory>, actions: Arc<FakeActions>) -> Client {
        Client::bootstrap(Arc::new(test_config()), dir, actions)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn bootstrap_selects_primary_team_and_fills_cache() {
        let c = client(directory(), Arc::new(FakeActions::default())).await;

        assert_eq!(c.primary_team_id().await, Some(TeamId::from("t1")));
        let names: Vec<_> = c.list_channels().await.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["town-square", "dev"]);
        // me plus the directory
        assert_eq!(c.all_users().await.len(), 3);
        assert_eq!(c.user_name(&UserId::from("u2")).await.as_deref(), Some("bob"));
        assert_eq!(c.nick_name(&UserId::from("u1")).await.as_deref(), Some("alice-nick"));
    }

    #[tokio::test]
    async fn bootstrap_fails_for_unknown_team() {
        let dir = directory();
        *dir.teams.lock().unwrap() = vec![team_info("t2", "other")];
        let err = Client::bootstrap(
            Arc::new(test_config()),
            dir,
            Arc::new(FakeActions::default()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::Config(m) if m.contains("other")));
    }

    #[tokio::test]
    async fn second_user_lookup_is_served_from_cache() {
        let dir = directory();
        let c = client(dir.clone(), Arc::new(FakeActions::default())).await;
        dir.add_user(user("u9", "zed"));
        dir.set_user_delay(Duration::from_millis(100));

        let start = Instant::now();
        assert!(c.user_by_id(&UserId::from("u9")).await.is_some());
        let miss = start.elapsed();

        let start = Instant::now();
        assert!(c.user_by_id(&UserId::from("u9")).await.is_some());
        let hit = start.elapsed();

        assert!(miss >= Duration::from_millis(100));
        assert!(hit * 10 < miss, "hit took {hit:?}, miss took {miss:?}");
    }

    #[tokio::test]
    async fn statuses_cover_cached_users() {
        let dir = directory();
        *dir.statuses.lock().unwrap() = vec![
            (UserId::from("u1"), UserStatus::Online),
            (UserId::from("u2"), UserStatus::Away),
        ];
        let c = client(dir, Arc::new(FakeActions::default())).await;

        let st = c.statuses().await.unwrap();
        assert_eq!(st[&UserId::from("u1")], UserStatus::Online);
        assert_eq!(st[&UserId::from("u2")], UserStatus::Away);
        assert_eq!(
            c.user_by_id(&UserId::from("u2")).await.unwrap().status,
            UserStatus::Away
        );
    }

    #[tokio::test]
    async fn join_channel_skips_existing_membership() {
        let actions = Arc::new(FakeActions::default());
        let c = client(directory(), actions.clone()).await;

        c.join_channel(&ChannelId::from("c1")).await.unwrap();
        assert!(actions.calls().is_empty());

        c.join_channel(&ChannelId::from("c9")).await.unwrap();
        assert_eq!(actions.calls(), vec!["add_channel_member c9 me"]);
    }

    #[tokio::test]
    async fn direct_message_posts_into_created_channel() {
        let dir = directory();
        let actions = Arc::new(FakeActions::default());
        let c = client(dir.clone(), actions.clone()).await;

        let mut dm = channel("d1", "me__u1", "t1");
        dm.kind = crate::domain::ChannelType::Direct;
        dm.team_id = None;
        dir.set_member("t1", vec![channel("c1", "town-square", "t1"), dm]);

        c.send_direct_message(&UserId::from("u1"), "hi\r\nthere", None)
            .await
            .unwrap();

        let calls = actions.calls();
        assert_eq!(calls[0], "create_direct_channel me u1");
        assert_eq!(calls[1], "create_post d1 hi\nthere");
        assert_eq!(
            c.find_channel_id("me__u1", Some(&TeamId::from("t1"))).await,
            Some(ChannelId::from("d1"))
        );
    }

    #[tokio::test]
    async fn file_links_fall_back_to_api_url() {
        let actions = Arc::new(FakeActions::default());
        actions.links.lock().unwrap().insert("f1".into(), "https://x/pub/f1".into());
        let c = client(directory(), actions).await;

        let ids = vec!["f1".to_string(), "f2".to_string()];
        assert_eq!(
            c.file_links(&ids).await,
            vec![
                "https://x/pub/f1".to_string(),
                "https://chat.example.com/api/v4/files/f2".to_string()
            ]
        );
        assert_eq!(c.public_links(&ids).await, vec!["https://x/pub/f1".to_string()]);
        assert_eq!(c.public_link("f2").await, None);
    }

    #[tokio::test]
    async fn last_viewed_at_falls_back_to_now() {
        let actions = Arc::new(FakeActions::default());
        let c = client(directory(), actions.clone()).await;

        *actions.last_viewed.lock().unwrap() = Some(42);
        assert_eq!(c.last_viewed_at(&ChannelId::from("c1")).await, 42);

        *actions.last_viewed.lock().unwrap() = None;
        let before = Utc::now().timestamp_millis();
        assert!(c.last_viewed_at(&ChannelId::from("c1")).await >= before);
    }

    #[tokio::test]
    async fn usernames_in_channel_uses_cached_nicknames() {
        let actions = Arc::new(FakeActions::default());
        *actions.members.lock().unwrap() = vec![UserId::from("u1"), UserId::from("nobody")];
        let c = client(directory(), actions).await;

        assert_eq!(
            c.usernames_in_channel(&ChannelId::from("c1")).await.unwrap(),
            vec!["alice-nick".to_string()]
        );
    }

    #[tokio::test]
    async fn update_user_nick_updates_cached_self() {
        let actions = Arc::new(FakeActions::default());
        let c = client(directory(), actions.clone()).await;

        c.update_user_nick("robo").await.unwrap();
        assert_eq!(actions.calls(), vec!["update_nickname me robo"]);
        assert_eq!(c.nick_name(&UserId::from("me")).await.as_deref(), Some("robo"));
    }

    #[tokio::test]
    async fn update_user_nick_keeps_refreshed_status() {
        let dir = directory();
        *dir.statuses.lock().unwrap() = vec![(UserId::from("me"), UserStatus::Online)];
        let c = client(dir, Arc::new(FakeActions::default())).await;
        c.statuses().await.unwrap();

        c.update_user_nick("robo").await.unwrap();
        let me = c.user_by_id(&UserId::from("me")).await.unwrap();
        assert_eq!(me.nickname, "robo");
        assert_eq!(me.status, UserStatus::Online);
    }

    #[tokio::test]
    async fn started_client_emits_messages() {
        let c = client(directory(), Arc::new(FakeActions::default())).await;
        let (tx, rx) = mpsc::channel(4);
        let mut streams = c.start(rx);

        let frame = Frame::parse(
            &serde_json::json!({
                "event": "posted",
                "data": {
                    "post": "{\"message\":\"hi\",\"user_id\":\"u1\",\"channel_id\":\"c2\"}",
                    "team_id": "t2"
                },
                "seq": 1
            })
            .to_string(),
        )
        .unwrap();
        tx.send(frame).await.unwrap();

        let m = streams.messages.recv().await.unwrap();
        assert_eq!(m.username, "alice");
        assert_eq!(m.channel.as_deref(), Some("dev"));
        assert_eq!(m.team.as_deref(), Some("other"));
    }
}
