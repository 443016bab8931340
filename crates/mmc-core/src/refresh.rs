//! Pulls authoritative channel and user lists into the [`EntityCache`].

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    cache::EntityCache,
    config::Config,
    domain::{Channel, ChannelId, TeamId, User, UserId},
    ports::DirectoryPort,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct RefreshSettings {
    pub user_page_size: usize,
    /// Pause between user pages to stay under the server's rate limit.
    pub user_page_delay: Duration,
    pub channel_page_size: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            user_page_size: 200,
            user_page_delay: Duration::from_millis(300),
            channel_page_size: 5000,
        }
    }
}

impl From<&Config> for RefreshSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            user_page_size: cfg.user_page_size,
            user_page_delay: cfg.user_page_delay,
            channel_page_size: cfg.channel_page_size,
        }
    }
}

pub struct Refresher {
    directory: Arc<dyn DirectoryPort>,
    cache: Arc<EntityCache>,
    /// The session user; member channel lists are fetched for them.
    me: UserId,
    settings: RefreshSettings,
}

impl Refresher {
    pub fn new(
        directory: Arc<dyn DirectoryPort>,
        cache: Arc<EntityCache>,
        me: UserId,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            directory,
            cache,
            me,
            settings,
        }
    }

    /// Page through the whole user directory, merging each page as it arrives.
    ///
    /// The first failing page aborts the refresh; pages merged before it stay.
    /// Returns the number of users merged.
    pub async fn refresh_users(&self) -> Result<usize> {
        let mut page = 0usize;
        let mut merged = 0usize;
        loop {
            let users = self
                .directory
                .users_page(page, self.settings.user_page_size)
                .await?;
            if users.is_empty() {
                break;
            }
            merged += users.len();
            self.cache.merge_users(users).await;
            page += 1;
            if !self.settings.user_page_delay.is_zero() {
                sleep(self.settings.user_page_delay).await;
            }
        }
        debug!(pages = page, users = merged, "user directory refreshed");
        Ok(merged)
    }

    /// Re-fetch one user unconditionally, overwriting any cached copy.
    pub async fn refresh_user(&self, id: &UserId) -> Result<User> {
        let user = self.directory.user(id).await?;
        self.cache.insert_user(user.clone()).await;
        Ok(user)
    }

    /// Replace a team's member list, then its non-member list.
    ///
    /// Each list is written as soon as its fetch succeeds, so a failure on the
    /// second call leaves the new member list next to the old non-member list.
    pub async fn refresh_channels_for_team(&self, team: &TeamId) -> Result<()> {
        let member = self.directory.member_channels(team, &self.me).await?;
        let count = member.len();
        if !self.cache.replace_member_channels(team, member).await {
            warn!(team_id = %team, "refreshed channels for a team that is not cached");
        }

        let more = self
            .directory
            .more_channels(team, 0, self.settings.channel_page_size)
            .await?;
        // the public listing includes joined channels; keep only the unjoined ones
        let joined: Vec<ChannelId> = self
            .cache
            .teams()
            .await
            .into_iter()
            .filter(|t| t.id() == team)
            .flat_map(|t| t.channels.into_iter().map(|c| c.id))
            .collect();
        let more: Vec<Channel> = more.into_iter().filter(|c| !joined.contains(&c.id)).collect();
        debug!(team_id = %team, member = count, unjoined = more.len(), "channels refreshed");
        self.cache.replace_more_channels(team, more).await;
        Ok(())
    }

    /// Refresh every team, primary first, stopping at the first failure.
    pub async fn refresh_all_channels(&self) -> Result<()> {
        for team in self.cache.team_ids().await {
            self.refresh_channels_for_team(&team).await?;
        }
        Ok(())
    }

    /// Fetch a channel missing from the cache and attach it to its team.
    pub async fn resolve_channel(&self, id: &ChannelId) -> Option<Channel> {
        match self.directory.channel(id).await {
            Ok(channel) => {
                info!(channel_id = %id, name = %channel.name, "fetched unknown channel");
                if !self.cache.insert_channel(channel.clone()).await {
                    warn!(channel_id = %id, "no cached team owns channel");
                }
                Some(channel)
            }
            Err(e) => {
                warn!(channel_id = %id, "channel lookup failed: {e}");
                None
            }
        }
    }
}
