//! In-memory mirror of the teams, channels and users visible to the session.
//!
//! Every accessor takes the lock for the duration of the call only and hands
//! back owned copies.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    domain::{Channel, ChannelId, ChannelType, Team, TeamId, TeamInfo, User, UserId, UserStatus},
    ports::DirectoryPort,
};

/// Which team a channel is attributed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelOwner {
    Team(TeamId),
    /// Group channels belong to no single team.
    Group,
}

#[derive(Debug, Default)]
struct CacheState {
    /// Primary team first, then secondary teams in server order.
    teams: Vec<Team>,
    users: HashMap<UserId, User>,
}

impl CacheState {
    fn team(&self, id: &TeamId) -> Option<&Team> {
        self.teams.iter().find(|t| t.id() == id)
    }

    fn team_mut(&mut self, id: &TeamId) -> Option<&mut Team> {
        self.teams.iter_mut().find(|t| t.id() == id)
    }

    fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.teams
            .iter()
            .flat_map(|t| t.all_channels())
            .find(|c| &c.id == id)
    }
}

pub struct EntityCache {
    directory: Arc<dyn DirectoryPort>,
    state: RwLock<CacheState>,
    /// Per-user gates so concurrent misses on one id share a single fetch.
    inflight: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl EntityCache {
    pub fn new(directory: Arc<dyn DirectoryPort>) -> Self {
        Self {
            directory,
            state: RwLock::new(CacheState::default()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the team set. `primary` is moved to the front; teams already
    /// cached keep their channel lists.
    pub async fn set_teams(&self, primary: &TeamId, teams: Vec<TeamInfo>) {
        let mut st = self.state.write().await;
        let mut old: Vec<Team> = std::mem::take(&mut st.teams);
        let mut next: Vec<Team> = teams
            .into_iter()
            .map(|info| match old.iter().position(|t| t.id() == &info.id) {
                Some(idx) => {
                    let mut t = old.swap_remove(idx);
                    t.info = info;
                    t
                }
                None => Team::new(info),
            })
            .collect();
        if let Some(idx) = next.iter().position(|t| t.id() == primary) {
            let t = next.remove(idx);
            next.insert(0, t);
        } else {
            warn!(team_id = %primary, "primary team not in team list");
        }
        st.teams = next;
    }

    pub async fn primary_team_id(&self) -> Option<TeamId> {
        self.state.read().await.teams.first().map(|t| t.id().clone())
    }

    /// Team ids in refresh order (primary first).
    pub async fn team_ids(&self) -> Vec<TeamId> {
        self.state
            .read()
            .await
            .teams
            .iter()
            .map(|t| t.id().clone())
            .collect()
    }

    pub async fn teams(&self) -> Vec<Team> {
        self.state.read().await.teams.clone()
    }

    // ============== Channels ==============

    /// Member channels of every team, primary team first.
    pub async fn list_channels(&self) -> Vec<Channel> {
        let st = self.state.read().await;
        st.teams.iter().flat_map(|t| t.channels.clone()).collect()
    }

    /// Channels we could join but have not.
    pub async fn list_unjoined_channels(&self) -> Vec<Channel> {
        let st = self.state.read().await;
        st.teams
            .iter()
            .flat_map(|t| t.more_channels.clone())
            .collect()
    }

    /// Look up a channel id by normalized name, optionally within one team.
    pub async fn find_channel_id(&self, name: &str, team: Option<&TeamId>) -> Option<ChannelId> {
        let st = self.state.read().await;
        let found = st
            .teams
            .iter()
            .filter(|t| team.map_or(true, |id| t.id() == id))
            .flat_map(|t| t.all_channels())
            .find(|c| c.normalized_name() == name)
            .map(|c| c.id.clone());
        found
    }

    pub async fn channel(&self, id: &ChannelId) -> Option<Channel> {
        self.state.read().await.channel(id).cloned()
    }

    pub async fn channel_name(&self, id: &ChannelId) -> Option<String> {
        self.state
            .read()
            .await
            .channel(id)
            .map(Channel::normalized_name)
    }

    pub async fn channel_header(&self, id: &ChannelId) -> Option<String> {
        self.state.read().await.channel(id).map(|c| c.header.clone())
    }

    /// The team id recorded on the channel itself (absent for direct/group channels).
    pub async fn channel_team_id(&self, id: &ChannelId) -> Option<TeamId> {
        self.state
            .read()
            .await
            .channel(id)
            .and_then(|c| c.team_id.clone())
    }

    /// The team whose channel lists contain `id`.
    pub async fn team_from_channel(&self, id: &ChannelId) -> Option<ChannelOwner> {
        let st = self.state.read().await;
        let owner = st.teams.iter().find_map(|t| {
            t.all_channels().find(|c| &c.id == id).map(|c| {
                if c.kind == ChannelType::Group {
                    ChannelOwner::Group
                } else {
                    ChannelOwner::Team(t.id().clone())
                }
            })
        });
        owner
    }

    pub async fn is_member(&self, team: &TeamId, channel: &ChannelId) -> bool {
        self.state
            .read()
            .await
            .team(team)
            .is_some_and(|t| t.channels.iter().any(|c| &c.id == channel))
    }

    pub async fn team_name(&self, id: &TeamId) -> Option<String> {
        self.state
            .read()
            .await
            .team(id)
            .map(|t| t.info.name.clone())
    }

    /// Replace a team's member channels. Returns false if the team is unknown.
    pub async fn replace_member_channels(&self, team: &TeamId, channels: Vec<Channel>) -> bool {
        let mut st = self.state.write().await;
        match st.team_mut(team) {
            Some(t) => {
                t.channels = channels;
                true
            }
            None => false,
        }
    }

    /// Replace a team's non-member channels. Returns false if the team is unknown.
    pub async fn replace_more_channels(&self, team: &TeamId, channels: Vec<Channel>) -> bool {
        let mut st = self.state.write().await;
        match st.team_mut(team) {
            Some(t) => {
                t.more_channels = channels;
                true
            }
            None => false,
        }
    }

    /// Add a single channel to its owning team's member list.
    ///
    /// Channels without a team (direct/group) go to the primary team. A copy
    /// in the non-member list is dropped so ids stay unique per team.
    pub async fn insert_channel(&self, channel: Channel) -> bool {
        let mut st = self.state.write().await;
        let target = match &channel.team_id {
            Some(id) => st.team_mut(id),
            None => st.teams.first_mut(),
        };
        let Some(team) = target else {
            return false;
        };
        team.more_channels.retain(|c| c.id != channel.id);
        match team.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => *existing = channel,
            None => team.channels.push(channel),
        }
        true
    }

    // ============== Users ==============

    /// Cached user, without going to the server.
    pub async fn cached_user(&self, id: &UserId) -> Option<User> {
        self.state.read().await.users.get(id).cloned()
    }

    /// Cached user, fetched and cached on a miss.
    ///
    /// The read lock is released before the remote call; concurrent misses on
    /// the same id wait for the first fetch instead of issuing their own. A
    /// failed fetch is logged and reported as absent.
    pub async fn user(&self, id: &UserId) -> Option<User> {
        if let Some(user) = self.cached_user(id).await {
            return Some(user);
        }

        let gate = self.inflight_gate(id).await;
        let guard = Arc::clone(&gate).lock_owned().await;

        let found = match self.cached_user(id).await {
            Some(user) => Some(user),
            None => match self.directory.user(id).await {
                Ok(user) => {
                    debug!(user_id = %id, username = %user.username, "cached user on miss");
                    self.insert_user(user.clone()).await;
                    Some(user)
                }
                Err(e) => {
                    warn!(user_id = %id, "user lookup failed: {e}");
                    None
                }
            },
        };

        drop(guard);
        self.release_gate(id, &gate).await;
        found
    }

    async fn inflight_gate(&self, id: &UserId) -> Arc<Mutex<()>> {
        let mut map = self.inflight.lock().await;
        map.entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_gate(&self, id: &UserId, gate: &Arc<Mutex<()>>) {
        let mut map = self.inflight.lock().await;
        if map.get(id).is_some_and(|g| Arc::ptr_eq(g, gate)) {
            map.remove(id);
        }
    }

    pub async fn insert_user(&self, user: User) {
        let mut st = self.state.write().await;
        st.users.insert(user.id.clone(), user);
    }

    /// Insert or overwrite a batch of users.
    pub async fn merge_users(&self, users: Vec<User>) {
        let mut st = self.state.write().await;
        for user in users {
            st.users.insert(user.id.clone(), user);
        }
    }

    pub async fn all_users(&self) -> HashMap<UserId, User> {
        self.state.read().await.users.clone()
    }

    pub async fn user_ids(&self) -> Vec<UserId> {
        self.state.read().await.users.keys().cloned().collect()
    }

    /// Change a cached user's nickname in place. Returns false if the user is not cached.
    pub async fn set_nickname(&self, id: &UserId, nickname: &str) -> bool {
        let mut st = self.state.write().await;
        match st.users.get_mut(id) {
            Some(user) => {
                user.nickname = nickname.to_string();
                true
            }
            None => false,
        }
    }

    /// Record presence for users already in the cache; unknown ids are skipped.
    pub async fn apply_statuses(&self, statuses: &[(UserId, UserStatus)]) {
        let mut st = self.state.write().await;
        for (id, status) in statuses {
            if let Some(user) = st.users.get_mut(id) {
                user.status = *status;
            }
        }
    }
}
