//! JSON shapes of the REST v4 API and their mapping onto core types.

use serde::{Deserialize, Serialize};

use mmc_core::domain::{
    Channel, ChannelId, ChannelType, TeamId, TeamInfo, User, UserId, UserStatus,
};

#[derive(Debug, Deserialize)]
pub struct ApiUser {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub nickname: String,
}

impl From<ApiUser> for User {
    fn from(u: ApiUser) -> Self {
        User {
            id: UserId(u.id),
            username: u.username,
            nickname: u.nickname,
            status: UserStatus::Offline,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiTeam {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

impl From<ApiTeam> for TeamInfo {
    fn from(t: ApiTeam) -> Self {
        TeamInfo {
            id: TeamId(t.id),
            name: t.name,
            display_name: t.display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiChannel {
    pub id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub header: String,
}

impl From<ApiChannel> for Channel {
    fn from(c: ApiChannel) -> Self {
        Channel {
            id: ChannelId(c.id),
            kind: ChannelType::from_code(&c.kind).unwrap_or(ChannelType::Public),
            name: c.name,
            display_name: c.display_name,
            header: c.header,
            // the API sends "" for direct and group channels
            team_id: (!c.team_id.is_empty()).then_some(TeamId(c.team_id)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiStatus {
    pub user_id: String,
    pub status: String,
}

impl ApiStatus {
    pub fn into_pair(self) -> (UserId, UserStatus) {
        (UserId(self.user_id), UserStatus::from_wire(&self.status))
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiChannelMember {
    pub user_id: String,
    #[serde(default)]
    pub last_viewed_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiFileLink {
    pub link: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiFileInfo {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiUploadResponse {
    #[serde(default)]
    pub file_infos: Vec<ApiFileInfo>,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub login_id: &'a str,
    pub password: &'a str,
}
