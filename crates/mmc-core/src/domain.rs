use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Server-assigned user id.
    UserId
);
string_id!(
    /// Server-assigned team id.
    TeamId
);
string_id!(
    /// Server-assigned channel id.
    ChannelId
);
string_id!(
    /// Server-assigned post id.
    PostId
);

/// Presence as reported by the server, collapsed to three states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum UserStatus {
    Online,
    Away,
    #[default]
    Offline,
}

impl UserStatus {
    /// Anything that is not `online` or `away` (e.g. `dnd`) counts as offline.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "online" => UserStatus::Online,
            "away" => UserStatus::Away,
            _ => UserStatus::Offline,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Away => "away",
            UserStatus::Offline => "offline",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub nickname: String,
    pub status: UserStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Public,
    Private,
    Direct,
    Group,
}

impl ChannelType {
    /// Parse the single-letter type code used on the wire (`O`, `P`, `D`, `G`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "O" => Some(ChannelType::Public),
            "P" => Some(ChannelType::Private),
            "D" => Some(ChannelType::Direct),
            "G" => Some(ChannelType::Group),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ChannelType::Public => "O",
            ChannelType::Private => "P",
            ChannelType::Direct => "D",
            ChannelType::Group => "G",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub display_name: String,
    pub kind: ChannelType,
    pub header: String,
    /// `None` for direct and group channels.
    pub team_id: Option<TeamId>,
}

impl Channel {
    /// Name used for lookups and for the canonical message.
    ///
    /// Group channels have no stable server-side name (it is a hash of the
    /// member ids), so one is synthesized from the display name.
    pub fn normalized_name(&self) -> String {
        match self.kind {
            ChannelType::Group => self.display_name.replace(", ", "-").replace(' ', "_"),
            _ => self.name.clone(),
        }
    }
}

/// Team identity as returned by the server, before channels are attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeamInfo {
    pub id: TeamId,
    pub name: String,
    pub display_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Team {
    pub info: TeamInfo,
    /// Channels we are a member of.
    pub channels: Vec<Channel>,
    /// Public channels of the team we have not joined.
    pub more_channels: Vec<Channel>,
}

impl Team {
    pub fn new(info: TeamInfo) -> Self {
        Self {
            info,
            channels: Vec::new(),
            more_channels: Vec::new(),
        }
    }

    pub fn id(&self) -> &TeamId {
        &self.info.id
    }

    /// Member channels followed by non-member channels.
    pub fn all_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().chain(self.more_channels.iter())
    }
}

/// A post record as carried by the REST API and embedded in push events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    #[serde(deserialize_with = "null_as_default")]
    pub id: PostId,
    #[serde(deserialize_with = "null_as_default")]
    pub create_at: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub update_at: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub delete_at: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub user_id: UserId,
    #[serde(deserialize_with = "null_as_default")]
    pub channel_id: ChannelId,
    #[serde(deserialize_with = "null_as_default")]
    pub root_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub post_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub file_ids: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub props: serde_json::Map<String, serde_json::Value>,
}

/// Outgoing post (create).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NewPost {
    pub channel_id: ChannelId,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub root_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub props: serde_json::Map<String, serde_json::Value>,
}

/// Posts in server order (`order` lists ids newest first).
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PostList {
    #[serde(deserialize_with = "null_as_default")]
    pub order: Vec<PostId>,
    #[serde(deserialize_with = "null_as_default")]
    pub posts: std::collections::HashMap<PostId, Post>,
}

/// Treat an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl PostList {
    /// Posts following `order`, skipping ids missing from the map.
    pub fn ordered(&self) -> Vec<&Post> {
        self.order.iter().filter_map(|id| self.posts.get(id)).collect()
    }
}

/// Name of the direct channel between two users (`smaller__larger`).
pub fn direct_channel_name(a: &UserId, b: &UserId) -> String {
    if a <= b {
        format!("{a}__{b}")
    } else {
        format!("{b}__{a}")
    }
}
