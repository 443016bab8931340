//! REST v4 adapter: implements the core ports over HTTP, plus the event socket.

pub mod websocket;
pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::RwLock;

use mmc_core::{
    config::{Config, Credentials},
    domain::{
        Channel, ChannelId, NewPost, Post, PostId, PostList, TeamId, TeamInfo, User, UserId,
        UserStatus,
    },
    errors::Error,
    ports::{ActionPort, DirectoryPort},
    Result,
};

use wire::{
    ApiChannel, ApiChannelMember, ApiErrorBody, ApiFileLink, ApiStatus, ApiTeam,
    ApiUploadResponse, ApiUser, LoginRequest,
};

pub use websocket::WsListener;

/// Largest page the server accepts for channel member listings.
const MEMBER_PAGE_SIZE: usize = 200;

pub struct HttpApi {
    api_url: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl HttpApi {
    /// `base_url` is `scheme://host[:port]`; the `/api/v4` prefix is appended here.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self {
            api_url: format!("{}/api/v4", base_url.trim_end_matches('/')),
            http,
            token: RwLock::new(None),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.base_url(), cfg.http_timeout)
    }

    /// Establish the session token. Password logins read it from the `Token` response header.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        let token = match credentials {
            Credentials::Token(t) => t.clone(),
            Credentials::Password { login, password } => {
                let resp = self
                    .http
                    .post(self.url("/users/login"))
                    .json(&LoginRequest {
                        login_id: login,
                        password,
                    })
                    .send()
                    .await
                    .map_err(request_error)?;
                let resp = check(resp).await?;
                resp.headers()
                    .get("Token")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::External("login response carried no Token header".to_string())
                    })?
            }
        };
        *self.token.write().await = Some(token);
        tracing::info!("session token established");
        Ok(())
    }

    /// Current session token, if logged in.
    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.http.request(method, self.url(path));
        match self.token.read().await.as_deref() {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<T> {
        let resp = check(rb.send().await.map_err(request_error)?).await?;
        resp.json()
            .await
            .map_err(|e| Error::External(format!("response decode failed: {e}")))
    }

    async fn execute(&self, rb: RequestBuilder) -> Result<()> {
        check(rb.send().await.map_err(request_error)?).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let rb = self.request(Method::GET, path).await;
        self.fetch(rb).await
    }
}

fn request_error(e: reqwest::Error) -> Error {
    Error::External(format!("http request failed: {e}"))
}

/// Pass successful responses through; turn anything else into `Error::Api`.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        body.chars().take(200).collect()
    } else {
        parsed.message
    };
    Err(Error::Api {
        status: status.as_u16(),
        id: parsed.id,
        message,
    })
}

#[async_trait]
impl DirectoryPort for HttpApi {
    async fn me(&self) -> Result<User> {
        let u: ApiUser = self.get("/users/me").await?;
        Ok(u.into())
    }

    async fn teams_for_user(&self, user: &UserId) -> Result<Vec<TeamInfo>> {
        let teams: Vec<ApiTeam> = self.get(&format!("/users/{user}/teams")).await?;
        Ok(teams.into_iter().map(Into::into).collect())
    }

    async fn user(&self, id: &UserId) -> Result<User> {
        let u: ApiUser = self.get(&format!("/users/{id}")).await?;
        Ok(u.into())
    }

    async fn users_page(&self, page: usize, per_page: usize) -> Result<Vec<User>> {
        let rb = self
            .request(Method::GET, "/users")
            .await
            .query(&[("page", page), ("per_page", per_page)]);
        let users: Vec<ApiUser> = self.fetch(rb).await?;
        Ok(users.into_iter().map(Into::into).collect())
    }

    async fn member_channels(&self, team: &TeamId, user: &UserId) -> Result<Vec<Channel>> {
        let channels: Vec<ApiChannel> = self
            .get(&format!("/users/{user}/teams/{team}/channels"))
            .await?;
        Ok(channels.into_iter().map(Into::into).collect())
    }

    async fn more_channels(
        &self,
        team: &TeamId,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Channel>> {
        let rb = self
            .request(Method::GET, &format!("/teams/{team}/channels"))
            .await
            .query(&[("page", page), ("per_page", per_page)]);
        let channels: Vec<ApiChannel> = self.fetch(rb).await?;
        Ok(channels.into_iter().map(Into::into).collect())
    }

    async fn channel(&self, id: &ChannelId) -> Result<Channel> {
        let c: ApiChannel = self.get(&format!("/channels/{id}")).await?;
        Ok(c.into())
    }

    async fn user_statuses(&self, ids: &[UserId]) -> Result<Vec<(UserId, UserStatus)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rb = self
            .request(Method::POST, "/users/status/ids")
            .await
            .json(ids);
        let statuses: Vec<ApiStatus> = self.fetch(rb).await?;
        Ok(statuses.into_iter().map(ApiStatus::into_pair).collect())
    }
}

#[async_trait]
impl ActionPort for HttpApi {
    async fn create_post(&self, post: &NewPost) -> Result<Post> {
        let rb = self.request(Method::POST, "/posts").await.json(post);
        self.fetch(rb).await
    }

    async fn update_post(&self, id: &PostId, message: &str) -> Result<Post> {
        let rb = self
            .request(Method::PUT, &format!("/posts/{id}/patch"))
            .await
            .json(&json!({ "message": message }));
        self.fetch(rb).await
    }

    async fn delete_post(&self, id: &PostId) -> Result<()> {
        let rb = self.request(Method::DELETE, &format!("/posts/{id}")).await;
        self.execute(rb).await
    }

    async fn posts_for_channel(
        &self,
        channel: &ChannelId,
        page: usize,
        per_page: usize,
    ) -> Result<PostList> {
        let rb = self
            .request(Method::GET, &format!("/channels/{channel}/posts"))
            .await
            .query(&[("page", page), ("per_page", per_page)]);
        self.fetch(rb).await
    }

    async fn posts_since(&self, channel: &ChannelId, since_millis: i64) -> Result<PostList> {
        let rb = self
            .request(Method::GET, &format!("/channels/{channel}/posts"))
            .await
            .query(&[("since", since_millis)]);
        self.fetch(rb).await
    }

    async fn search_posts(&self, team: &TeamId, terms: &str) -> Result<PostList> {
        let rb = self
            .request(Method::POST, &format!("/teams/{team}/posts/search"))
            .await
            .json(&json!({ "terms": terms, "is_or_search": false }));
        self.fetch(rb).await
    }

    async fn file_link(&self, file_id: &str) -> Result<String> {
        let link: ApiFileLink = self.get(&format!("/files/{file_id}/link")).await?;
        Ok(link.link)
    }

    async fn upload_file(
        &self,
        channel: &ChannelId,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .text("channel_id", channel.to_string())
            .part(
                "files",
                reqwest::multipart::Part::bytes(data).file_name(filename.to_string()),
            );
        let rb = self.request(Method::POST, "/files").await.multipart(form);
        let uploaded: ApiUploadResponse = self.fetch(rb).await?;
        uploaded
            .file_infos
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| Error::External("upload response listed no files".to_string()))
    }

    async fn create_direct_channel(&self, a: &UserId, b: &UserId) -> Result<Channel> {
        let rb = self
            .request(Method::POST, "/channels/direct")
            .await
            .json(&[a, b]);
        let c: ApiChannel = self.fetch(rb).await?;
        Ok(c.into())
    }

    async fn add_channel_member(&self, channel: &ChannelId, user: &UserId) -> Result<()> {
        let rb = self
            .request(Method::POST, &format!("/channels/{channel}/members"))
            .await
            .json(&json!({ "user_id": user }));
        self.execute(rb).await
    }

    async fn update_channel_header(&self, channel: &ChannelId, header: &str) -> Result<()> {
        let rb = self
            .request(Method::PUT, &format!("/channels/{channel}/patch"))
            .await
            .json(&json!({ "header": header }));
        self.execute(rb).await
    }

    async fn channel_member_ids(&self, channel: &ChannelId) -> Result<Vec<UserId>> {
        let mut ids = Vec::new();
        for page in 0.. {
            let rb = self
                .request(Method::GET, &format!("/channels/{channel}/members"))
                .await
                .query(&[("page", page), ("per_page", MEMBER_PAGE_SIZE)]);
            let members: Vec<ApiChannelMember> = self.fetch(rb).await?;
            let n = members.len();
            ids.extend(members.into_iter().map(|m| UserId(m.user_id)));
            if n < MEMBER_PAGE_SIZE {
                break;
            }
        }
        Ok(ids)
    }

    async fn last_viewed_at(&self, channel: &ChannelId, user: &UserId) -> Result<i64> {
        let member: ApiChannelMember = self
            .get(&format!("/channels/{channel}/members/{user}"))
            .await?;
        Ok(member.last_viewed_at)
    }

    async fn view_channel(&self, user: &UserId, channel: &ChannelId) -> Result<()> {
        let rb = self
            .request(Method::POST, &format!("/channels/members/{user}/view"))
            .await
            .json(&json!({ "channel_id": channel }));
        self.execute(rb).await
    }

    async fn user_status(&self, id: &UserId) -> Result<UserStatus> {
        let status: ApiStatus = self.get(&format!("/users/{id}/status")).await?;
        Ok(UserStatus::from_wire(&status.status))
    }

    async fn update_user_status(&self, id: &UserId, status: UserStatus) -> Result<()> {
        let rb = self
            .request(Method::PUT, &format!("/users/{id}/status"))
            .await
            .json(&ApiStatus {
                user_id: id.to_string(),
                status: status.as_str().to_string(),
            });
        self.execute(rb).await
    }

    async fn update_nickname(&self, id: &UserId, nickname: &str) -> Result<()> {
        let rb = self
            .request(Method::PUT, &format!("/users/{id}/patch"))
            .await
            .json(&json!({ "nickname": nickname }));
        self.execute(rb).await
    }
}
