use std::{env, fs, path::Path, time::Duration};

use crate::{dedup::DEFAULT_DEDUP_CAPACITY, errors::Error, Result};

/// How the session authenticates against the server.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Personal access token or an existing session token.
    Token(String),
    Password { login: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Password { login, .. } => f
                .debug_struct("Password")
                .field("login", login)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Typed configuration for the client.
#[derive(Clone, Debug)]
pub struct Config {
    // Server
    /// `host[:port]`, without scheme.
    pub server: String,
    pub team: String,
    pub credentials: Credentials,
    pub no_tls: bool,

    // Cache / refresh
    pub dedup_capacity: usize,
    pub user_page_size: usize,
    pub user_page_delay: Duration,
    pub channel_page_size: usize,

    // Event delivery
    pub event_buffer: usize,

    // Transport
    pub ping_interval: Duration,
    pub reconnect_max: Duration,
    pub http_timeout: Duration,
}

impl Config {
    /// Load from `.env` (if present) and the process environment.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required
        let server = get("MM_SERVER")
            .map(|s| strip_scheme(s.trim()).trim_end_matches('/').to_string())
            .ok_or_else(|| Error::Config("MM_SERVER environment variable is required".into()))?;
        let team = get("MM_TEAM")
            .ok_or_else(|| Error::Config("MM_TEAM environment variable is required".into()))?;

        let credentials = match (get("MM_TOKEN"), get("MM_LOGIN"), get("MM_PASSWORD")) {
            (Some(token), _, _) => Credentials::Token(token),
            (None, Some(login), Some(password)) => Credentials::Password { login, password },
            _ => {
                return Err(Error::Config(
                    "either MM_TOKEN or MM_LOGIN and MM_PASSWORD are required".into(),
                ))
            }
        };

        let no_tls = get("MM_NO_TLS").map(|s| parse_bool(&s)).unwrap_or(false);

        let dedup_capacity = parse_num(get("MM_DEDUP_CAPACITY")).unwrap_or(DEFAULT_DEDUP_CAPACITY);
        let user_page_size = parse_num(get("MM_USER_PAGE_SIZE")).unwrap_or(200).max(1);
        let user_page_delay =
            Duration::from_millis(parse_num(get("MM_USER_PAGE_DELAY_MS")).unwrap_or(300));
        let channel_page_size = parse_num(get("MM_CHANNEL_PAGE_SIZE")).unwrap_or(5000).max(1);

        let event_buffer = parse_num(get("MM_EVENT_BUFFER")).unwrap_or(256).max(1);

        let ping_interval =
            Duration::from_secs(parse_num(get("MM_PING_INTERVAL_SECS")).unwrap_or(30).max(1));
        let reconnect_max =
            Duration::from_secs(parse_num(get("MM_RECONNECT_MAX_SECS")).unwrap_or(60).max(1));
        let http_timeout =
            Duration::from_secs(parse_num(get("MM_HTTP_TIMEOUT_SECS")).unwrap_or(30).max(1));

        Ok(Self {
            server,
            team,
            credentials,
            no_tls,
            dedup_capacity,
            user_page_size,
            user_page_delay,
            channel_page_size,
            event_buffer,
            ping_interval,
            reconnect_max,
            http_timeout,
        })
    }

    /// `https://host` (or `http://` when TLS is off).
    pub fn base_url(&self) -> String {
        let scheme = if self.no_tls { "http" } else { "https" };
        format!("{scheme}://{}", self.server)
    }

    /// `wss://host/api/v4/websocket` (or `ws://` when TLS is off).
    pub fn websocket_url(&self) -> String {
        let scheme = if self.no_tls { "ws" } else { "wss" };
        format!("{scheme}://{}/api/v4/websocket", self.server)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(v: &str) -> &str {
    if v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
    {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

fn strip_scheme(s: &str) -> &str {
    ["https://", "http://", "wss://", "ws://"]
        .iter()
        .find_map(|p| s.strip_prefix(p))
        .unwrap_or(s)
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_num<T: std::str::FromStr>(v: Option<String>) -> Option<T> {
    v.and_then(|s| s.trim().parse::<T>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server: "chat.example.com".to_string(),
        team: "home".to_string(),
        credentials: Credentials::Token("tok".to_string()),
        no_tls: false,
        dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        user_page_size: 2,
        user_page_delay: Duration::ZERO,
        channel_page_size: 5000,
        event_buffer: 16,
        ping_interval: Duration::from_secs(30),
        reconnect_max: Duration::from_secs(60),
        http_timeout: Duration::from_secs(30),
    }
}
