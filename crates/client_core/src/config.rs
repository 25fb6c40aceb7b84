use std::{fmt::Display, fs, path::Path, str::FromStr, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::{connection::ReconnectPolicy, projection::PreviewTiming};

pub const DEFAULT_MAX_MEDIA_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLimits {
    pub max_bytes: u64,
    pub supported_types: Vec<String>,
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_MEDIA_BYTES,
            supported_types: ["image/png", "image/jpeg", "image/gif", "image/webp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server_url: String,
    /// Derived from `server_url` when unset.
    pub websocket_url: Option<String>,
    pub request_timeout: Duration,
    pub presign_timeout: Duration,
    pub upload_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Without a pong for this long the space state is rebuilt from scratch.
    pub inactivity_reset: Duration,
    /// Window in which a remote preview counts as freshly changed.
    pub preview_lock: Duration,
    pub self_preview_autohide: Duration,
    pub projection_eviction_interval: Duration,
    pub history_page_size: u32,
    pub media: MediaLimits,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000/api".into(),
            websocket_url: None,
            request_timeout: Duration::from_secs(8),
            presign_timeout: Duration::from_secs(2),
            upload_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            inactivity_reset: Duration::from_secs(30 * 60),
            preview_lock: Duration::from_secs(1),
            self_preview_autohide: Duration::from_secs(20),
            projection_eviction_interval: Duration::from_secs(30),
            history_page_size: 51,
            media: MediaLimits::default(),
        }
    }
}

impl ClientSettings {
    pub fn preview_timing(&self) -> PreviewTiming {
        PreviewTiming {
            lock: self.preview_lock,
            self_autohide: self.self_preview_autohide,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    websocket_url: Option<String>,
    request_timeout_ms: Option<u64>,
    presign_timeout_ms: Option<u64>,
    upload_timeout_ms: Option<u64>,
    inactivity_reset_secs: Option<u64>,
    preview_lock_ms: Option<u64>,
    self_preview_autohide_ms: Option<u64>,
    projection_eviction_secs: Option<u64>,
    history_page_size: Option<u32>,
    max_media_bytes: Option<u64>,
    supported_media_types: Option<Vec<String>>,
    reconnect: Option<ReconnectPolicy>,
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new("client.toml"), |key| std::env::var(key).ok())
}

/// Defaults, then the toml file at `path`, then `APP__*` variables from `env`.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), "config: ignoring unreadable settings file: {err}"),
        }
    }

    apply_file(&mut settings, env_settings(&env));
    if let Some(v) = env("APP__RECONNECT_COUNTDOWNS") {
        match split_list(&v).iter().map(|n| n.parse()).collect::<Result<Vec<u32>, _>>() {
            Ok(countdowns) => settings.reconnect.countdowns = countdowns,
            Err(err) => warn!(value = %v, "config: ignoring APP__RECONNECT_COUNTDOWNS: {err}"),
        }
    }
    if let Some(v) = parsed(&env, "APP__RECONNECT_MAX_COUNTDOWN") {
        settings.reconnect.max_countdown = v;
    }

    settings
}

/// The `APP__*` counterpart of every file setting.
fn env_settings(env: &impl Fn(&str) -> Option<String>) -> FileSettings {
    FileSettings {
        server_url: env("APP__SERVER_URL"),
        websocket_url: env("APP__WEBSOCKET_URL"),
        request_timeout_ms: parsed(env, "APP__REQUEST_TIMEOUT_MS"),
        presign_timeout_ms: parsed(env, "APP__PRESIGN_TIMEOUT_MS"),
        upload_timeout_ms: parsed(env, "APP__UPLOAD_TIMEOUT_MS"),
        inactivity_reset_secs: parsed(env, "APP__INACTIVITY_RESET_SECS"),
        preview_lock_ms: parsed(env, "APP__PREVIEW_LOCK_MS"),
        self_preview_autohide_ms: parsed(env, "APP__SELF_PREVIEW_AUTOHIDE_MS"),
        projection_eviction_secs: parsed(env, "APP__PROJECTION_EVICTION_SECS"),
        history_page_size: parsed(env, "APP__HISTORY_PAGE_SIZE"),
        max_media_bytes: parsed(env, "APP__MAX_MEDIA_BYTES"),
        supported_media_types: env("APP__SUPPORTED_MEDIA_TYPES").map(|v| split_list(&v)),
        reconnect: None,
    }
}

fn parsed<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(key, value = %raw, "config: ignoring malformed environment value: {err}");
            None
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn apply_file(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.websocket_url {
        settings.websocket_url = Some(v);
    }
    if let Some(v) = file_cfg.request_timeout_ms {
        settings.request_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.presign_timeout_ms {
        settings.presign_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.upload_timeout_ms {
        settings.upload_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.inactivity_reset_secs {
        settings.inactivity_reset = Duration::from_secs(v);
    }
    if let Some(v) = file_cfg.preview_lock_ms {
        settings.preview_lock = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.self_preview_autohide_ms {
        settings.self_preview_autohide = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.history_page_size {
        settings.history_page_size = v;
    }
    if let Some(v) = file_cfg.projection_eviction_secs {
        settings.projection_eviction_interval = Duration::from_secs(v);
    }
    if let Some(v) = file_cfg.max_media_bytes {
        settings.media.max_bytes = v;
    }
    if let Some(v) = file_cfg.supported_media_types {
        settings.media.supported_types = v;
    }
    if let Some(v) = file_cfg.reconnect {
        settings.reconnect = v;
    }
}
