//! Persisted user preferences.
//!
//! Settings are split into namespaces, each stored as one JSON blob under `<namespace>-settings`. The theme
//! lives on its own under `theme`. Every update rewrites all blobs.
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{StateCell, Status, impl_has_status};
use crate::{
    error::{Error, Result},
    metrics::TimeRange,
};

const THEME_KEY: &str = "theme";

/// Where settings blobs are kept.
pub trait SettingsBackend: fmt::Debug + Send + Sync {
    /// Returns `None` if nothing was stored under `key` yet.
    fn load(&self, key: &str) -> Result<Option<String>>;

    fn save(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.blobs.lock().insert(key.into(), value.into());
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().keys().cloned().collect()
    }
}

impl SettingsBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.blobs.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// One `<key>.json` file per blob in a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SettingsBackend for FileBackend {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    /// Follows the operating system.
    #[default]
    #[serde(alias = "system")]
    Auto,
}

impl Theme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::Auto => "auto",
        }
    }

    /// `light -> dark -> auto -> light`
    pub const fn next(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Auto,
            Self::Auto => Self::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "auto" | "system" => Ok(Self::Auto),
            other => Err(Error::validation(format!("unknown theme '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneralSettings {
    pub language: String,
    /// Seconds.
    pub auto_refresh_interval: u64,
    pub auto_connect_on_startup: bool,
    pub default_cluster: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_owned(),
            auto_refresh_interval: 30,
            auto_connect_on_startup: false,
            default_cluster: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppearanceSettings {
    pub theme: Theme,
    pub primary_color: String,
    pub compact_mode: bool,
    pub show_table_border: bool,
    pub message_display_lines: u32,
}

impl Default for AppearanceSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            primary_color: "#409EFF".to_owned(),
            compact_mode: false,
            show_table_border: true,
            message_display_lines: 3,
        }
    }
}

/// Client defaults for new cluster connections. Durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSettings {
    pub connection_timeout: u64,
    pub request_timeout: u64,
    pub heartbeat_interval: u64,
    pub metadata_refresh_interval: u64,
    #[serde(rename = "enableSSL")]
    pub enable_ssl: bool,
    #[serde(rename = "enableSASL")]
    pub enable_sasl: bool,
    pub sasl_mechanism: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            connection_timeout: 5_000,
            request_timeout: 10_000,
            heartbeat_interval: 3_000,
            metadata_refresh_interval: 30_000,
            enable_ssl: false,
            enable_sasl: false,
            sasl_mechanism: "PLAIN".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsumerSettings {
    pub auto_commit: bool,
    pub auto_commit_interval: u64,
    pub session_timeout: u64,
    pub max_poll_records: u32,
    pub max_poll_interval: u64,
    /// `earliest` or `latest`.
    pub default_offset: String,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            auto_commit: true,
            auto_commit_interval: 5_000,
            session_timeout: 10_000,
            max_poll_records: 500,
            max_poll_interval: 300_000,
            default_offset: "latest".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProducerSettings {
    pub acks: String,
    pub retries: u32,
    pub batch_size: u64,
    pub linger_ms: u64,
    pub buffer_memory: u64,
    pub compression_type: String,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            acks: "1".to_owned(),
            retries: 0,
            batch_size: 16_384,
            linger_ms: 0,
            buffer_memory: 33_554_432,
            compression_type: "none".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringSettings {
    pub enable_real_time_monitoring: bool,
    pub data_retention_days: u32,
    /// Seconds.
    pub chart_refresh_interval: u64,
    pub default_time_range: TimeRange,
    pub enable_alerts: bool,
    pub alert_email: String,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            enable_real_time_monitoring: true,
            data_retention_days: 7,
            chart_refresh_interval: 5,
            default_time_range: TimeRange::OneHour,
            enable_alerts: false,
            alert_email: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedSettings {
    pub log_level: String,
    /// Megabytes.
    pub max_log_file_size: u64,
    pub log_retention_days: u32,
    pub enable_debug_mode: bool,
    pub enable_telemetry: bool,
    pub check_for_updates: bool,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            max_log_file_size: 10,
            log_retention_days: 30,
            enable_debug_mode: false,
            enable_telemetry: true,
            check_for_updates: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub general: GeneralSettings,
    pub appearance: AppearanceSettings,
    pub cluster: ClusterSettings,
    pub consumer: ConsumerSettings,
    pub producer: ProducerSettings,
    pub monitoring: MonitoringSettings,
    pub advanced: AdvancedSettings,
    pub theme: Theme,
}

impl Settings {
    /// Reads every namespace from `backend`. Missing or unreadable blobs fall back to their defaults.
    pub fn load(backend: &dyn SettingsBackend) -> Self {
        Self {
            general: load_namespace(backend, "general"),
            appearance: load_namespace(backend, "appearance"),
            cluster: load_namespace(backend, "cluster"),
            consumer: load_namespace(backend, "consumer"),
            producer: load_namespace(backend, "producer"),
            monitoring: load_namespace(backend, "monitoring"),
            advanced: load_namespace(backend, "advanced"),
            theme: load_theme(backend),
        }
    }

    /// Writes every namespace to `backend`.
    pub fn save(&self, backend: &dyn SettingsBackend) -> Result<()> {
        let blobs = [
            ("general", serde_json::to_string(&self.general)?),
            ("appearance", serde_json::to_string(&self.appearance)?),
            ("cluster", serde_json::to_string(&self.cluster)?),
            ("consumer", serde_json::to_string(&self.consumer)?),
            ("producer", serde_json::to_string(&self.producer)?),
            ("monitoring", serde_json::to_string(&self.monitoring)?),
            ("advanced", serde_json::to_string(&self.advanced)?),
        ];
        for (namespace, blob) in blobs {
            backend.save(&namespace_key(namespace), &blob)?;
        }
        backend.save(THEME_KEY, self.theme.as_str())
    }
}

fn namespace_key(namespace: &str) -> String {
    format!("{namespace}-settings")
}

fn load_namespace<T: DeserializeOwned + Default>(backend: &dyn SettingsBackend, namespace: &str) -> T {
    let key = namespace_key(namespace);
    match backend.load(&key) {
        Ok(Some(blob)) => serde_json::from_str(&blob).unwrap_or_else(|e| {
            warn!(%key, %e, "failed to parse saved settings, using defaults");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(e) => {
            warn!(%key, %e, "failed to read saved settings, using defaults");
            T::default()
        }
    }
}

fn load_theme(backend: &dyn SettingsBackend) -> Theme {
    match backend.load(THEME_KEY) {
        Ok(Some(raw)) => raw.parse().unwrap_or_else(|e: Error| {
            warn!(%e, "failed to parse saved theme, using default");
            Theme::default()
        }),
        Ok(None) => Theme::default(),
        Err(e) => {
            warn!(%e, "failed to read saved theme, using default");
            Theme::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsState {
    pub status: Status,
    pub settings: Settings,
}

impl_has_status!(SettingsState);

#[derive(Debug)]
pub struct SettingsStore {
    backend: Box<dyn SettingsBackend>,
    state: StateCell<SettingsState>,
}

impl SettingsStore {
    /// Opens the store, loading whatever `backend` holds.
    pub fn new(backend: impl SettingsBackend + 'static) -> Self {
        let backend: Box<dyn SettingsBackend> = Box::new(backend);
        let settings = Settings::load(backend.as_ref());
        debug!(?settings, "settings loaded");

        Self {
            backend,
            state: StateCell::new(SettingsState {
                status: Status::default(),
                settings,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SettingsState> {
        self.state.subscribe()
    }

    pub fn settings(&self) -> Settings {
        self.state.read(|s| s.settings.clone())
    }

    /// Drops in-memory changes and reads the backend again.
    pub fn reload(&self) {
        let settings = Settings::load(self.backend.as_ref());
        self.state.modify(|s| s.settings = settings);
    }

    pub fn update_general(&self, general: GeneralSettings) -> Result<()> {
        self.update(|s| s.general = general)
    }

    pub fn update_appearance(&self, appearance: AppearanceSettings) -> Result<()> {
        self.update(|s| s.appearance = appearance)
    }

    pub fn update_cluster(&self, cluster: ClusterSettings) -> Result<()> {
        self.update(|s| s.cluster = cluster)
    }

    pub fn update_consumer(&self, consumer: ConsumerSettings) -> Result<()> {
        self.update(|s| s.consumer = consumer)
    }

    pub fn update_producer(&self, producer: ProducerSettings) -> Result<()> {
        self.update(|s| s.producer = producer)
    }

    pub fn update_monitoring(&self, monitoring: MonitoringSettings) -> Result<()> {
        self.update(|s| s.monitoring = monitoring)
    }

    pub fn update_advanced(&self, advanced: AdvancedSettings) -> Result<()> {
        self.update(|s| s.advanced = advanced)
    }

    pub fn update_language(&self, language: impl Into<String>) -> Result<()> {
        let language = language.into();
        self.update(|s| s.general.language = language)
    }

    pub fn update_auto_refresh_interval(&self, seconds: u64) -> Result<()> {
        if seconds == 0 {
            return Err(Error::validation("auto refresh interval must be positive"));
        }
        self.update(|s| s.general.auto_refresh_interval = seconds)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.update(|s| s.theme = theme)
    }

    /// Cycles the theme and returns the new one.
    pub fn toggle_theme(&self) -> Result<Theme> {
        let mut theme = Theme::default();
        self.update(|s| {
            s.theme = s.theme.next();
            theme = s.theme;
        })?;
        Ok(theme)
    }

    /// Applies `f` and rewrites every blob.
    fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<()> {
        let _guard = self.state.begin();

        let mut settings = self.settings();
        f(&mut settings);

        match settings.save(self.backend.as_ref()) {
            Ok(()) => {
                self.state.modify(|s| s.settings = settings);
                Ok(())
            }
            Err(e) => {
                warn!(%e, "failed to save settings");
                self.state.modify(|s| s.status.error = Some((&e).into()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// Lets a test look into the backend after handing it to the store.
    #[derive(Debug, Clone, Default)]
    struct SharedBackend(Arc<MemoryBackend>);

    impl SettingsBackend for SharedBackend {
        fn load(&self, key: &str) -> Result<Option<String>> {
            self.0.load(key)
        }

        fn save(&self, key: &str, value: &str) -> Result<()> {
            self.0.save(key, value)
        }
    }

    #[test]
    fn test_defaults_without_blobs() {
        let store = SettingsStore::new(MemoryBackend::new());
        assert_eq!(store.settings(), Settings::default());
        assert_eq!(store.settings().theme, Theme::Auto);
        assert_eq!(store.settings().general.auto_refresh_interval, 30);
    }

    #[test]
    fn test_every_update_rewrites_all_blobs() {
        let backend = SharedBackend::default();
        let store = SettingsStore::new(backend.clone());

        store.update_language("en-US").unwrap();

        assert_eq!(
            backend.0.keys(),
            vec![
                "advanced-settings",
                "appearance-settings",
                "cluster-settings",
                "consumer-settings",
                "general-settings",
                "monitoring-settings",
                "producer-settings",
                "theme",
            ]
        );
        let general = backend.0.load("general-settings").unwrap().unwrap();
        assert!(general.contains("\"language\":\"en-US\""));
        assert!(general.contains("\"autoRefreshInterval\":30"));
    }

    #[test]
    fn test_corrupt_blob_falls_back_to_defaults() {
        let backend = MemoryBackend::new()
            .with_blob("producer-settings", "{not json")
            .with_blob("consumer-settings", r#"{"maxPollRecords": 42}"#)
            .with_blob("theme", "dark");
        let store = SettingsStore::new(backend);

        let settings = store.settings();
        assert_eq!(settings.producer, ProducerSettings::default());
        assert_eq!(settings.consumer.max_poll_records, 42);
        assert!(settings.consumer.auto_commit);
        assert_eq!(settings.theme, Theme::Dark);
    }

    #[test]
    fn test_toggle_theme_cycles() {
        let store = SettingsStore::new(MemoryBackend::new().with_blob("theme", "light"));
        let seen: Vec<_> = (0..3).map(|_| store.toggle_theme().unwrap()).collect();
        assert_eq!(seen, vec![Theme::Dark, Theme::Auto, Theme::Light]);
    }

    #[test]
    fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        let store = SettingsStore::new(FileBackend::new(dir.path()));
        store
            .update_monitoring(MonitoringSettings {
                default_time_range: TimeRange::SixHours,
                alert_email: "ops@example.com".to_owned(),
                ..Default::default()
            })
            .unwrap();
        store.set_theme(Theme::Dark).unwrap();
        let saved = store.settings();
        drop(store);

        assert!(dir.path().join("monitoring-settings.json").exists());
        let reopened = SettingsStore::new(FileBackend::new(dir.path()));
        assert_eq!(reopened.settings(), saved);
    }

    #[test]
    fn test_rejected_update_keeps_settings() {
        let store = SettingsStore::new(MemoryBackend::new());
        assert!(store.update_auto_refresh_interval(0).is_err());
        assert_eq!(store.settings().general.auto_refresh_interval, 30);
    }

    #[test]
    fn test_appearance_accepts_system_theme() {
        let appearance: AppearanceSettings = serde_json::from_str(r#"{"theme":"system"}"#).unwrap();
        assert_eq!(appearance.theme, Theme::Auto);
        assert_eq!("system".parse::<Theme>().unwrap(), Theme::Auto);
    }
}
