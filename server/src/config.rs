use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_UPLOAD_DIR: &str = "./uploads";
const DEFAULT_BASE_URL: &str = "http://localhost:5000";
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_THUMBNAIL_SIZE: u32 = 200;
const DEFAULT_AUTO_DELETE_DAYS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_LOG_CAP: usize = 500;
const DEFAULT_GALLERY_PER_PAGE: usize = 20;
const DEFAULT_FILENAME_PREFIX: &str = "photobox";
const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/gif"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be greater than 0")]
    Zero(&'static str),
    #[error("at least one allowed MIME type must be configured")]
    NoAllowedTypes,
}

/// Which optional detection facilities are available at runtime.
///
/// Classifier, validator and thumbnail generator all consult the same value,
/// so a deployment that cannot decode images degrades consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Content sniffing by magic bytes
    pub magic_bytes: bool,
    /// Full image decoding (validation and thumbnails)
    pub image_decoding: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            magic_bytes: true,
            image_decoding: true,
        }
    }
}

/// Server configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Shared bearer token for uploads. `None` disables upload authentication
    pub api_key: Option<String>,
    /// Password for gallery admin actions. `None` disables them
    pub admin_password: Option<String>,
    pub upload_dir: PathBuf,
    /// Public base URL without trailing slash
    pub base_url: String,
    pub max_file_size: u64,
    pub create_thumbnails: bool,
    pub thumbnail_size: u32,
    /// Files older than this many days are swept. 0 disables sweeping
    pub auto_delete_days: u64,
    pub sweep_interval: Duration,
    /// Maximum number of records kept in the upload log
    pub log_cap: usize,
    pub gallery_enabled: bool,
    pub gallery_per_page: usize,
    pub filename_prefix: String,
    pub allowed_mime_types: Vec<String>,
    pub capabilities: Capabilities,
}

impl Config {
    /// Configuration with defaults rooted at `upload_dir`.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(upload_dir: P) -> Self {
        Self {
            port: DEFAULT_PORT,
            api_key: None,
            admin_password: None,
            upload_dir: upload_dir.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            create_thumbnails: true,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            auto_delete_days: DEFAULT_AUTO_DELETE_DAYS,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            log_cap: DEFAULT_LOG_CAP,
            gallery_enabled: true,
            gallery_per_page: DEFAULT_GALLERY_PER_PAGE,
            filename_prefix: DEFAULT_FILENAME_PREFIX.to_owned(),
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            capabilities: Capabilities::default(),
        }
    }

    /// Reads `PHOTOBOX_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let upload_dir =
            env::var("PHOTOBOX_UPLOAD_DIR").unwrap_or_else(|_| String::from(DEFAULT_UPLOAD_DIR));
        let mut config = Self::new(upload_dir);

        config.port = parsed("PHOTOBOX_PORT", config.port)?;
        config.api_key = non_empty("PHOTOBOX_API_KEY");
        config.admin_password = non_empty("PHOTOBOX_ADMIN_PASSWORD");
        if let Some(base_url) = non_empty("PHOTOBOX_BASE_URL") {
            config.base_url = base_url;
        }
        config.base_url = config.base_url.trim_end_matches('/').to_owned();
        config.max_file_size = parsed("PHOTOBOX_MAX_FILE_SIZE", config.max_file_size)?;
        config.create_thumbnails = parsed("PHOTOBOX_CREATE_THUMBNAILS", config.create_thumbnails)?;
        config.thumbnail_size = parsed("PHOTOBOX_THUMBNAIL_SIZE", config.thumbnail_size)?;
        config.auto_delete_days = parsed("PHOTOBOX_AUTO_DELETE_DAYS", config.auto_delete_days)?;
        config.sweep_interval = Duration::from_secs(parsed(
            "PHOTOBOX_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?);
        config.log_cap = parsed("PHOTOBOX_LOG_CAP", config.log_cap)?;
        config.gallery_enabled = parsed("PHOTOBOX_GALLERY_ENABLED", config.gallery_enabled)?;
        config.gallery_per_page = parsed("PHOTOBOX_GALLERY_PER_PAGE", config.gallery_per_page)?;
        if let Some(prefix) = non_empty("PHOTOBOX_FILENAME_PREFIX") {
            config.filename_prefix = prefix;
        }
        if let Some(types) = non_empty("PHOTOBOX_ALLOWED_MIME_TYPES") {
            config.allowed_mime_types = types
                .split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
        }
        config.capabilities.magic_bytes =
            parsed("PHOTOBOX_MAGIC_BYTES", config.capabilities.magic_bytes)?;
        config.capabilities.image_decoding =
            parsed("PHOTOBOX_IMAGE_DECODING", config.capabilities.image_decoding)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size == 0 {
            return Err(ConfigError::Zero("max file size"));
        }
        if self.thumbnail_size == 0 {
            return Err(ConfigError::Zero("thumbnail size"));
        }
        if self.log_cap == 0 {
            return Err(ConfigError::Zero("log cap"));
        }
        if self.gallery_per_page == 0 {
            return Err(ConfigError::Zero("gallery page size"));
        }
        if self.allowed_mime_types.is_empty() {
            return Err(ConfigError::NoAllowedTypes);
        }
        if self.api_key.is_none() {
            tracing::warn!("PHOTOBOX_API_KEY is not set, uploads are not authenticated");
        }
        if self.admin_password.is_none() {
            tracing::warn!("PHOTOBOX_ADMIN_PASSWORD is not set, gallery admin actions are disabled");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_allowed_type(&self, mime_type: &str) -> bool {
        self.allowed_mime_types.iter().any(|t| t == mime_type)
    }

    /// Request body limit: room for the largest accepted photo plus form overhead.
    /// Photos below it are drained by the handler, larger bodies are refused upfront.
    #[must_use]
    pub fn body_limit(&self) -> usize {
        let limit = self.max_file_size.saturating_mul(2).saturating_add(1024 * 1024);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse().map_err(|_| ConfigError::Invalid { name, value })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        // Arrange
        let config = Config::new("/tmp/uploads");

        // Act
        let result = config.validate();

        // Assert
        assert!(result.is_ok());
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert!(config.is_allowed_type("image/jpg"));
        assert!(!config.is_allowed_type("image/webp"));
    }

    #[rstest]
    #[case::max_size(|c: &mut Config| c.max_file_size = 0)]
    #[case::thumbnail(|c: &mut Config| c.thumbnail_size = 0)]
    #[case::log_cap(|c: &mut Config| c.log_cap = 0)]
    #[case::per_page(|c: &mut Config| c.gallery_per_page = 0)]
    #[case::types(|c: &mut Config| c.allowed_mime_types.clear())]
    fn invalid_values_rejected(#[case] change: fn(&mut Config)) {
        // Arrange
        let mut config = Config::new("/tmp/uploads");
        change(&mut config);

        // Act
        let result = config.validate();

        // Assert
        assert!(result.is_err());
    }

    #[test]
    fn body_limit_exceeds_max_file_size() {
        // Arrange
        let config = Config::new("/tmp/uploads");

        // Act
        let limit = config.body_limit();

        // Assert
        assert!(limit as u64 > config.max_file_size);
    }

    #[test]
    #[serial_test::serial]
    fn from_env_reads_overrides() {
        // Arrange
        env::set_var("PHOTOBOX_PORT", "8080");
        env::set_var("PHOTOBOX_BASE_URL", "https://booth.example.com/");
        env::set_var("PHOTOBOX_ALLOWED_MIME_TYPES", "image/png, IMAGE/GIF");
        env::set_var("PHOTOBOX_IMAGE_DECODING", "false");

        // Act
        let config = Config::from_env();

        // Assert
        for name in [
            "PHOTOBOX_PORT",
            "PHOTOBOX_BASE_URL",
            "PHOTOBOX_ALLOWED_MIME_TYPES",
            "PHOTOBOX_IMAGE_DECODING",
        ] {
            env::remove_var(name);
        }
        let config = config.unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_url, "https://booth.example.com");
        assert_eq!(config.allowed_mime_types, vec!["image/png", "image/gif"]);
        assert!(!config.capabilities.image_decoding);
        assert!(config.capabilities.magic_bytes);
    }

    #[test]
    #[serial_test::serial]
    fn from_env_rejects_garbage() {
        // Arrange
        env::set_var("PHOTOBOX_MAX_FILE_SIZE", "ten megabytes");

        // Act
        let result = Config::from_env();

        // Assert
        env::remove_var("PHOTOBOX_MAX_FILE_SIZE");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "PHOTOBOX_MAX_FILE_SIZE", .. })
        ));
    }
}
