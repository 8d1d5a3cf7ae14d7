use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Extension of every cached artifact and the only output encoding.
pub const OUTPUT_EXTENSION: &str = "webp";
pub const OUTPUT_CONTENT_TYPE: &str = "image/webp";

/// Sent on every image response, hit or miss. Fixed policy.
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=86400";

pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_INPUT_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    /// When false no store is constructed and nothing touches `cache_dir`.
    pub use_cache: bool,
    pub cache_dir: PathBuf,
    pub max_input_size: usize, // bytes
    pub fetch_timeout: Duration,
    pub quality: u8,
    /// Permit source URLs pointing at loopback/private addresses.
    pub allow_private_hosts: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            use_cache: true,
            cache_dir: PathBuf::from("./cache"),
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            quality: DEFAULT_QUALITY,
            allow_private_hosts: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Max input size must be > 0")] InvalidMaxInput,
    #[error("Quality must be within 1..=100")] InvalidQuality,
    #[error("Fetch timeout must be > 0")] InvalidTimeout,
}

impl ProxyConfig {
    /// Reads the process environment on top of the defaults.
    ///
    /// - `PORT`: listen port
    /// - `USE_CACHE`: caching stays on unless this is exactly `false`
    /// - `CACHE_DIR`: cache root directory
    /// - `MAX_INPUT_SIZE`: largest accepted source body in bytes
    /// - `FETCH_TIMEOUT_SECS`: outbound fetch timeout
    /// - `WEBP_QUALITY`: lossy encoder quality (1-100)
    /// - `ALLOW_PRIVATE_HOSTS`: `true` disables the private address check
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("PORT") {
            cfg.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = lookup("USE_CACHE") {
            cfg.use_cache = v != "false";
        }
        if let Some(v) = lookup("CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAX_INPUT_SIZE") {
            cfg.max_input_size = parse_var("MAX_INPUT_SIZE", &v)?;
        }
        if let Some(v) = lookup("FETCH_TIMEOUT_SECS") {
            cfg.fetch_timeout = Duration::from_secs(parse_var("FETCH_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("WEBP_QUALITY") {
            cfg.quality = parse_var("WEBP_QUALITY", &v)?;
        }
        if let Some(v) = lookup("ALLOW_PRIVATE_HOSTS") {
            cfg.allow_private_hosts = v == "true";
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        if self.quality == 0 || self.quality > 100 { return Err(ConfigError::InvalidQuality); }
        if self.fetch_timeout.is_zero() { return Err(ConfigError::InvalidTimeout); }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_enable_cache() {
        let cfg = ProxyConfig::from_lookup(lookup(&[])).unwrap();
        assert!(cfg.use_cache);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn only_literal_false_disables_cache() {
        let off = ProxyConfig::from_lookup(lookup(&[("USE_CACHE", "false")])).unwrap();
        assert!(!off.use_cache);
        let on = ProxyConfig::from_lookup(lookup(&[("USE_CACHE", "0")])).unwrap();
        assert!(on.use_cache);
    }

    #[test]
    fn rejects_bad_port() {
        let err = ProxyConfig::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "PORT", .. }));
    }

    #[test]
    fn reads_dotenv_style_files() {
        let file = "# local overrides\nPORT=8080\nUSE_CACHE=false\nCACHE_DIR=\"/var/cache/webp\"\n";
        let vars: HashMap<String, String> = dotenvy::from_read_iter(file.as_bytes())
            .map(|item| item.unwrap())
            .collect();

        let cfg = ProxyConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.use_cache);
        assert_eq!(cfg.cache_dir, PathBuf::from("/var/cache/webp"));
    }

    #[test]
    fn validate_rejects_zero_quality() {
        let cfg = ProxyConfig { quality: 0, ..ProxyConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidQuality)));
    }
}
