use odata_batch::BatchConfig;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("service root '{0}' must be empty or start with '/'")]
    InvalidServiceRoot(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path prefix of the service, e.g. `/odata`. Empty mounts at `/`.
    pub service_root: String,
    pub max_batch_parts: usize,
    pub strict_batch_parsing: bool,
    pub log_dir: PathBuf,
    pub log_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            service_root: "/odata".to_string(),
            max_batch_parts: 100,
            strict_batch_parsing: true,
            log_dir: PathBuf::from("logs"),
            log_prefix: "odata-server".to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `ODATA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = ServerConfig::default();
        if let Some(host) = lookup("ODATA_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("ODATA_PORT") {
            config.port = parse("ODATA_PORT", &port)?;
        }
        if let Some(root) = lookup("ODATA_SERVICE_ROOT") {
            config.service_root = root;
        }
        if let Some(parts) = lookup("ODATA_MAX_BATCH_PARTS") {
            config.max_batch_parts = parse("ODATA_MAX_BATCH_PARTS", &parts)?;
        }
        if let Some(strict) = lookup("ODATA_STRICT_BATCH") {
            config.strict_batch_parsing = parse_flag("ODATA_STRICT_BATCH", &strict)?;
        }
        if let Some(dir) = lookup("ODATA_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        config.validate()
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        let root = self.service_root.trim_end_matches('/');
        if !root.is_empty() && !root.starts_with('/') {
            return Err(ConfigError::InvalidServiceRoot(self.service_root));
        }
        self.service_root = root.to_string();
        if self.max_batch_parts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ODATA_MAX_BATCH_PARTS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Absolute service root used for `Location` headers and batch URIs.
    pub fn base_uri(&self) -> String {
        format!("http://{}{}", self.addr(), self.service_root)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            base_uri: self.base_uri(),
            strict: self.strict_batch_parsing,
            max_parts: self.max_batch_parts,
        }
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.base_uri(), "http://127.0.0.1:8080/odata");
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("ODATA_PORT", "9090"),
            ("ODATA_SERVICE_ROOT", "/svc/"),
            ("ODATA_STRICT_BATCH", "off"),
            ("ODATA_MAX_BATCH_PARTS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.service_root, "/svc");
        assert!(!config.strict_batch_parsing);
        let batch = config.batch_config();
        assert_eq!(batch.max_parts, 5);
        assert_eq!(batch.base_uri, "http://127.0.0.1:9090/svc");
    }

    #[test]
    fn test_invalid_values() {
        let err = ServerConfig::from_lookup(lookup(&[("ODATA_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ODATA_PORT", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("ODATA_STRICT_BATCH", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ODATA_STRICT_BATCH", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("ODATA_SERVICE_ROOT", "odata")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidServiceRoot("odata".to_string()));

        assert!(ServerConfig::from_lookup(lookup(&[("ODATA_MAX_BATCH_PARTS", "0")])).is_err());
    }
}
