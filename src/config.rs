use std::error::Error;
use std::fmt::{Debug, Display, Formatter, Result as FormatResult};
use std::fs::File;
use std::io::{BufReader, Error as IoError};
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;
use serde_json::Error as JsonError;

use crate::credentials::DEFAULT_CACHE_TTL_SECONDS;
use crate::export::ExportSettings;
use crate::token::{DEFAULT_TTL_SECONDS, MIN_SECRET_LEN};

const MAX_CODE_TTL_SECONDS: i64 = 86_400;
const MAX_CACHE_TTL_SECONDS: i64 = 7 * 86_400;

#[derive(Debug)]
pub enum ConfigError {
    Io(IoError),
    Json(JsonError),
    Invalid(&'static str),
}

impl Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read configuration: {}", err),
            ConfigError::Json(err) => write!(f, "cannot parse configuration: {}", err),
            ConfigError::Invalid(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

impl From<IoError> for ConfigError {
    fn from(err: IoError) -> ConfigError {
        ConfigError::Io(err)
    }
}

impl From<JsonError> for ConfigError {
    fn from(err: JsonError) -> ConfigError {
        ConfigError::Json(err)
    }
}

/// Where authorization codes are envelope-encrypted.
#[derive(Deserialize, Clone)]
#[serde(tag = "profile", rename_all = "lowercase", deny_unknown_fields)]
pub enum EncryptionProfile {
    Local {
        #[serde(rename = "wrappingKey")]
        wrapping_key: String,
    },
    Kms {
        endpoint: String,
        #[serde(rename = "keyId")]
        key_id: String,
        region: String,
        #[serde(rename = "accessKey", default)]
        access_key: Option<String>,
        #[serde(rename = "secretKey", default)]
        secret_key: Option<String>,
    },
}

impl Debug for EncryptionProfile {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        match self {
            EncryptionProfile::Local { .. } => write!(f, "EncryptionProfile::Local"),
            EncryptionProfile::Kms { endpoint, key_id, region, access_key, .. } => write!(
                f, "EncryptionProfile::Kms {{ endpoint: {}, key_id: {}, region: {}, access_key: {:?} }}",
                endpoint, key_id, region, access_key,
            ),
        }
    }
}

fn default_code_ttl() -> i64 {
    DEFAULT_TTL_SECONDS
}

fn default_context_system() -> String {
    "DIRECT-FILE".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> i64 {
    DEFAULT_CACHE_TTL_SECONDS
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub encryption: EncryptionProfile,
    pub signing_secret: String,
    #[serde(default = "default_code_ttl")]
    pub authorization_code_ttl_seconds: i64,
    #[serde(default = "default_context_system")]
    pub encryption_context_system: String,
    #[serde(default = "default_true")]
    pub export_enabled: bool,
    #[serde(default)]
    pub exported_facts_enabled: bool,
    #[serde(default)]
    pub excluded_tags: Vec<String>,
    #[serde(default = "default_cache_ttl")]
    pub credential_cache_ttl_seconds: i64,
    pub state_credentials: PathBuf,
    pub tax_returns: PathBuf,
    pub exported_facts: PathBuf,
}

impl Config {
    /// Reads and validates a configuration file. Relative paths inside it are taken relative
    /// to the file's directory.
    pub fn load_from<P>(path: P) -> Result<Config, ConfigError> where P: AsRef<Path> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let config: Config = serde_json::from_reader(reader)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolved_against(base).validated()
    }

    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validated()
    }

    fn resolved_against(mut self, base: &Path) -> Config {
        for path in &mut [&mut self.state_credentials, &mut self.tax_returns, &mut self.exported_facts] {
            if path.is_relative() {
                **path = base.join(&**path);
            }
        }
        self
    }

    fn validated(self) -> Result<Config, ConfigError> {
        if self.signing_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid("signingSecret must be at least 32 bytes"));
        }
        if self.authorization_code_ttl_seconds <= 0 || self.authorization_code_ttl_seconds > MAX_CODE_TTL_SECONDS {
            return Err(ConfigError::Invalid("authorizationCodeTtlSeconds must be between 1 and 86400"));
        }
        if self.credential_cache_ttl_seconds <= 0 || self.credential_cache_ttl_seconds > MAX_CACHE_TTL_SECONDS {
            return Err(ConfigError::Invalid("credentialCacheTtlSeconds must be between 1 and 604800"));
        }
        if self.encryption_context_system.is_empty() {
            return Err(ConfigError::Invalid("encryptionContextSystem cannot be empty"));
        }
        if self.excluded_tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(ConfigError::Invalid("excludedTags cannot contain blank names"));
        }
        Ok(self)
    }

    pub fn authorization_code_ttl(&self) -> Duration {
        Duration::seconds(self.authorization_code_ttl_seconds)
    }

    pub fn credential_cache_ttl(&self) -> Duration {
        Duration::seconds(self.credential_cache_ttl_seconds)
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            export_enabled: self.export_enabled,
            exported_facts_enabled: self.exported_facts_enabled,
        }
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        f.debug_struct("Config")
            .field("encryption", &self.encryption)
            .field("authorization_code_ttl_seconds", &self.authorization_code_ttl_seconds)
            .field("encryption_context_system", &self.encryption_context_system)
            .field("export_enabled", &self.export_enabled)
            .field("exported_facts_enabled", &self.exported_facts_enabled)
            .field("excluded_tags", &self.excluded_tags)
            .field("credential_cache_ttl_seconds", &self.credential_cache_ttl_seconds)
            .field("state_credentials", &self.state_credentials)
            .field("tax_returns", &self.tax_returns)
            .field("exported_facts", &self.exported_facts)
            .finish()
    }
}
