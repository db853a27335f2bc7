use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};

/// Secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "secret", "dev-secret-change-me"];

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub encryption_key: String,
    pub legacy_encryption_keys: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub max_messages_per_conversation: usize,
    pub max_page_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("ZCHAT_JWT_SECRET").context("ZCHAT_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim().to_ascii_lowercase().as_str()) {
            bail!("ZCHAT_JWT_SECRET is a placeholder; set a real secret");
        }

        let encryption_key =
            get("ZCHAT_ENCRYPTION_KEY").context("ZCHAT_ENCRYPTION_KEY must be set")?;
        if encryption_key.trim().is_empty() {
            bail!("ZCHAT_ENCRYPTION_KEY must not be empty");
        }

        let ttl_minutes: i64 = parse_or(&get, "ZCHAT_TOKEN_TTL_MINUTES", 1440)?;
        if ttl_minutes <= 0 {
            bail!("ZCHAT_TOKEN_TTL_MINUTES must be positive");
        }
        let token_ttl = Duration::try_minutes(ttl_minutes)
            .filter(|ttl| Utc::now().checked_add_signed(*ttl).is_some())
            .with_context(|| format!("ZCHAT_TOKEN_TTL_MINUTES {} is out of range", ttl_minutes))?;

        Ok(Self {
            host: get("ZCHAT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "ZCHAT_PORT", 8000)?,
            db_path: PathBuf::from(get("ZCHAT_DB_PATH").unwrap_or_else(|| "zchat.db".into())),
            jwt_secret,
            token_ttl,
            encryption_key,
            legacy_encryption_keys: split_list(
                &get("ZCHAT_LEGACY_ENCRYPTION_KEYS").unwrap_or_default(),
            ),
            allowed_origins: split_list(
                &get("ZCHAT_ALLOWED_ORIGINS").unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.into()),
            ),
            max_messages_per_conversation: parse_or(
                &get,
                "ZCHAT_MAX_MESSAGES_PER_CONVERSATION",
                1000,
            )?,
            max_page_size: parse_or(&get, "ZCHAT_MAX_PAGE_SIZE", 200)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

/// Comma-separated list, blanks dropped.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[
            ("ZCHAT_JWT_SECRET", "a-long-random-string"),
            ("ZCHAT_ENCRYPTION_KEY", "passphrase"),
        ])
        .unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.db_path, PathBuf::from("zchat.db"));
        assert_eq!(config.token_ttl, Duration::minutes(1440));
        assert_eq!(config.max_messages_per_conversation, 1000);
        assert_eq!(config.max_page_size, 200);
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:3000", "http://localhost:5173"]
        );
        assert!(config.legacy_encryption_keys.is_empty());
    }

    #[test]
    fn secrets_are_required_and_checked() {
        assert!(load(&[("ZCHAT_ENCRYPTION_KEY", "k")]).is_err());
        assert!(load(&[("ZCHAT_JWT_SECRET", "real-secret")]).is_err());
        assert!(
            load(&[
                ("ZCHAT_JWT_SECRET", "ChangeMe"),
                ("ZCHAT_ENCRYPTION_KEY", "k"),
            ])
            .is_err()
        );
    }

    #[test]
    fn lists_and_numbers_parse() {
        let config = load(&[
            ("ZCHAT_JWT_SECRET", "real-secret"),
            ("ZCHAT_ENCRYPTION_KEY", "k"),
            ("ZCHAT_LEGACY_ENCRYPTION_KEYS", " old1 , ,old2"),
            ("ZCHAT_ALLOWED_ORIGINS", "https://chat.example.com"),
            ("ZCHAT_PORT", "9001"),
            ("ZCHAT_MAX_MESSAGES_PER_CONVERSATION", "0"),
        ])
        .unwrap();

        assert_eq!(config.legacy_encryption_keys, vec!["old1", "old2"]);
        assert_eq!(config.allowed_origins, vec!["https://chat.example.com"]);
        assert_eq!(config.port, 9001);
        assert_eq!(config.max_messages_per_conversation, 0);

        assert!(
            load(&[
                ("ZCHAT_JWT_SECRET", "real-secret"),
                ("ZCHAT_ENCRYPTION_KEY", "k"),
                ("ZCHAT_PORT", "eighty"),
            ])
            .is_err()
        );
    }

    #[test]
    fn token_ttl_out_of_range_is_an_error() {
        for raw in [i64::MAX.to_string(), "200000000000".to_string(), "0".to_string(), "-5".to_string()] {
            let result = load(&[
                ("ZCHAT_JWT_SECRET", "real-secret"),
                ("ZCHAT_ENCRYPTION_KEY", "k"),
                ("ZCHAT_TOKEN_TTL_MINUTES", &raw),
            ]);
            assert!(result.is_err(), "ttl {} should be rejected", raw);
        }

        let config = load(&[
            ("ZCHAT_JWT_SECRET", "real-secret"),
            ("ZCHAT_ENCRYPTION_KEY", "k"),
            ("ZCHAT_TOKEN_TTL_MINUTES", "90"),
        ])
        .unwrap();
        assert_eq!(config.token_ttl, Duration::minutes(90));
    }
}
