use std::{env, fmt, net::SocketAddr, time::Duration};

use super::{database_url, server_bind_address};

const DEV_TOKEN_SECRET: &str = "dev-token-secret";
const DEV_MIDTRANS_SERVER_KEY: &str = "SB-Mid-server-dev";
const SANDBOX_SNAP_URL: &str = "https://app.sandbox.midtrans.com/snap/v1/";
const PRODUCTION_SNAP_URL: &str = "https://app.midtrans.com/snap/v1/";
const DEFAULT_JOB_POST_COST: i64 = 1;
const DEFAULT_STATS_TTL_SECS: u64 = 300;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Payment provider credentials.
#[derive(Debug, Clone)]
pub struct MidtransConfig {
    pub server_key: String,
    pub snap_url: String,
    pub is_production: bool,
}

/// Transactional mail API settings. Absent when `MAIL_API_URL` is unset.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from_address: String,
}

/// WhatsApp gateway settings. Absent when `WHATSAPP_API_URL` is unset.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub token: String,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub auth_token_secret: Vec<u8>,
    pub midtrans: MidtransConfig,
    pub job_post_cost: i64,
    pub mail: Option<MailConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub invitation_stats_ttl: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let auth_token_secret = secret(environment, "AUTH_TOKEN_SECRET", DEV_TOKEN_SECRET)?;
        let server_key = secret(environment, "MIDTRANS_SERVER_KEY", DEV_MIDTRANS_SERVER_KEY)?;
        let is_production = parse_bool("MIDTRANS_IS_PRODUCTION")?;
        let mut snap_url = env::var("MIDTRANS_SNAP_URL").unwrap_or_else(|_| {
            if is_production {
                PRODUCTION_SNAP_URL.to_string()
            } else {
                SANDBOX_SNAP_URL.to_string()
            }
        });
        if !snap_url.ends_with('/') {
            snap_url.push('/');
        }

        let job_post_cost = match env::var("JOB_POST_POINT_COST") {
            Ok(raw) => match raw.parse::<i64>() {
                Ok(value) if value > 0 => value,
                _ => return Err(ConfigError::InvalidNumber("JOB_POST_POINT_COST", raw)),
            },
            Err(_) => DEFAULT_JOB_POST_COST,
        };

        let stats_ttl_secs = match env::var("INVITATION_STATS_TTL_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber("INVITATION_STATS_TTL_SECS", raw))?,
            Err(_) => DEFAULT_STATS_TTL_SECS,
        };

        let mail = match env::var("MAIL_API_URL") {
            Ok(api_url) => Some(MailConfig {
                api_url,
                api_key: env::var("MAIL_API_KEY")
                    .map_err(|_| ConfigError::MissingVariable("MAIL_API_KEY"))?,
                from_address: env::var("MAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "no-reply@jobboard.local".to_string()),
            }),
            Err(_) => None,
        };

        let whatsapp = match env::var("WHATSAPP_API_URL") {
            Ok(api_url) => Some(WhatsAppConfig {
                api_url,
                token: env::var("WHATSAPP_API_TOKEN")
                    .map_err(|_| ConfigError::MissingVariable("WHATSAPP_API_TOKEN"))?,
            }),
            Err(_) => None,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            auth_token_secret: auth_token_secret.into_bytes(),
            midtrans: MidtransConfig {
                server_key,
                snap_url,
                is_production,
            },
            job_post_cost,
            mail,
            whatsapp,
            invitation_stats_ttl: Duration::from_secs(stats_ttl_secs),
        })
    }
}

fn secret(
    environment: Environment,
    name: &'static str,
    dev_default: &str,
) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ if environment == Environment::Production => Err(ConfigError::MissingVariable(name)),
        _ => Ok(dev_default.to_string()),
    }
}

fn parse_bool(name: &'static str) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            _ => Err(ConfigError::InvalidBool(name, raw)),
        },
        Err(_) => Ok(false),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVariable(&'static str),
    InvalidNumber(&'static str, String),
    InvalidBool(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVariable(name) => write!(f, "{name} must be set"),
            Self::InvalidNumber(name, value) => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
            Self::InvalidBool(name, value) => write!(f, "{name} must be true or false (got {value})"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ENV_GUARD;
    use crate::DEFAULT_BIND_ADDR;

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "AUTH_TOKEN_SECRET",
        "MIDTRANS_SERVER_KEY",
        "MIDTRANS_IS_PRODUCTION",
        "MIDTRANS_SNAP_URL",
        "JOB_POST_POINT_COST",
        "INVITATION_STATS_TTL_SECS",
        "MAIL_API_URL",
        "MAIL_API_KEY",
        "WHATSAPP_API_URL",
        "WHATSAPP_API_TOKEN",
    ];

    fn clear_env() {
        for name in VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.job_post_cost, 1);
        assert_eq!(config.midtrans.snap_url, SANDBOX_SNAP_URL);
        assert!(config.mail.is_none());
        assert!(config.whatsapp.is_none());
        assert_eq!(config.invitation_stats_ttl, Duration::from_secs(300));
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        clear_env();
    }

    #[test]
    fn production_requires_secrets() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("APP_ENV", "production");

        let err = AppConfig::from_env().expect_err("missing secret should error");
        assert!(matches!(err, ConfigError::MissingVariable("AUTH_TOKEN_SECRET")));

        env::set_var("AUTH_TOKEN_SECRET", "prod-secret");
        env::set_var("MIDTRANS_SERVER_KEY", "Mid-server-prod");
        env::set_var("MIDTRANS_IS_PRODUCTION", "true");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.auth_token_secret, b"prod-secret".to_vec());
        assert_eq!(config.midtrans.snap_url, PRODUCTION_SNAP_URL);

        clear_env();
    }

    #[test]
    fn snap_url_override_gets_trailing_slash() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("MIDTRANS_SNAP_URL", "https://snap.example.test/snap/v1");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.midtrans.snap_url, "https://snap.example.test/snap/v1/");

        env::set_var("MIDTRANS_SNAP_URL", "https://snap.example.test/snap/v1/");
        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.midtrans.snap_url, "https://snap.example.test/snap/v1/");

        clear_env();
    }

    #[test]
    fn rejects_non_positive_job_cost() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("JOB_POST_POINT_COST", "0");

        let err = AppConfig::from_env().expect_err("zero cost should error");
        assert!(matches!(err, ConfigError::InvalidNumber("JOB_POST_POINT_COST", _)));

        clear_env();
    }

    #[test]
    fn mail_requires_api_key_when_url_present() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_env();
        env::set_var("MAIL_API_URL", "https://mail.example.test/");

        let err = AppConfig::from_env().expect_err("missing key should error");
        assert!(matches!(err, ConfigError::MissingVariable("MAIL_API_KEY")));

        env::set_var("MAIL_API_KEY", "key");
        let config = AppConfig::from_env().expect("config should load");
        let mail = config.mail.expect("mail configured");
        assert_eq!(mail.api_url, "https://mail.example.test/");

        clear_env();
    }
}
