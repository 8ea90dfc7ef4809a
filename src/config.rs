//! Configuration types, read once from the environment at startup.
//!
//! The core never reads configuration itself; `main` builds these structs and
//! hands them to the components that need them.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";
const DEFAULT_RESEND_API_BASE: &str = "https://api.resend.com";
const DEFAULT_TWITTER_API_BASE: &str = "https://api.twitter.com";
const DEFAULT_FACEBOOK_API_BASE: &str = "https://graph.facebook.com";
const DEFAULT_FROM_EMAIL: &str = "noreply@example.com";

/// Twilio credentials shared by the SMS and chat-app senders.
#[derive(Debug, Clone)]
pub struct TwilioSettings {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
    pub api_base: String,
}

/// How outbound email leaves the process.
#[derive(Debug, Clone)]
pub enum EmailTransport {
    /// Resend HTTP API.
    Resend {
        api_key: SecretString,
        api_base: String,
    },
    /// Plain SMTP relay via lettre.
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: SecretString,
    },
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub from_address: String,
    pub transport: EmailTransport,
}

#[derive(Debug, Clone)]
pub struct TwitterSettings {
    pub access_token: SecretString,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct FacebookSettings {
    pub page_access_token: SecretString,
    pub api_base: String,
}

/// Per-channel credential bag consumed by the sender factory.
///
/// A `None` entry means the channel is not configured; asking the factory for
/// a sender on it yields a configuration error.
#[derive(Debug, Clone, Default)]
pub struct ChannelSettings {
    pub twilio: Option<TwilioSettings>,
    pub email: Option<EmailSettings>,
    pub twitter: Option<TwitterSettings>,
    pub facebook: Option<FacebookSettings>,
}

impl ChannelSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| get(k).filter(|v| !v.trim().is_empty());

        let twilio = match (
            non_empty("TWILIO_ACCOUNT_SID"),
            non_empty("TWILIO_AUTH_TOKEN"),
            non_empty("TWILIO_PHONE_NUMBER"),
        ) {
            (Some(account_sid), Some(token), Some(from_number)) => Some(TwilioSettings {
                account_sid,
                auth_token: SecretString::from(token),
                from_number,
                api_base: non_empty("TWILIO_API_BASE")
                    .unwrap_or_else(|| DEFAULT_TWILIO_API_BASE.to_string()),
            }),
            _ => None,
        };

        let from_address =
            non_empty("FROM_EMAIL").unwrap_or_else(|| DEFAULT_FROM_EMAIL.to_string());
        let email = if let Some(api_key) = non_empty("RESEND_API_KEY") {
            Some(EmailSettings {
                from_address,
                transport: EmailTransport::Resend {
                    api_key: SecretString::from(api_key),
                    api_base: non_empty("RESEND_API_BASE")
                        .unwrap_or_else(|| DEFAULT_RESEND_API_BASE.to_string()),
                },
            })
        } else {
            non_empty("SMTP_HOST").map(|host| EmailSettings {
                from_address,
                transport: EmailTransport::Smtp {
                    host,
                    port: non_empty("SMTP_PORT")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(587),
                    username: non_empty("SMTP_USERNAME").unwrap_or_default(),
                    password: SecretString::from(non_empty("SMTP_PASSWORD").unwrap_or_default()),
                },
            })
        };

        let twitter = non_empty("TWITTER_ACCESS_TOKEN").map(|token| TwitterSettings {
            access_token: SecretString::from(token),
            api_base: non_empty("TWITTER_API_BASE")
                .unwrap_or_else(|| DEFAULT_TWITTER_API_BASE.to_string()),
        });

        let facebook = non_empty("FACEBOOK_PAGE_ACCESS_TOKEN").map(|token| FacebookSettings {
            page_access_token: SecretString::from(token),
            api_base: non_empty("FACEBOOK_API_BASE")
                .unwrap_or_else(|| DEFAULT_FACEBOOK_API_BASE.to_string()),
        });

        Self {
            twilio,
            email,
            twitter,
            facebook,
        }
    }

    /// Names of configured channels, for the startup banner.
    pub fn configured(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.twilio.is_some() {
            out.extend(["sms", "whatsapp"]);
        }
        if self.email.is_some() {
            out.push("email");
        }
        if self.twitter.is_some() {
            out.push("twitter");
        }
        if self.facebook.is_some() {
            out.push("facebook");
        }
        out
    }
}

/// External pub/sub broker endpoint.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub endpoint: String,
    pub app_id: String,
    pub key: String,
    pub secret: SecretString,
}

/// Real-time fan-out configuration. No broker means local mode.
#[derive(Debug, Clone, Default)]
pub struct RealtimeConfig {
    pub broker: Option<BrokerConfig>,
}

impl RealtimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let broker = match (
            non_empty("REALTIME_BROKER_URL"),
            non_empty("REALTIME_BROKER_APP_ID"),
            non_empty("REALTIME_BROKER_KEY"),
            non_empty("REALTIME_BROKER_SECRET"),
        ) {
            (Some(endpoint), Some(app_id), Some(key), Some(secret)) => Some(BrokerConfig {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                app_id,
                key,
                secret: SecretString::from(secret),
            }),
            _ => None,
        };
        Self { broker }
    }
}

/// Scheduler trigger configuration.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Shared secret for the external trigger. `None` rejects every call.
    pub cron_secret: Option<SecretString>,
    /// When set, an in-process ticker also runs the sweep at this interval.
    pub interval: Option<Duration>,
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let cron_secret = get("CRON_SECRET")
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from);

        let interval = match get("SCHEDULER_INTERVAL_SECS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "SCHEDULER_INTERVAL_SECS".into(),
                    message: format!("expected whole seconds, got {raw:?}"),
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            cron_secret,
            interval,
        })
    }
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    pub channels: ChannelSettings,
    pub realtime: RealtimeConfig,
    pub scheduler: SchedulerConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("INBOX_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "INBOX_PORT".into(),
                message: format!("not a port number: {raw:?}"),
            })?,
            Err(_) => 8080,
        };
        let db_path =
            std::env::var("INBOX_DB_PATH").unwrap_or_else(|_| "./data/unified-inbox.db".to_string());

        Ok(Self {
            port,
            db_path,
            channels: ChannelSettings::from_env(),
            realtime: RealtimeConfig::from_env(),
            scheduler: SchedulerConfig::from_env()?,
        })
    }
}
