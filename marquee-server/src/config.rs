use std::{env, fmt::Display, str::FromStr};

use log::warn;
use marquee_core::{Config, DisplayIdentity};
use marquee_impls::{FfmpegBotConfig, HttpTransportConfig};
use url::Url;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/marquee";
const DEFAULT_TRANSPORT_URL: &str = "http://localhost:7880";
const DEFAULT_API_KEY: &str = "devkey";
const DEFAULT_API_SECRET: &str = "secret";
const TOKEN_LIFETIME_IN_SECONDS: i64 = 6 * 60 * 60;

/// Everything the server is configured with, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    /// Relay events through postgres, for running several instances side by side
    pub distributed_events: bool,
    pub coordinator: Config,
    pub transport: HttpTransportConfig,
    pub bot: FfmpegBotConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration with the given variable lookup.
    /// Unparsable values are warned about and replaced by their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = Config::default();

        let transport_url = vars.parse::<Url>("MARQUEE_TRANSPORT_URL").unwrap_or_else(|| {
            Url::parse(DEFAULT_TRANSPORT_URL).expect("default transport url is valid")
        });

        let api_key = vars.string("MARQUEE_TRANSPORT_API_KEY", DEFAULT_API_KEY);
        let api_secret = vars.string("MARQUEE_TRANSPORT_API_SECRET", DEFAULT_API_SECRET);

        if api_secret == DEFAULT_API_SECRET {
            warn!("MARQUEE_TRANSPORT_API_SECRET is not set, using the development secret");
        }

        let display_identity = match vars.get("MARQUEE_DISPLAY_IDENTITY").as_deref() {
            None => defaults.display_identity,
            Some("email") => DisplayIdentity::Email,
            Some("username") => DisplayIdentity::Username,
            Some(other) => {
                warn!(
                    "MARQUEE_DISPLAY_IDENTITY must be email or username, not {}",
                    other
                );
                defaults.display_identity
            }
        };

        let bot_defaults = FfmpegBotConfig::default();
        let bot = FfmpegBotConfig {
            ffmpeg_path: vars.string("MARQUEE_FFMPEG_PATH", &bot_defaults.ffmpeg_path),
            publish_url: vars.string("MARQUEE_BOT_PUBLISH_URL", &bot_defaults.publish_url),
            ..bot_defaults
        };

        let coordinator = Config {
            scheduler_interval_in_seconds: vars
                .parse::<u64>("MARQUEE_SCHEDULER_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .unwrap_or(defaults.scheduler_interval_in_seconds),
            media_base_url: vars.string("MARQUEE_MEDIA_BASE_URL", &defaults.media_base_url),
            fallback_enabled: vars
                .parse("MARQUEE_FALLBACK_ENABLED")
                .unwrap_or(defaults.fallback_enabled),
            bot_frame_rate: bot.frame_rate,
            display_identity,
            ..defaults
        };

        Self {
            port: vars.parse("MARQUEE_SERVER_PORT").unwrap_or(DEFAULT_PORT),
            database_url: vars.string("DATABASE_URL", DEFAULT_DATABASE_URL),
            distributed_events: vars.parse("MARQUEE_DISTRIBUTED_EVENTS").unwrap_or(false),
            coordinator,
            transport: HttpTransportConfig {
                url: transport_url,
                api_key,
                api_secret,
                token_lifetime_in_seconds: TOKEN_LIFETIME_IN_SECONDS,
            },
            bot,
        }
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.get(key)?;

        match value.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("Ignoring {}={}: {}", key, value, err);
                None
            }
        }
    }
}
