//! Command line / environment configuration.
//!
//! Every option can be given as a flag or through the environment variable
//! named next to it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::api::ApiServerConfig;
use crate::cache::CacheConfig;
use crate::downloader::{ErrorVocabulary, YtDlpConfig};
use crate::error::{Error, Result};
use crate::throttle::{FailureMemoryConfig, RateConfig};

/// Upper bound for the spacing and cooldown knobs
const MAX_DELAY_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "youtube-download-server",
    version,
    about = "Downloads YouTube videos with yt-dlp, caches them and streams them over HTTP"
)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8765)]
    pub port: u16,

    /// Required in the X-API-Key header when set
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Cache directory [default: ~/Downloads/OfflineYT_Server]
    #[arg(long, env = "DOWNLOADS_DIR")]
    pub downloads_dir: Option<PathBuf>,

    /// yt-dlp working directory, emptied on shutdown [default: <tmp>/yt_server_temp]
    #[arg(long, env = "TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// yt-dlp binary [default: ~/.local/bin/yt-dlp, then PATH]
    #[arg(long, env = "YTDLP_PATH")]
    pub ytdlp_path: Option<PathBuf>,

    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// Netscape cookies file passed to yt-dlp
    #[arg(long, env = "COOKIES_FILE")]
    pub cookies_file: Option<PathBuf>,

    /// Proxy URL passed to yt-dlp
    #[arg(long, env = "YTDLP_PROXY")]
    pub proxy: Option<String>,

    /// Videos kept in the cache
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value_t = 20,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub cache_max_entries: u32,

    /// Per-format yt-dlp timeout
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 600)]
    pub fetch_timeout_secs: u64,

    /// How long a failure is remembered
    #[arg(long, env = "FAIL_MEMORY_SECS", default_value_t = 300)]
    pub fail_memory_secs: u64,

    /// Failures within the memory window that block a video
    #[arg(long, env = "MAX_FAILS", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub max_fails: u32,

    #[arg(long, env = "MIN_DELAY_SECS", default_value_t = 3.0)]
    pub min_delay_secs: f64,

    #[arg(long, env = "MAX_DELAY_SECS", default_value_t = 6.0)]
    pub max_delay_secs: f64,

    #[arg(long, env = "BLOCK_COOLDOWN_MIN_SECS", default_value_t = 30)]
    pub block_cooldown_min_secs: u64,

    #[arg(long, env = "BLOCK_COOLDOWN_MAX_SECS", default_value_t = 60)]
    pub block_cooldown_max_secs: u64,

    /// Comma-separated error substrings that mean bot detection
    #[arg(long, env = "BLOCK_PATTERNS", value_delimiter = ',')]
    pub block_patterns: Vec<String>,

    /// Comma-separated error substrings that mean the format was refused
    #[arg(long, env = "FORMAT_PATTERNS", value_delimiter = ',')]
    pub format_patterns: Vec<String>,

    #[arg(long)]
    pub no_cors: bool,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let finite = self.min_delay_secs.is_finite() && self.max_delay_secs.is_finite();
        if !(finite
            && self.min_delay_secs >= 0.0
            && self.min_delay_secs <= self.max_delay_secs
            && self.max_delay_secs <= MAX_DELAY_SECS)
        {
            return Err(Error::config(format!(
                "invalid delay range {}..{}",
                self.min_delay_secs, self.max_delay_secs
            )));
        }
        if self.block_cooldown_min_secs > self.block_cooldown_max_secs
            || self.block_cooldown_max_secs as f64 > MAX_DELAY_SECS
        {
            return Err(Error::config(format!(
                "invalid block cooldown range {}..{}",
                self.block_cooldown_min_secs, self.block_cooldown_max_secs
            )));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(Error::config("fetch timeout must be positive"));
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("yt_server_temp"))
    }

    pub fn cache_config(&self) -> CacheConfig {
        let default = CacheConfig::default();
        CacheConfig {
            dir: self.downloads_dir.clone().unwrap_or(default.dir),
            max_entries: self.cache_max_entries as usize,
        }
    }

    pub fn vocabulary(&self) -> ErrorVocabulary {
        let default = ErrorVocabulary::default();
        let block = if self.block_patterns.is_empty() {
            default.block_patterns
        } else {
            self.block_patterns.clone()
        };
        let format = if self.format_patterns.is_empty() {
            default.format_patterns
        } else {
            self.format_patterns.clone()
        };
        ErrorVocabulary::new(block, format)
    }

    pub fn ytdlp_config(&self, binary: PathBuf) -> YtDlpConfig {
        YtDlpConfig {
            binary,
            temp_dir: self.temp_dir(),
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            cookies_file: self.cookies_file.clone(),
            proxy: self.proxy.clone().filter(|p| !p.is_empty()),
            vocabulary: self.vocabulary(),
        }
    }

    pub fn failure_config(&self) -> FailureMemoryConfig {
        FailureMemoryConfig {
            window: Duration::from_secs(self.fail_memory_secs),
            max_fails: self.max_fails,
        }
    }

    pub fn rate_config(&self) -> RateConfig {
        RateConfig {
            min_spacing: Duration::from_secs_f64(self.min_delay_secs),
            max_spacing: Duration::from_secs_f64(self.max_delay_secs),
            block_cooldown_min: Duration::from_secs(self.block_cooldown_min_secs),
            block_cooldown_max: Duration::from_secs(self.block_cooldown_max_secs),
        }
    }

    pub fn server_config(&self) -> ApiServerConfig {
        ApiServerConfig {
            bind_address: self.host.clone(),
            port: self.port,
            api_key: self.api_key.clone().filter(|k| !k.is_empty()),
            enable_cors: !self.no_cors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("youtube-download-server").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        config.validate().unwrap();

        let failure = config.failure_config();
        assert_eq!(failure.window, Duration::from_secs(300));
        assert_eq!(failure.max_fails, 2);

        let rate = config.rate_config();
        assert_eq!(rate.min_spacing, Duration::from_secs(3));
        assert_eq!(rate.block_cooldown_max, Duration::from_secs(60));

        let ytdlp = config.ytdlp_config(PathBuf::from("yt-dlp"));
        assert_eq!(ytdlp.timeout, Duration::from_secs(600));
        assert!(ytdlp.vocabulary.block_patterns.contains(&"sign in".to_string()));
    }

    #[test]
    fn test_custom_vocabulary() {
        let config = parse(&["--block-patterns", "captcha, Unusual Traffic", "--port", "9000"]);
        let vocabulary = config.vocabulary();
        assert_eq!(vocabulary.block_patterns, vec!["captcha", "unusual traffic"]);
        assert!(vocabulary.format_patterns.contains(&"403".to_string()));
        assert_eq!(config.server_config().port, 9000);
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let config = parse(&["--min-delay-secs", "10", "--max-delay-secs", "2"]);
        assert!(config.validate().is_err());

        let config = parse(&["--min-delay-secs", "inf", "--max-delay-secs", "inf"]);
        assert!(config.validate().is_err());

        let config = parse(&["--min-delay-secs", "1", "--max-delay-secs", "NaN"]);
        assert!(config.validate().is_err());

        let config = parse(&["--max-delay-secs", "1e30"]);
        assert!(config.validate().is_err());

        let config = parse(&["--block-cooldown-min-secs", "90"]);
        assert!(config.validate().is_err());

        assert!(Config::try_parse_from(["x", "--cache-max-entries", "0"]).is_err());
    }

    #[test]
    fn test_empty_api_key_disables_auth() {
        let config = parse(&["--api-key", ""]);
        assert!(config.server_config().api_key.is_none());
    }
}
