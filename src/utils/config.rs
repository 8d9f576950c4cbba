use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::escalation::{Dedupe, DEFAULT_THRESHOLDS};
use crate::identity::IdentityScheme;
use crate::notify::{RetryPolicy, WebhookUrls};

pub const DEFAULT_CONFIG_FILE: &str = "credit-cue.env";

const KEYS: [&str; 13] = [
    "CREDIT_CUE_DB",
    "ESCALATION_THRESHOLDS",
    "ESCALATION_DEDUPE",
    "NOTIFY_MAX_RETRIES",
    "NOTIFY_LOG_PATH",
    "BUSY_TIMEOUT_MS",
    "VOTER_SALT",
    "DISCORD_WEBHOOK_FILMS",
    "DISCORD_WEBHOOK_COMMENTS",
    "DISCORD_WEBHOOK_LIKES",
    "DISCORD_WEBHOOK_REPORTS",
    "DISCORD_WEBHOOK_MODERATION",
    "DISCORD_WEBHOOK_ADMIN",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub thresholds: Vec<u64>,
    pub dedupe: Dedupe,
    pub notify_max_retries: u32,
    /// JSON-lines notification file. `None` sends notifications to the log.
    pub notify_log_path: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub voter_salt: Option<String>,
    /// Webhook channels. When any is set they take precedence over the log sinks.
    pub webhooks: WebhookUrls,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("credit-cue.db"),
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            dedupe: Dedupe::PerEvent,
            notify_max_retries: 3,
            notify_log_path: None,
            busy_timeout: Duration::from_millis(5000),
            voter_salt: None,
            webhooks: WebhookUrls::default(),
        }
    }
}

impl Config {
    /// Reads `path` when it exists, then lets process environment variables of
    /// the same names override it.
    pub fn load(path: &Path) -> Result<Self> {
        let mut pairs = if path.exists() {
            info!("Loading configuration from {:?}", path);
            load_from_env(path)?
        } else {
            debug!("No configuration file at {:?}, using defaults", path);
            HashMap::new()
        };

        for key in KEYS {
            if let Ok(value) = std::env::var(key) {
                pairs.insert(key.to_owned(), value);
            }
        }

        Self::from_pairs(&pairs)
    }

    pub fn from_pairs(pairs: &HashMap<String, String>) -> Result<Self> {
        let mut config = Config::default();
        for (key, value) in pairs {
            config
                .apply(key, value.trim())
                .with_context(|| format!("Invalid value for {key}"))?;
        }
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "CREDIT_CUE_DB" => self.db_path = PathBuf::from(value),
            "ESCALATION_THRESHOLDS" => self.thresholds = parse_thresholds(value)?,
            "ESCALATION_DEDUPE" => self.dedupe = value.parse().map_err(|e: String| anyhow!(e))?,
            "NOTIFY_MAX_RETRIES" => self.notify_max_retries = value.parse()?,
            "NOTIFY_LOG_PATH" => self.notify_log_path = non_empty(value).map(PathBuf::from),
            "BUSY_TIMEOUT_MS" => self.busy_timeout = Duration::from_millis(value.parse()?),
            "VOTER_SALT" => self.voter_salt = non_empty(value).map(str::to_owned),
            "DISCORD_WEBHOOK_FILMS" => self.webhooks.films = non_empty(value).map(str::to_owned),
            "DISCORD_WEBHOOK_COMMENTS" => self.webhooks.comments = non_empty(value).map(str::to_owned),
            "DISCORD_WEBHOOK_LIKES" => self.webhooks.likes = non_empty(value).map(str::to_owned),
            "DISCORD_WEBHOOK_REPORTS" => self.webhooks.reports = non_empty(value).map(str::to_owned),
            "DISCORD_WEBHOOK_MODERATION" => self.webhooks.moderation = non_empty(value).map(str::to_owned),
            "DISCORD_WEBHOOK_ADMIN" => self.webhooks.admin = non_empty(value).map(str::to_owned),
            other => debug!("Ignoring unknown configuration key {}", other),
        }
        Ok(())
    }

    pub fn identity(&self) -> IdentityScheme {
        match &self.voter_salt {
            Some(salt) => IdentityScheme::Salted(salt.clone()),
            None => IdentityScheme::RawIp,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.notify_max_retries,
            ..RetryPolicy::default()
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse_thresholds(value: &str) -> Result<Vec<u64>> {
    let mut thresholds = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().with_context(|| format!("'{s}' is not a number")))
        .collect::<Result<Vec<_>>>()?;
    if thresholds.iter().any(|&t| t == 0) {
        return Err(anyhow!("thresholds must be positive"));
    }
    thresholds.sort_unstable();
    thresholds.dedup();
    Ok(thresholds)
}

fn load_from_env(path: &Path) -> Result<HashMap<String, String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let mut pairs = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            pairs.insert(key.trim().to_owned(), value.trim().to_owned());
        }
    }
    Ok(pairs)
}

pub fn save_to_env(path: &Path, config: &Config) -> Result<()> {
    let mut file = File::create(path).context("Failed to create configuration file")?;
    let thresholds: Vec<String> = config.thresholds.iter().map(u64::to_string).collect();
    let dedupe = match config.dedupe {
        Dedupe::PerEvent => "per-event",
        Dedupe::Lifetime => "lifetime",
    };

    writeln!(file, "CREDIT_CUE_DB={}", config.db_path.display())?;
    writeln!(file, "ESCALATION_THRESHOLDS={}", thresholds.join(","))?;
    writeln!(file, "ESCALATION_DEDUPE={dedupe}")?;
    writeln!(file, "NOTIFY_MAX_RETRIES={}", config.notify_max_retries)?;
    writeln!(
        file,
        "NOTIFY_LOG_PATH={}",
        config
            .notify_log_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    )?;
    writeln!(file, "BUSY_TIMEOUT_MS={}", config.busy_timeout.as_millis())?;
    writeln!(file, "VOTER_SALT={}", config.voter_salt.as_deref().unwrap_or_default())?;

    let hooks = &config.webhooks;
    for (key, url) in [
        ("DISCORD_WEBHOOK_FILMS", &hooks.films),
        ("DISCORD_WEBHOOK_COMMENTS", &hooks.comments),
        ("DISCORD_WEBHOOK_LIKES", &hooks.likes),
        ("DISCORD_WEBHOOK_REPORTS", &hooks.reports),
        ("DISCORD_WEBHOOK_MODERATION", &hooks.moderation),
        ("DISCORD_WEBHOOK_ADMIN", &hooks.admin),
    ] {
        writeln!(file, "{key}={}", url.as_deref().unwrap_or_default())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn pairs(items: &[(&str, &str)]) -> HashMap<String, String> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_save_and_load_env() -> Result<()> {
        let path = std::env::temp_dir().join(format!("credit-cue-config-{}.env", std::process::id()));
        let config = Config {
            db_path: PathBuf::from("/tmp/cue.db"),
            thresholds: vec![2, 4],
            dedupe: Dedupe::Lifetime,
            notify_log_path: Some(PathBuf::from("/tmp/notify.jsonl")),
            voter_salt: Some("pepper".into()),
            webhooks: WebhookUrls {
                reports: Some("https://discord.test/api/webhooks/1/r".into()),
                ..WebhookUrls::default()
            },
            ..Config::default()
        };

        save_to_env(&path, &config)?;

        let content = fs::read_to_string(&path)?;
        assert!(content.contains("CREDIT_CUE_DB=/tmp/cue.db"));
        assert!(content.contains("ESCALATION_THRESHOLDS=2,4"));
        assert!(content.contains("ESCALATION_DEDUPE=lifetime"));

        let loaded = Config::from_pairs(&load_from_env(&path)?)?;
        assert_eq!(loaded, config);

        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_defaults_round_trip_through_empty_values() -> Result<()> {
        let path = std::env::temp_dir().join(format!("credit-cue-defaults-{}.env", std::process::id()));
        save_to_env(&path, &Config::default())?;
        let loaded = Config::from_pairs(&load_from_env(&path)?)?;
        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.identity(), IdentityScheme::RawIp);
        fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn test_thresholds_are_sorted_and_deduplicated() -> Result<()> {
        let config = Config::from_pairs(&pairs(&[("ESCALATION_THRESHOLDS", "10, 3,5,3")]))?;
        assert_eq!(config.thresholds, vec![3, 5, 10]);
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_pairs(&pairs(&[("ESCALATION_THRESHOLDS", "3,x")])).is_err());
        assert!(Config::from_pairs(&pairs(&[("ESCALATION_THRESHOLDS", "0,3")])).is_err());
        assert!(Config::from_pairs(&pairs(&[("ESCALATION_DEDUPE", "sometimes")])).is_err());
        assert!(Config::from_pairs(&pairs(&[("BUSY_TIMEOUT_MS", "-1")])).is_err());
    }

    #[test]
    fn test_salt_selects_fingerprint_identity() -> Result<()> {
        let config = Config::from_pairs(&pairs(&[("VOTER_SALT", "pepper"), ("NOTIFY_MAX_RETRIES", "5")]))?;
        assert_eq!(config.identity(), IdentityScheme::Salted("pepper".into()));
        assert_eq!(config.retry_policy().max_retries, 5);
        Ok(())
    }

    #[test]
    fn test_webhook_keys() -> Result<()> {
        let config = Config::from_pairs(&pairs(&[
            ("DISCORD_WEBHOOK_REPORTS", " https://discord.test/r "),
            ("DISCORD_WEBHOOK_FILMS", "https://discord.test/f"),
            ("DISCORD_WEBHOOK_ADMIN", ""),
        ]))?;
        assert_eq!(config.webhooks.reports.as_deref(), Some("https://discord.test/r"));
        assert_eq!(config.webhooks.admin, None);
        assert!(Config::default().webhooks.is_empty());
        Ok(())
    }
}
