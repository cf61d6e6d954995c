use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::services::backends::RetryPolicy;

const ENV_PREFIX: &str = "EVENT_VAULT_";
const GIB: u64 = 1024 * 1024 * 1024;
const MAX_RETENTION_DAYS: i64 = 36_500;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Include internal error details in HTTP responses.
    pub development: bool,
    pub primary: RemoteSettings,
    pub secondary: RemoteSettings,
    pub local: LocalSettings,
    pub quota: QuotaSettings,
    pub tiering: TieringSettings,
    pub backup: BackupSettings,
    pub retry: RetrySettings,
    pub maintenance: MaintenanceSettings,
}

/// Connection settings for an S3-compatible backend.
///
/// When `bucket` is unset the backend is served from a directory under
/// `storage_dir`, which keeps development setups self-contained.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub bucket: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_url: Option<String>,
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub public_url: String,
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct QuotaSettings {
    /// Share of each backend's capacity kept in reserve.
    pub safety_margin: f64,
}

#[derive(Debug, Clone)]
pub struct TieringSettings {
    pub default_compression_quality: f32,
    pub premium_compression_quality: f32,
    /// When set, standard objects above this size prefer the secondary tier
    /// even while primary has space. Unset keeps primary first.
    pub bulk_threshold_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Photo copies in flight per job.
    pub concurrency: usize,
    /// Failure ratio above which a job ends `failed`.
    pub failure_threshold: f64,
    /// Timeout for photo enumeration.
    pub enumeration_timeout: Duration,
    /// Key prefix for backup copies on the secondary backend.
    pub key_prefix: String,
    /// Bound of the job read-through cache.
    pub cache_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub quota_refresh_interval: Duration,
    pub cleanup_interval: Duration,
    pub job_retention_days: i64,
    pub stats_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Tiered photo storage and event backup service")]
pub struct Args {
    /// Host to bind to (overrides EVENT_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides EVENT_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for local storage (overrides EVENT_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides EVENT_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Expose internal error details in responses (overrides EVENT_VAULT_DEVELOPMENT)
    #[arg(long)]
    pub development: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            storage_dir: "./data/objects".into(),
            database_url: "sqlite://./data/meta/event_vault.db".into(),
            development: false,
            primary: RemoteSettings::default(),
            secondary: RemoteSettings::default(),
            local: LocalSettings {
                public_url: "http://localhost:3000/files".into(),
                capacity_bytes: 100 * GIB,
            },
            quota: QuotaSettings {
                safety_margin: 0.05,
            },
            tiering: TieringSettings {
                default_compression_quality: 0.90,
                premium_compression_quality: 0.95,
                bulk_threshold_bytes: None,
            },
            backup: BackupSettings {
                concurrency: 4,
                failure_threshold: 0.10,
                enumeration_timeout: Duration::from_secs(30),
                key_prefix: "backups".into(),
                cache_capacity: 256,
            },
            retry: RetrySettings {
                max_attempts: 3,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(5),
                attempt_timeout: Duration::from_secs(30),
            },
            maintenance: MaintenanceSettings {
                quota_refresh_interval: Duration::from_secs(300),
                cleanup_interval: Duration::from_secs(3600),
                job_retention_days: 7,
                stats_timeout: Duration::from_secs(10),
            },
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            bucket: None,
            region: "auto".into(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            public_url: None,
            capacity_bytes: 10 * GIB,
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_host = env_or("HOST", defaults.host)?;
        let env_port = env_or("PORT", defaults.port)?;
        let env_storage = env_or("STORAGE_DIR", defaults.storage_dir)?;
        let env_db = env_or("DATABASE_URL", defaults.database_url)?;
        let env_development = env_or("DEVELOPMENT", defaults.development)?;

        let retry = RetrySettings {
            max_attempts: env_or("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: env_millis("RETRY_BASE_DELAY_MS", defaults.retry.base_delay)?,
            max_delay: env_millis("RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?,
            attempt_timeout: env_secs("RETRY_TIMEOUT_SECS", defaults.retry.attempt_timeout)?,
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            development: args.development || env_development,
            primary: RemoteSettings::from_env("PRIMARY")?,
            secondary: RemoteSettings::from_env("SECONDARY")?,
            local: LocalSettings {
                public_url: env_or("LOCAL_PUBLIC_URL", defaults.local.public_url)?,
                capacity_bytes: env_or("LOCAL_CAPACITY_BYTES", defaults.local.capacity_bytes)?,
            },
            quota: QuotaSettings {
                safety_margin: env_or("QUOTA_SAFETY_MARGIN", defaults.quota.safety_margin)?,
            },
            tiering: TieringSettings {
                default_compression_quality: env_or(
                    "DEFAULT_COMPRESSION_QUALITY",
                    defaults.tiering.default_compression_quality,
                )?,
                premium_compression_quality: env_or(
                    "PREMIUM_COMPRESSION_QUALITY",
                    defaults.tiering.premium_compression_quality,
                )?,
                bulk_threshold_bytes: env_parse_opt("BULK_THRESHOLD_BYTES")?,
            },
            backup: BackupSettings {
                concurrency: env_or("BACKUP_CONCURRENCY", defaults.backup.concurrency)?,
                failure_threshold: env_or(
                    "BACKUP_FAILURE_THRESHOLD",
                    defaults.backup.failure_threshold,
                )?,
                enumeration_timeout: env_secs(
                    "BACKUP_ENUMERATION_TIMEOUT_SECS",
                    defaults.backup.enumeration_timeout,
                )?,
                key_prefix: env_or("BACKUP_KEY_PREFIX", defaults.backup.key_prefix)?,
                cache_capacity: env_or("BACKUP_CACHE_CAPACITY", defaults.backup.cache_capacity)?,
            },
            retry,
            maintenance: MaintenanceSettings {
                quota_refresh_interval: env_secs(
                    "QUOTA_REFRESH_INTERVAL_SECS",
                    defaults.maintenance.quota_refresh_interval,
                )?,
                cleanup_interval: env_secs(
                    "CLEANUP_INTERVAL_SECS",
                    defaults.maintenance.cleanup_interval,
                )?,
                job_retention_days: env_or(
                    "JOB_RETENTION_DAYS",
                    defaults.maintenance.job_retention_days,
                )?,
                stats_timeout: env_secs("STATS_TIMEOUT_SECS", defaults.maintenance.stats_timeout)?,
            },
        };

        cfg.validate()?;
        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject settings that would make tiering or backups misbehave.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.quota.safety_margin) {
            anyhow::bail!("quota safety margin must be in [0, 1)");
        }
        if !(0.0..=1.0).contains(&self.backup.failure_threshold) {
            anyhow::bail!("backup failure threshold must be in [0, 1]");
        }
        if self.backup.concurrency == 0 {
            anyhow::bail!("backup concurrency must be at least 1");
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.maintenance.job_retention_days) {
            anyhow::bail!("job retention must be between 0 and {MAX_RETENTION_DAYS} days");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry attempts must be at least 1");
        }
        for quality in [
            self.tiering.default_compression_quality,
            self.tiering.premium_compression_quality,
        ] {
            if !(quality > 0.0 && quality <= 1.0) {
                anyhow::bail!("compression quality must be in (0, 1]");
            }
        }
        Ok(())
    }

    /// Retry policy handed to each backend adapter.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: self.retry.base_delay,
            max_delay: self.retry.max_delay,
            timeout: self.retry.attempt_timeout,
        }
    }
}

impl RemoteSettings {
    /// Read `EVENT_VAULT_{tier}_*` variables, e.g. `EVENT_VAULT_PRIMARY_BUCKET`.
    fn from_env(tier: &str) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bucket: env_opt(&format!("{tier}_BUCKET")),
            region: env_or(&format!("{tier}_REGION"), defaults.region)?,
            endpoint: env_opt(&format!("{tier}_ENDPOINT")),
            access_key_id: env_opt(&format!("{tier}_ACCESS_KEY_ID")),
            secret_access_key: env_opt(&format!("{tier}_SECRET_ACCESS_KEY")),
            public_url: env_opt(&format!("{tier}_PUBLIC_URL")),
            capacity_bytes: env_or(&format!("{tier}_CAPACITY_BYTES"), defaults.capacity_bytes)?,
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}{name}");
    match env::var(&key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn env_parse_opt<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_opt(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`"))
        })
        .transpose()
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    env_or(name, default.as_secs()).map(Duration::from_secs)
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    env_or(name, default.as_millis() as u64).map(Duration::from_millis)
}
