use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::stores::S3Config;

const ENV_PREFIX: &str = "TIERED_STORAGE_";
const DEV_LOCATOR_SECRET: &str = "dev-only-locator-secret";

/// Where the Durable tier lives.
#[derive(Debug, Clone)]
pub enum DurableBackend {
    /// A directory (e.g. a mounted bucket) served at `public_url`.
    Fs { dir: String, public_url: String },
    S3(S3Config),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    pub fast_dir: String,
    /// Base of signed Fast-tier locators; normally this server's `/objects`.
    pub fast_public_url: String,
    pub locator_secret: String,
    pub locator_ttl: Duration,

    pub durable: DurableBackend,

    pub sync_chunk_size: usize,
    pub sync_workers: usize,
    pub sync_lease: Duration,
    pub delete_local_after_sync: bool,
    pub sync_max_attempts: Option<u32>,

    pub max_file_size_bytes: u64,
}

/// What the binary should do after loading config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    SyncOnce,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Tiered object storage with background sync")]
pub struct Args {
    /// Host to bind to (overrides TIERED_STORAGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TIERED_STORAGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides TIERED_STORAGE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Fast-tier directory (overrides TIERED_STORAGE_FAST_DIR)
    #[arg(long)]
    pub fast_dir: Option<String>,

    /// Durable backend, `fs` or `s3` (overrides TIERED_STORAGE_DURABLE_BACKEND)
    #[arg(long)]
    pub durable_backend: Option<String>,

    /// Files per sync batch (overrides TIERED_STORAGE_SYNC_CHUNK_SIZE)
    #[arg(long)]
    pub sync_chunk_size: Option<usize>,

    /// Concurrent transfers per batch (overrides TIERED_STORAGE_SYNC_WORKERS)
    #[arg(long)]
    pub sync_workers: Option<usize>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "sync_once")]
    pub migrate: bool,

    /// Run one sync pass, print its summary, and exit
    #[arg(long)]
    pub sync_once: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();
        Self::from_sources(args, |name| env::var(name).ok())
    }

    /// Merge `args` over variables read through `lookup` over defaults.
    ///
    /// `lookup` receives the unprefixed name (e.g. `PORT`).
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<(Self, RunMode)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        let host = args
            .host
            .or_else(|| var("HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&var, "PORT", 3000)?,
        };
        let database_url = args
            .database_url
            .or_else(|| var("DATABASE_URL"))
            .unwrap_or_else(|| "sqlite://./data/meta/tiered_storage.db".into());

        let fast_dir = args
            .fast_dir
            .or_else(|| var("FAST_DIR"))
            .unwrap_or_else(|| "./data/fast".into());
        let fast_public_url = var("FAST_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://localhost:{}/objects", port));
        let locator_secret = var("LOCATOR_SECRET").unwrap_or_else(|| DEV_LOCATOR_SECRET.into());
        let locator_ttl = Duration::from_secs(parse_var(&var, "LOCATOR_TTL_SECS", 86_400)?);

        let backend = args
            .durable_backend
            .or_else(|| var("DURABLE_BACKEND"))
            .unwrap_or_else(|| "fs".into());
        let durable = match backend.to_ascii_lowercase().as_str() {
            "fs" => DurableBackend::Fs {
                dir: var("DURABLE_DIR").unwrap_or_else(|| "./data/durable".into()),
                public_url: var("DURABLE_PUBLIC_URL")
                    .unwrap_or_else(|| "file://./data/durable".into()),
            },
            "s3" => {
                let bucket = var("S3_BUCKET")
                    .filter(|b| !b.trim().is_empty())
                    .with_context(|| {
                        format!("{}S3_BUCKET is required for the s3 backend", ENV_PREFIX)
                    })?;
                let mut s3 = S3Config::aws(
                    bucket,
                    var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                );
                s3.endpoint = var("S3_ENDPOINT");
                s3.prefix = var("S3_PREFIX");
                s3.presign_ttl = match var("S3_PRESIGN_TTL_SECS") {
                    Some(value) => Some(Duration::from_secs(value.trim().parse().with_context(
                        || format!("parsing {}S3_PRESIGN_TTL_SECS value `{}`", ENV_PREFIX, value),
                    )?)),
                    None => None,
                };
                DurableBackend::S3(s3)
            }
            other => bail!("unknown durable backend `{}` (expected `fs` or `s3`)", other),
        };

        let sync_chunk_size = match args.sync_chunk_size {
            Some(size) => size,
            None => parse_var(&var, "SYNC_CHUNK_SIZE", 10)?,
        };
        let sync_workers = match args.sync_workers {
            Some(workers) => workers,
            None => parse_var(&var, "SYNC_WORKERS", 3)?,
        };
        let sync_lease_secs: u64 = parse_var(&var, "SYNC_LEASE_SECS", 900)?;
        let delete_local_after_sync = parse_bool(&var, "DELETE_LOCAL_AFTER_SYNC", false)?;
        let sync_max_attempts = match var("SYNC_MAX_ATTEMPTS") {
            Some(value) => Some(value.parse::<u32>().with_context(|| {
                format!("parsing {}SYNC_MAX_ATTEMPTS value `{}`", ENV_PREFIX, value)
            })?),
            None => None,
        };
        let max_file_size_mb: u64 = parse_var(&var, "MAX_FILE_SIZE_MB", 100)?;

        if sync_chunk_size == 0 {
            bail!("sync chunk size must be at least 1");
        }
        if sync_workers == 0 {
            bail!("sync workers must be at least 1");
        }
        if sync_lease_secs == 0 {
            bail!("sync lease must be at least 1 second");
        }
        if max_file_size_mb == 0 {
            bail!("max file size must be at least 1 MB");
        }

        let cfg = Self {
            host,
            port,
            database_url,
            fast_dir,
            fast_public_url,
            locator_secret,
            locator_ttl,
            durable,
            sync_chunk_size,
            sync_workers,
            sync_lease: Duration::from_secs(sync_lease_secs),
            delete_local_after_sync,
            sync_max_attempts,
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.sync_once {
            RunMode::SyncOnce
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.locator_secret == DEV_LOCATOR_SECRET
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, value)),
        None => Ok(default),
    }
}

fn parse_bool(var: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    match var(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => bail!("parsing {}{} value `{}` as a boolean", ENV_PREFIX, name, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(args: Args, vars: &[(&str, &str)]) -> Result<(AppConfig, RunMode)> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        AppConfig::from_sources(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let (cfg, mode) = load(Args::default(), &[]).unwrap();
        assert_eq!(mode, RunMode::Serve);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.sync_chunk_size, 10);
        assert_eq!(cfg.sync_workers, 3);
        assert_eq!(cfg.sync_lease, Duration::from_secs(900));
        assert!(!cfg.delete_local_after_sync);
        assert_eq!(cfg.sync_max_attempts, None);
        assert_eq!(cfg.max_file_size_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.locator_ttl, Duration::from_secs(86_400));
        assert!(cfg.uses_dev_secret());
        assert!(matches!(cfg.durable, DurableBackend::Fs { .. }));
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(9000),
            sync_workers: Some(2),
            sync_once: true,
            ..Default::default()
        };
        let (cfg, mode) = load(args, &[("PORT", "8000"), ("SYNC_WORKERS", "5")]).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.sync_workers, 2);
        assert_eq!(mode, RunMode::SyncOnce);
    }

    #[test]
    fn reads_sync_policy_from_environment() {
        let (cfg, _) = load(
            Args::default(),
            &[
                ("DELETE_LOCAL_AFTER_SYNC", "true"),
                ("SYNC_MAX_ATTEMPTS", "5"),
                ("SYNC_LEASE_SECS", "60"),
            ],
        )
        .unwrap();
        assert!(cfg.delete_local_after_sync);
        assert_eq!(cfg.sync_max_attempts, Some(5));
        assert_eq!(cfg.sync_lease, Duration::from_secs(60));
    }

    #[test]
    fn s3_backend_requires_bucket() {
        assert!(load(Args::default(), &[("DURABLE_BACKEND", "s3")]).is_err());

        let (cfg, _) = load(
            Args::default(),
            &[
                ("DURABLE_BACKEND", "s3"),
                ("S3_BUCKET", "archive"),
                ("S3_ENDPOINT", "http://minio:9000"),
                ("S3_PRESIGN_TTL_SECS", "3600"),
            ],
        )
        .unwrap();
        match cfg.durable {
            DurableBackend::S3(s3) => {
                assert_eq!(s3.bucket, "archive");
                assert_eq!(s3.region, "us-east-1");
                assert_eq!(s3.endpoint.as_deref(), Some("http://minio:9000"));
                assert_eq!(s3.presign_ttl, Some(Duration::from_secs(3600)));
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(load(Args::default(), &[("PORT", "not-a-port")]).is_err());
        assert!(load(Args::default(), &[("SYNC_CHUNK_SIZE", "0")]).is_err());
        assert!(load(Args::default(), &[("DELETE_LOCAL_AFTER_SYNC", "maybe")]).is_err());
        assert!(load(Args::default(), &[("DURABLE_BACKEND", "tape")]).is_err());
    }
}
