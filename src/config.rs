use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub session_ttl: Duration,
    pub worker: WorkerConfig,
}

/// Settings for the thumbnail worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of jobs processed at the same time.
    pub concurrency: usize,
    /// Delay between two polls of an empty queue.
    pub poll_interval: Duration,
    /// Attempts before a job is dead-lettered.
    pub max_attempts: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
            max_attempts: 3,
        }
    }
}

/// What the binary should do once configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Serve,
    Migrate,
    IssueToken(String),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Personal file storage API with thumbnail worker")]
pub struct Args {
    /// Host to bind to (overrides FILES_MANAGER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where file contents are stored (overrides FOLDER_PATH)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILES_MANAGER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Lifetime of issued session tokens (overrides FILES_MANAGER_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// Parallel thumbnail jobs (overrides FILES_MANAGER_WORKER_CONCURRENCY)
    #[arg(long)]
    pub worker_concurrency: Option<usize>,

    /// Queue poll interval in milliseconds (overrides FILES_MANAGER_WORKER_POLL_MS)
    #[arg(long)]
    pub worker_poll_ms: Option<u64>,

    /// Attempts per thumbnail job (overrides FILES_MANAGER_JOB_MAX_ATTEMPTS)
    #[arg(long)]
    pub job_max_attempts: Option<i64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Store a session for USER_ID, print its token and exit
    #[arg(long, value_name = "USER_ID", conflicts_with = "migrate")]
    pub issue_token: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the requested action.
    pub fn from_env_and_args() -> Result<(Self, Action)> {
        Self::resolve(Args::parse())
    }

    /// Merge parsed CLI args over environment values. Args win.
    fn resolve(args: Args) -> Result<(Self, Action)> {
        // --- Environment fallback ---
        let env_host = env::var("FILES_MANAGER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("PORT", 5000u16)?;
        let env_storage = env::var("FOLDER_PATH").unwrap_or_else(|_| "/tmp/files_manager".into());
        let env_db = env::var("FILES_MANAGER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:///tmp/files_manager/meta/files_manager.db".into());
        let env_ttl = env_or("FILES_MANAGER_SESSION_TTL_SECS", 86_400u64)?;

        let defaults = WorkerConfig::default();
        let env_concurrency = env_or("FILES_MANAGER_WORKER_CONCURRENCY", defaults.concurrency)?;
        let env_poll = env_or(
            "FILES_MANAGER_WORKER_POLL_MS",
            defaults.poll_interval.as_millis() as u64,
        )?;
        let env_attempts = env_or("FILES_MANAGER_JOB_MAX_ATTEMPTS", defaults.max_attempts)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            session_ttl: Duration::from_secs(args.session_ttl_secs.unwrap_or(env_ttl)),
            worker: WorkerConfig {
                concurrency: args.worker_concurrency.unwrap_or(env_concurrency).max(1),
                poll_interval: Duration::from_millis(args.worker_poll_ms.unwrap_or(env_poll)),
                max_attempts: args.job_max_attempts.unwrap_or(env_attempts).max(1),
            },
        };

        let action = match (args.migrate, args.issue_token) {
            (true, _) => Action::Migrate,
            (false, Some(user_id)) => Action::IssueToken(user_id),
            (false, None) => Action::Serve,
        };

        Ok((cfg, action))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
