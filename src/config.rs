use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub media_url_prefix: String,
    pub max_body_bytes: usize,
}

/// What the binary should do after configuration is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Migrate,
    CreateUser(String),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-user blog post service")]
pub struct Args {
    /// Host to bind to (overrides BLOG_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOG_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded images are stored (overrides BLOG_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BLOG_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// URL prefix under which stored images are served (overrides BLOG_MEDIA_URL_PREFIX)
    #[arg(long)]
    pub media_url_prefix: Option<String>,

    /// Maximum accepted request body in bytes (overrides BLOG_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "create_user")]
    pub migrate: bool,

    /// Register a user with the given display name, print its id and exit
    #[arg(long, value_name = "NAME")]
    pub create_user: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        let args = Args::parse();

        let env_host = env::var("BLOG_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("BLOG_PORT", 3000u16)?;
        let env_storage = env::var("BLOG_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("BLOG_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/blog.db".into());
        let env_media = env::var("BLOG_MEDIA_URL_PREFIX").unwrap_or_else(|_| "/media".into());
        let env_body = parse_env("BLOG_MAX_BODY_BYTES", 16 * 1024 * 1024usize)?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            media_url_prefix: args.media_url_prefix.unwrap_or(env_media),
            max_body_bytes: args.max_body_bytes.unwrap_or(env_body),
        };

        let mode = match (args.migrate, args.create_user) {
            (true, _) => Mode::Migrate,
            (false, Some(name)) => Mode::CreateUser(name),
            (false, None) => Mode::Serve,
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
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
