use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration, loaded once at process start.
#[derive(Clone, Debug)]
pub struct Config {
    // Platform credentials
    pub api_id: i32,
    pub api_hash: String,
    pub bot_token: String,
    /// Durable user credential from a previous `/login`. Private sources need it.
    pub session_string: Option<String>,

    // Access
    pub allowed_users: Vec<i64>,

    // Wizard
    pub max_batch_size: u32,

    // Progress reporting
    pub progress_bucket_width: u32,

    // Login
    pub login_code_timeout: Duration,

    // Transient payloads
    pub temp_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let api_id = env_str("API_ID")
            .and_then(|s| s.trim().parse::<i32>().ok())
            .ok_or_else(|| Error::Config("API_ID environment variable is required".to_string()))?;

        let api_hash = env_str("API_HASH").and_then(non_empty).ok_or_else(|| {
            Error::Config("API_HASH environment variable is required".to_string())
        })?;

        let bot_token = env_str("BOT_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;

        let session_string = env_str("SESSION_STRING")
            .and_then(non_empty)
            .map(|s| s.trim().to_string());

        let allowed_users = parse_csv_i64(env_str("ALLOWED_USERS"));

        let max_batch_size = clamp_batch_size(env_u32("MAX_BATCH_SIZE").unwrap_or(100));
        let progress_bucket_width = env_u32("PROGRESS_BUCKET_WIDTH").unwrap_or(10).clamp(1, 100);
        let login_code_timeout =
            Duration::from_secs(env_u64("LOGIN_CODE_TIMEOUT_SECS").unwrap_or(300));

        let temp_dir = PathBuf::from(env_str("TEMP_DIR").unwrap_or("/tmp/relay-bot".to_string()));
        fs::create_dir_all(&temp_dir)?;

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            session_string,
            allowed_users,
            max_batch_size,
            progress_bucket_width,
            login_code_timeout,
            temp_dir,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

/// Message ids are `i32`; a batch can never span more than that.
fn clamp_batch_size(n: u32) -> u32 {
    n.clamp(1, i32::MAX as u32)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
