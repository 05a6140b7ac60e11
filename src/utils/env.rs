//! Environment loading. Configuration is env-only; a local `.env` file is
//! honored when present.

use log::debug;

pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(_) => debug!("No .env file found, using process environment"),
    }
}

/// Read an env var with a default, trimming whitespace.
pub fn var_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|_| default.to_string())
}
