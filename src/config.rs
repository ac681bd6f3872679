use std::path::{Path, PathBuf};
use std::time::Duration;
use colored::Colorize;
use json_comments::StripComments;
use serde::{Serialize, Deserialize};
use crate::client::{ClientConfig, PollPolicy};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub api_addr: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub assistant_id: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32, // 0 = unbounded
    pub poll_timeout_secs: u64, // 0 = no deadline
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: false,
            api_addr: "http://localhost:2024".to_string(),
            api_key: "".to_string(),
            assistant_id: "".to_string(),
            poll_interval_ms: 1000,
            max_poll_attempts: 300,
            poll_timeout_secs: 0,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: (self.max_poll_attempts > 0).then_some(self.max_poll_attempts),
            deadline: (self.poll_timeout_secs > 0).then(|| Duration::from_secs(self.poll_timeout_secs)),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_addr.clone(),
            token: self.api_key.clone(),
            assistant_id: self.assistant_id.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            poll: self.poll_policy(),
        }
    }

    /// Token with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.is_empty() {
            return "(not set)".to_string();
        }
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), tail)
    }
}

pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("RUNCHAT_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let mut config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config_dir.push("runchat");
    config_dir.push("runchat.config.json");
    config_dir
}

pub fn load_config() -> Config {
    load_config_from(&get_config_path(), |key| std::env::var(key).ok())
}

/// Reads `path` (creating it with defaults if missing), then applies
/// overrides from `env`.
pub fn load_config_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Config {
    let mut config = Config::default();

    if !path.exists() {
        write_default_config(path, &config);
    }

    if let Ok(json) = std::fs::read_to_string(path) {
        let stripped = StripComments::new(json.as_bytes());
        match serde_json::from_reader(stripped) {
            Ok(file_config) => config = file_config,
            Err(e) => println!(
                "{} {} {}\n{}",
                "Failed to parse".red(),
                path.display().to_string().red(),
                format!(": {}", e).red(),
                "Using default config"
            ),
        }
    }

    apply_env(&mut config, env);
    config
}

fn write_default_config(path: &Path, config: &Config) {
    let Some(parent) = path.parent() else { return };
    if let Err(e) = std::fs::create_dir_all(parent) {
        println!(
            "{}",
            format!("Failed to create config directory '{}': {}", parent.display(), e).red()
        );
        return;
    }
    let default_json = serde_json::to_string_pretty(config).unwrap_or_else(|_| "{}".to_string());
    match std::fs::write(path, default_json) {
        Ok(()) => println!(
            "{}",
            format!("Created default config at '{}'", path.display()).green()
        ),
        Err(e) => println!(
            "{}",
            format!("Failed to write default config to '{}': {}", path.display(), e).red()
        ),
    }
}

fn apply_env(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(debug) = env("RUNCHAT_DEBUG") { config.debug = debug.to_lowercase() == "true"; }
    if let Some(api_addr) = env("RUNCHAT_API_ADDR") { config.api_addr = api_addr; }
    if let Some(token) = env("USER_JWT_ACCESS_TOKEN") { config.api_key = token; }
    if let Some(api_key) = env("RUNCHAT_API_KEY") { config.api_key = api_key; }
    if let Some(id) = env("RUNCHAT_ASSISTANT_ID") { config.assistant_id = id; }
    if let Some(ms) = env("RUNCHAT_POLL_INTERVAL_MS") { if let Ok(n) = ms.parse() { config.poll_interval_ms = n; } }
    if let Some(max) = env("RUNCHAT_MAX_POLL_ATTEMPTS") { if let Ok(n) = max.parse() { config.max_poll_attempts = n; } }
    if let Some(secs) = env("RUNCHAT_POLL_TIMEOUT_SECS") { if let Ok(n) = secs.parse() { config.poll_timeout_secs = n; } }
    if let Some(secs) = env("RUNCHAT_REQUEST_TIMEOUT_SECS") { if let Ok(n) = secs.parse() { config.request_timeout_secs = n; } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_is_created_with_defaults_and_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runchat.config.json");

        let config = load_config_from(&path, env_of(&[("RUNCHAT_API_KEY", "secret-token")]));

        assert_eq!(config.api_addr, "http://localhost:2024");
        assert_eq!(config.api_key, "secret-token");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"poll_interval_ms\": 1000"));
        assert!(!written.contains("secret-token"));
        assert!(!written.contains("api_key"));
    }

    #[test]
    fn file_with_comments_then_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runchat.config.json");
        std::fs::write(
            &path,
            r#"{
                // local dev server
                "api_addr": "http://127.0.0.1:9000",
                "assistant_id": "from-file",
                "max_poll_attempts": 5 /* short */
            }"#,
        )
        .unwrap();

        let config = load_config_from(
            &path,
            env_of(&[
                ("RUNCHAT_ASSISTANT_ID", "from-env"),
                ("USER_JWT_ACCESS_TOKEN", "jwt"),
                ("RUNCHAT_POLL_INTERVAL_MS", "not-a-number"),
                ("RUNCHAT_POLL_TIMEOUT_SECS", "12"),
            ]),
        );

        assert_eq!(config.api_addr, "http://127.0.0.1:9000");
        assert_eq!(config.assistant_id, "from-env");
        assert_eq!(config.api_key, "jwt");
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_poll_attempts, 5);

        let policy = config.poll_policy();
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.deadline, Some(Duration::from_secs(12)));
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runchat.config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = load_config_from(&path, env_of(&[]));
        assert_eq!(config.max_poll_attempts, 300);
        assert!(!config.debug);
    }

    #[test]
    fn zero_limits_mean_unbounded() {
        let config = Config {
            max_poll_attempts: 0,
            poll_timeout_secs: 0,
            ..Config::default()
        };
        let policy = config.poll_policy();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.deadline, None);
    }

    #[test]
    fn masks_all_but_last_four() {
        let mut config = Config::default();
        assert_eq!(config.masked_api_key(), "(not set)");
        config.api_key = "abcdefgh".to_string();
        assert_eq!(config.masked_api_key(), "****efgh");
        config.api_key = "abc".to_string();
        assert_eq!(config.masked_api_key(), "***");
    }
}
