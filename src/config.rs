use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "libris")]
#[command(about = "Runs the libris circulation service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Load the sample catalog, replacing existing books and loans
    Seed,
    /// Create (or reuse) a user and print a fresh session token for it
    IssueSession {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        /// MEMBER, LIBRARIAN or ADMIN; leaves an existing user's role alone when omitted
        #[arg(long)]
        role: Option<String>,
    },
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".libris")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    database: String,
    port: i32,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

fn default_sync_interval() -> u64 {
    60
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> i32 {
        self.port
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Auth {
    #[serde(default)]
    pub admin_emails: Vec<String>,
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
}

fn default_session_ttl_days() -> i64 {
    30
}

impl Default for Auth {
    fn default() -> Self {
        Auth {
            admin_emails: vec![],
            session_ttl_days: default_session_ttl_days(),
        }
    }
}

impl Auth {
    /// Admin emails, trimmed and lowercased, blanks dropped.
    pub fn normalized_admin_emails(&self) -> Vec<String> {
        self.admin_emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Ai {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_timeout")]
    pub timeout_seconds: u64,
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_timeout() -> u64 {
    30
}

impl Default for Ai {
    fn default() -> Self {
        Ai {
            api_key: None,
            model: default_ai_model(),
            base_url: default_ai_base_url(),
            timeout_seconds: default_ai_timeout(),
        }
    }
}

impl Ai {
    /// The configured key, treating an empty substitution as unset.
    pub fn key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub ai: Ai,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find('}') {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!(var = %var_name, "environment variable not found");
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}
