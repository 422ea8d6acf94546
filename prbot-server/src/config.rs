use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use prbot_core::checks::DEFAULT_RETEST_SKIP_PATTERNS;
use prbot_core::{MergePolicy, PermissionSet};
use thiserror::Error;

use crate::platform::Platform;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0}")]
    Inconsistent(&'static str),
}

/// A PR the CLI operates on, when given through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub pr_number: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub platform: Platform,
    pub token: String,
    /// Token used only for posting comments, so they show up under a
    /// different account than approvals and merges.
    pub comment_token: Option<String>,
    pub base_url: Option<String>,
    pub target: TargetConfig,
    pub comment_sender: Option<String>,
    pub pr_sender: Option<String>,
    pub self_check_name: Option<String>,
    pub robot_accounts: Vec<String>,
    pub lgtm_threshold: usize,
    pub lgtm_permissions: PermissionSet,
    pub merge_policy: MergePolicy,
    pub debug: bool,
    pub use_git_cli_for_cherry_pick: bool,
    pub git_workdir: PathBuf,
    pub results_dir: Option<PathBuf>,
    pub retest_skip_patterns: Vec<String>,
    pub dashboard_issue_title: String,
    pub dashboard_issue_author: String,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Workflow dispatch on pull request events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrEventConfig {
    pub actions: Vec<String>,
    pub workflow_file: String,
    pub workflow_ref: String,
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub listen_addr: SocketAddr,
    pub webhook_path: String,
    pub health_path: String,
    pub metrics_path: String,
    pub secret: String,
    pub require_signature: bool,
    /// `owner/name`, `owner/*` or `*`. Empty allows every repository.
    pub allowed_repos: Vec<String>,
    pub async_processing: bool,
    pub queue_size: usize,
    pub workers: usize,
    pub rate_limit_enabled: bool,
    /// Requests per minute per client IP.
    pub rate_limit_requests: u32,
    pub tls: Option<TlsConfig>,
    pub pr_events: Option<PrEventConfig>,
    pub shutdown_grace: Duration,
}

impl WebhookConfig {
    /// Checks that only matter when serving webhooks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.require_signature && self.secret.is_empty() {
            return Err(ConfigError::Inconsistent(
                "WEBHOOK_REQUIRE_SIGNATURE is set but WEBHOOK_SECRET is empty",
            ));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::Inconsistent("WEBHOOK_QUEUE_SIZE must be at least 1"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Inconsistent("WEBHOOK_WORKERS must be at least 1"));
        }
        if self.rate_limit_enabled && self.rate_limit_requests == 0 {
            return Err(ConfigError::Inconsistent(
                "WEBHOOK_RATE_LIMIT_REQUESTS must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values behave like unset ones.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let platform = match get("PRBOT_PLATFORM") {
            Some(value) => value.parse::<Platform>().map_err(|e| ConfigError::Invalid {
                key: "PRBOT_PLATFORM",
                value,
                reason: e.to_string(),
            })?,
            None => Platform::GitHub,
        };

        let token = get("PRBOT_TOKEN")
            .or_else(|| match platform {
                Platform::GitHub => get("GITHUB_TOKEN"),
                Platform::GitLab => get("GITLAB_TOKEN"),
            })
            .ok_or(ConfigError::Missing("PRBOT_TOKEN"))?;

        let lgtm_threshold: usize = parse_or(&get, "PRBOT_LGTM_THRESHOLD", 1)?;
        if lgtm_threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "PRBOT_LGTM_THRESHOLD",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let lgtm_permissions = match get("PRBOT_LGTM_PERMISSIONS") {
            Some(value) => {
                let set = value
                    .parse::<PermissionSet>()
                    .map_err(|e| ConfigError::Invalid {
                        key: "PRBOT_LGTM_PERMISSIONS",
                        value: value.clone(),
                        reason: e.to_string(),
                    })?;
                if set.is_empty() {
                    return Err(ConfigError::Invalid {
                        key: "PRBOT_LGTM_PERMISSIONS",
                        value,
                        reason: "no permissions listed".to_string(),
                    });
                }
                set
            }
            None => PermissionSet::default(),
        };

        let merge_policy = match get("PRBOT_MERGE_METHOD") {
            Some(value) => value
                .parse::<MergePolicy>()
                .map_err(|e| ConfigError::Invalid {
                    key: "PRBOT_MERGE_METHOD",
                    value,
                    reason: e.to_string(),
                })?,
            None => MergePolicy::default(),
        };

        let pr_number = match get("PRBOT_PR_NUMBER") {
            Some(value) => Some(value.trim().parse::<u64>().map_err(|e| {
                ConfigError::Invalid {
                    key: "PRBOT_PR_NUMBER",
                    value,
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        let retest_skip_patterns = match lookup("PRBOT_RETEST_SKIP_PATTERNS") {
            // An explicitly empty value turns the exclusion list off.
            Some(value) => split_list(&value),
            None => DEFAULT_RETEST_SKIP_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Ok(Config {
            platform,
            token,
            comment_token: get("PRBOT_COMMENT_TOKEN"),
            base_url: get("PRBOT_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            target: TargetConfig {
                owner: get("PRBOT_OWNER"),
                repo: get("PRBOT_REPO"),
                pr_number,
            },
            comment_sender: get("PRBOT_COMMENT_SENDER"),
            pr_sender: get("PRBOT_PR_SENDER"),
            self_check_name: get("PRBOT_SELF_CHECK_NAME"),
            robot_accounts: get("PRBOT_ROBOT_ACCOUNTS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            lgtm_threshold,
            lgtm_permissions,
            merge_policy,
            debug: parse_bool(&get, "PRBOT_DEBUG", false)?,
            use_git_cli_for_cherry_pick: parse_bool(
                &get,
                "PRBOT_USE_GIT_CLI_FOR_CHERRY_PICK",
                false,
            )?,
            git_workdir: get("PRBOT_GIT_WORKDIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            results_dir: get("PRBOT_RESULTS_DIR").map(PathBuf::from),
            retest_skip_patterns,
            dashboard_issue_title: get("PRBOT_DASHBOARD_ISSUE_TITLE")
                .unwrap_or_else(|| "Dependency Dashboard".to_string()),
            dashboard_issue_author: get("PRBOT_DASHBOARD_ISSUE_AUTHOR")
                .unwrap_or_else(|| "renovate".to_string()),
            webhook: WebhookConfig::from_lookup(&get)?,
        })
    }
}

impl WebhookConfig {
    fn from_lookup<F>(get: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = match get("WEBHOOK_LISTEN_ADDR") {
            Some(value) => value
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::Invalid {
                    key: "WEBHOOK_LISTEN_ADDR",
                    value,
                    reason: e.to_string(),
                })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let tls = if parse_bool(get, "WEBHOOK_TLS_ENABLED", false)? {
            match (get("WEBHOOK_TLS_CERT_FILE"), get("WEBHOOK_TLS_KEY_FILE")) {
                (Some(cert), Some(key)) => Some(TlsConfig {
                    cert_file: PathBuf::from(cert),
                    key_file: PathBuf::from(key),
                }),
                _ => {
                    return Err(ConfigError::Inconsistent(
                        "WEBHOOK_TLS_ENABLED requires WEBHOOK_TLS_CERT_FILE and WEBHOOK_TLS_KEY_FILE",
                    ))
                }
            }
        } else {
            None
        };

        let pr_events = if parse_bool(get, "WEBHOOK_PR_EVENT_ENABLED", false)? {
            let workflow_file = get("WEBHOOK_WORKFLOW_FILE").ok_or(ConfigError::Inconsistent(
                "WEBHOOK_PR_EVENT_ENABLED requires WEBHOOK_WORKFLOW_FILE",
            ))?;
            let actions = get("WEBHOOK_PR_EVENT_ACTIONS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|| {
                    ["opened", "synchronize", "reopened", "ready_for_review"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                });
            Some(PrEventConfig {
                actions,
                workflow_file,
                workflow_ref: get("WEBHOOK_WORKFLOW_REF").unwrap_or_else(|| "main".to_string()),
                inputs: match get("WEBHOOK_WORKFLOW_INPUTS") {
                    Some(value) => parse_inputs(&value)?,
                    None => BTreeMap::new(),
                },
            })
        } else {
            None
        };

        Ok(WebhookConfig {
            listen_addr,
            webhook_path: get("WEBHOOK_PATH").unwrap_or_else(|| "/webhook".to_string()),
            health_path: get("WEBHOOK_HEALTH_PATH").unwrap_or_else(|| "/healthz".to_string()),
            metrics_path: get("WEBHOOK_METRICS_PATH").unwrap_or_else(|| "/metrics".to_string()),
            secret: get("WEBHOOK_SECRET").unwrap_or_default(),
            require_signature: parse_bool(get, "WEBHOOK_REQUIRE_SIGNATURE", true)?,
            allowed_repos: get("WEBHOOK_ALLOWED_REPOS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            async_processing: parse_bool(get, "WEBHOOK_ASYNC", true)?,
            queue_size: parse_or(get, "WEBHOOK_QUEUE_SIZE", 100)?,
            workers: parse_or(get, "WEBHOOK_WORKERS", 4)?,
            rate_limit_enabled: parse_bool(get, "WEBHOOK_RATE_LIMIT_ENABLED", true)?,
            rate_limit_requests: parse_or(get, "WEBHOOK_RATE_LIMIT_REQUESTS", 60)?,
            tls,
            pr_events,
            shutdown_grace: Duration::from_secs(parse_or(get, "WEBHOOK_SHUTDOWN_GRACE_SECS", 30)?),
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool<F>(get: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

fn parse_or<F, T>(get: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

/// Parse `k=v,k2=v2` into a map.
fn parse_inputs(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    split_list(value)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                Ok((k.trim().to_string(), v.trim().to_string()))
            }
            _ => Err(ConfigError::Invalid {
                key: "WEBHOOK_WORKFLOW_INPUTS",
                value: pair,
                reason: "expected key=value".to_string(),
            }),
        })
        .collect()
}
