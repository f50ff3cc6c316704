//! Configuration
//!
//! The sentry configuration is a single YAML document. Environment
//! variables (`${NAME}` or `$NAME`) are expanded in the raw text before
//! parsing, so tokens can live outside the file. After parsing the
//! document is validated as a whole; any violation is fatal at startup.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default HTTP timeout for hosting API requests, in seconds
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Minimum accepted polling interval, in seconds
const MIN_POLLING_INTERVAL_SECS: u64 = 60;

/// Maximum length of a DNS-1123 name
const MAX_PROJECT_NAME_LEN: usize = 253;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Supported hosting platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
    Gitea,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Github => write!(f, "github"),
            Self::Gitlab => write!(f, "gitlab"),
            Self::Gitea => write!(f, "gitea"),
        }
    }
}

/// Group execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    Parallel,
    Sequential,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel => write!(f, "parallel"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

/// Access credentials for a hosting platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub token: String,
}

/// Borrowed view of a repository identity, shared by the monitor and
/// deploy sides of a configuration entry
#[derive(Debug, Clone, Copy)]
pub struct RepoRef<'a> {
    pub platform: Platform,
    pub url: &'a str,
    pub auth: &'a AuthConfig,
}

/// Which repository and branches to watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub platform: Platform,
    pub url: String,
    pub auth: AuthConfig,
    /// Branch names, matched exactly
    pub branches: Vec<String>,
}

impl MonitorConfig {
    pub fn repo_ref(&self) -> RepoRef<'_> {
        RepoRef {
            platform: self.platform,
            url: &self.url,
            auth: &self.auth,
        }
    }
}

/// The QA repository and recipe to run on change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub platform: Platform,
    pub url: String,
    pub auth: AuthConfig,
    /// Branch of the QA repository to clone
    pub branch: String,
    /// DNS-1123 label, exported to recipe commands as SENTRY_PROJECT
    pub project_name: String,
    /// Shell command strings, executed in order
    pub commands: Vec<String>,
}

impl DeployConfig {
    pub fn repo_ref(&self) -> RepoRef<'_> {
        RepoRef {
            platform: self.platform,
            url: &self.url,
            auth: &self.auth,
        }
    }
}

/// One monitored repository entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    /// Optional group membership; must name a configured group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub monitor: MonitorConfig,
    pub deploy: DeployConfig,
}

/// Execution policy for a repository group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub execution_strategy: ExecutionStrategy,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub continue_on_error: bool,
    /// Overall deadline for the whole group, in seconds
    #[serde(default = "default_global_timeout")]
    pub global_timeout: u64,
}

fn default_max_parallel() -> usize {
    1
}

fn default_global_timeout() -> u64 {
    600
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Root directory for deployment workspaces
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    /// Remove workspaces after each deployment
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// HTTP timeout and individual-deployment deadline, in seconds.
    /// Unset means 30 s for HTTP and no deadline for individual deploys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("/tmp/sentry")
}

fn default_cleanup() -> bool {
    true
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            tmp_dir: default_tmp_dir(),
            cleanup: default_cleanup(),
            log_level: None,
            timeout: None,
        }
    }
}

/// Complete sentry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between polling ticks (minimum 60)
    pub polling_interval: u64,
    #[serde(default)]
    pub groups: HashMap<String, GroupConfig>,
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
}

impl Config {
    /// Load a configuration file: read, expand environment variables,
    /// parse and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse a configuration from raw YAML text (after env expansion).
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(raw);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the whole document. Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_interval < MIN_POLLING_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "polling_interval must be at least {MIN_POLLING_INTERVAL_SECS} seconds, got {}",
                self.polling_interval
            )));
        }

        if self.repositories.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one repository must be configured".to_string(),
            ));
        }

        for (name, group) in &self.groups {
            if group.max_parallel < 1 {
                return Err(ConfigError::Invalid(format!(
                    "group {name}: max_parallel must be at least 1"
                )));
            }
            if group.global_timeout < 1 {
                return Err(ConfigError::Invalid(format!(
                    "group {name}: global_timeout must be at least 1 second"
                )));
            }
        }

        let mut seen_names = HashSet::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "repository name cannot be empty".to_string(),
                ));
            }
            if !seen_names.insert(repo.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate repository name: {}",
                    repo.name
                )));
            }
            if let Some(group) = &repo.group {
                if !self.groups.contains_key(group) {
                    return Err(ConfigError::Invalid(format!(
                        "repository {}: group {group} is not defined",
                        repo.name
                    )));
                }
            }
            validate_monitor(&repo.name, &repo.monitor)?;
            validate_deploy(&repo.name, &repo.deploy)?;
        }

        Ok(())
    }

    /// Look up a repository entry by name.
    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|repo| repo.name == name)
    }

    /// HTTP timeout for hosting API requests.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.global.timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS))
    }

    /// An example configuration document, shown in the CLI help text.
    pub fn example() -> &'static str {
        EXAMPLE_CONFIG
    }
}

fn validate_monitor(repo: &str, monitor: &MonitorConfig) -> Result<(), ConfigError> {
    if monitor.url.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: monitor.url cannot be empty"
        )));
    }
    if monitor.auth.token.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: monitor.auth.token cannot be empty"
        )));
    }
    if monitor.branches.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: monitor.branches cannot be empty"
        )));
    }
    if monitor.branches.iter().any(|branch| branch.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: monitor.branches contains an empty branch name"
        )));
    }
    Ok(())
}

fn validate_deploy(repo: &str, deploy: &DeployConfig) -> Result<(), ConfigError> {
    if deploy.url.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: deploy.url cannot be empty"
        )));
    }
    if deploy.auth.token.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: deploy.auth.token cannot be empty"
        )));
    }
    if deploy.branch.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: deploy.branch cannot be empty"
        )));
    }
    if !is_dns1123_label(&deploy.project_name) {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: deploy.project_name {:?} is not a valid DNS-1123 label",
            deploy.project_name
        )));
    }
    if deploy.commands.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repository {repo}: deploy.commands cannot be empty"
        )));
    }
    Ok(())
}

/// DNS-1123 label check used for project names (lowercase alphanumeric
/// and `-`, alphanumeric at both ends, at most 253 characters).
pub fn is_dns1123_label(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("valid literal regex"));
    name.len() <= MAX_PROJECT_NAME_LEN && pattern.is_match(name)
}

/// Expand `${NAME}` and `$NAME` references in raw configuration text.
/// Unset variables expand to the empty string.
pub fn expand_env_vars(content: &str) -> String {
    static BRACED: OnceLock<Regex> = OnceLock::new();
    static BARE: OnceLock<Regex> = OnceLock::new();
    let braced = BRACED
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid literal regex"));
    let bare =
        BARE.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid literal regex"));

    let content = braced.replace_all(content, |caps: &regex::Captures<'_>| {
        env::var(&caps[1]).unwrap_or_default()
    });
    bare.replace_all(&content, |caps: &regex::Captures<'_>| {
        env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

const EXAMPLE_CONFIG: &str = r#"# Sentry configuration
polling_interval: 300

groups:
  qa-cluster:
    execution_strategy: parallel
    max_parallel: 2
    continue_on_error: true
    global_timeout: 900

repositories:
  - name: api-server
    group: qa-cluster
    monitor:
      platform: github
      url: https://github.com/example/api-server
      auth:
        username: sentry-bot
        token: ${GITHUB_TOKEN}
      branches:
        - main
    deploy:
      platform: github
      url: https://github.com/example/qa-recipes
      auth:
        username: sentry-bot
        token: ${GITHUB_TOKEN}
      branch: main
      project_name: api-server
      commands:
        - ./deploy.sh "$SENTRY_PROJECT"

  - name: billing
    monitor:
      platform: gitlab
      url: https://gitlab.com/example/billing
      auth:
        username: sentry-bot
        token: ${GITLAB_TOKEN}
      branches:
        - main
        - release
    deploy:
      platform: gitlab
      url: https://gitlab.com/example/qa-recipes
      auth:
        username: sentry-bot
        token: ${GITLAB_TOKEN}
      branch: main
      project_name: billing
      commands:
        - make deploy

global:
  tmp_dir: /tmp/sentry
  cleanup: true
  timeout: 30
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let yaml = r#"
polling_interval: 120
groups:
  g1:
    execution_strategy: sequential
    max_parallel: 1
    continue_on_error: false
    global_timeout: 600
repositories:
  - name: r1
    group: g1
    monitor:
      platform: github
      url: https://github.com/example/r1
      auth:
        username: bot
        token: tok
      branches: [main]
    deploy:
      platform: github
      url: https://github.com/example/qa
      auth:
        username: bot
        token: tok
      branch: main
      project_name: r1
      commands: ["echo hi"]
"#;
        serde_yaml::from_str(yaml).expect("base config parses")
    }

    #[test]
    fn base_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn polling_interval_below_minimum_is_rejected() {
        let mut config = base_config();
        config.polling_interval = 30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("polling_interval"));
    }

    #[test]
    fn duplicate_repository_names_are_rejected() {
        let mut config = base_config();
        let mut dup = config.repositories[0].clone();
        dup.group = None;
        config.repositories.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate repository name"));
    }

    #[test]
    fn unresolved_group_reference_is_rejected() {
        let mut config = base_config();
        config.repositories[0].group = Some("missing".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn empty_branches_are_rejected() {
        let mut config = base_config();
        config.repositories[0].monitor.branches.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_commands_are_rejected() {
        let mut config = base_config();
        config.repositories[0].deploy.commands.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_token_is_rejected() {
        let mut config = base_config();
        config.repositories[0].monitor.auth.token = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_parallel_is_rejected() {
        let mut config = base_config();
        if let Some(group) = config.groups.get_mut("g1") {
            group.max_parallel = 0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn project_name_must_be_dns1123() {
        let mut config = base_config();
        config.repositories[0].deploy.project_name = "Bad_Name".to_string();
        assert!(config.validate().is_err());

        config.repositories[0].deploy.project_name = "rag-v2".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn dns1123_label_edges() {
        assert!(is_dns1123_label("a"));
        assert!(is_dns1123_label("a-b-1"));
        assert!(!is_dns1123_label(""));
        assert!(!is_dns1123_label("-a"));
        assert!(!is_dns1123_label("a-"));
        assert!(!is_dns1123_label("UPPER"));
        assert!(!is_dns1123_label(&"a".repeat(254)));
        assert!(is_dns1123_label(&"a".repeat(253)));
    }

    #[test]
    fn expands_braced_and_bare_variables() {
        env::set_var("SENTRY_TEST_TOKEN", "s3cret");
        let expanded = expand_env_vars("token: ${SENTRY_TEST_TOKEN} / $SENTRY_TEST_TOKEN");
        assert_eq!(expanded, "token: s3cret / s3cret");
    }

    #[test]
    fn unset_variables_expand_to_empty() {
        env::remove_var("SENTRY_TEST_UNSET");
        assert_eq!(expand_env_vars("x${SENTRY_TEST_UNSET}y"), "xy");
    }

    #[test]
    fn malformed_references_are_left_alone() {
        assert_eq!(expand_env_vars("cost: $5"), "cost: $5");
        assert_eq!(expand_env_vars("${1BAD}"), "${1BAD}");
    }

    #[test]
    fn example_config_parses_and_validates() {
        env::set_var("GITHUB_TOKEN", "gh-token");
        env::set_var("GITLAB_TOKEN", "gl-token");
        let config = Config::from_yaml(Config::example()).expect("example config is valid");
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[0].monitor.auth.token, "gh-token");
    }

    #[test]
    fn round_trips_with_defaults_filled_in() {
        env::set_var("GITHUB_TOKEN", "gh-token");
        env::set_var("GITLAB_TOKEN", "gl-token");
        let config = Config::from_yaml(Config::example()).expect("example config is valid");
        let serialized = serde_yaml::to_string(&config).expect("serializes");
        let reparsed: Config = serde_yaml::from_str(&serialized).expect("reparses");
        assert_eq!(config, reparsed);
    }

    #[test]
    fn http_timeout_defaults_to_thirty_seconds() {
        let mut config = base_config();
        config.global.timeout = None;
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        config.global.timeout = Some(5);
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(50))]

            #[test]
            fn generated_labels_are_accepted(name in "[a-z0-9]([a-z0-9-]{0,30}[a-z0-9])?") {
                prop_assert!(is_dns1123_label(&name));
            }

            #[test]
            fn uppercase_and_underscores_are_rejected(name in "[A-Z_]{1,10}") {
                prop_assert!(!is_dns1123_label(&name));
            }

            #[test]
            fn expansion_never_leaves_known_variables(value in "[a-zA-Z0-9]{0,16}") {
                env::set_var("SENTRY_PROP_VAR", &value);
                let expanded = expand_env_vars("v=${SENTRY_PROP_VAR}");
                prop_assert_eq!(expanded, format!("v={}", value));
            }
        }
    }
}
