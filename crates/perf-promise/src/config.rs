//! Enforcer configuration: defaults, a consuming builder and TOML loading.

use crate::error::{PromiseError, PromiseResult};
use crate::promise::Promise;
use crate::trace::TraceCleaner;
use crate::validate::CheckKind;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables consulted, in order, for the current environment name.
pub const ENVIRONMENT_VARS: [&str; 2] = ["PERF_PROMISE_ENV", "APP_ENV"];

/// Environment assumed when none of [`ENVIRONMENT_VARS`] is set.
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// The name of the environment this process runs in.
pub fn current_environment() -> String {
    ENVIRONMENT_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

/// Configuration for the promise enforcer.
///
/// By default enforcement is disabled and must be explicitly enabled. Even when
/// enabled it only runs in `allowed_environments`.
///
/// Can be loaded from TOML; every key is optional:
///
/// ```toml
/// enabled = true
/// allowed_environments = ["development", "test"]
/// untagged_handlers_are_speedy = true
/// speedy_max_queries = 2
/// validations = ["makes", "takes", "full_table_scans"]
/// raise_on_broken = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromiseConfig {
    /// Whether enforcement is enabled at all.
    pub enabled: bool,
    /// Environments where promises are recorded and budget expressions evaluated.
    pub allowed_environments: BTreeSet<String>,
    /// Current environment name (defaults to [`current_environment`]).
    pub environment: String,
    /// Query budget of the speedy promise.
    pub speedy_max_queries: i64,
    /// Optional time budget of the speedy promise, in milliseconds.
    pub speedy_max_duration_ms: Option<u64>,
    /// Validate handlers without a registered promise against the speedy promise.
    pub untagged_handlers_are_speedy: bool,
    /// Checks to run. They always run in the order makes, takes, full_table_scans.
    pub validations: Vec<CheckKind>,
    /// Turn broken promises into errors instead of only reporting them.
    pub raise_on_broken: bool,
    /// Statement names (driver tags) that are never recorded.
    pub ignored_statement_names: Vec<String>,
    /// Path prefixes identifying application frames in captured backtraces.
    pub app_frame_prefixes: Vec<String>,
    /// Directory that application frame paths are relative to.
    pub source_root: PathBuf,
    /// Capture a backtrace for statements that arrive without one.
    pub capture_backtrace: bool,
}

impl Default for PromiseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_environments: ["development", "test"]
                .into_iter()
                .map(String::from)
                .collect(),
            environment: current_environment(),
            speedy_max_queries: 1,
            speedy_max_duration_ms: None,
            untagged_handlers_are_speedy: false,
            validations: vec![CheckKind::Makes],
            raise_on_broken: false,
            ignored_statement_names: vec!["SCHEMA".to_string(), "PROMISE-EXPLAIN".to_string()],
            app_frame_prefixes: vec!["src/".to_string()],
            source_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            capture_backtrace: true,
        }
    }
}

impl PromiseConfig {
    /// Create a new configuration with defaults (disabled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> PromiseResult<Self> {
        toml::from_str(raw)
            .map_err(|e| PromiseError::config(format!("failed to parse promise config: {e}")))
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> PromiseResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PromiseError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            PromiseError::config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Enable enforcement.
    pub fn enable(mut self) -> Self {
        self.enabled = true;
        self
    }

    /// Disable enforcement.
    pub fn disable(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Replace the set of allowed environments.
    pub fn allowed_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_environments = environments.into_iter().map(Into::into).collect();
        self
    }

    /// Override the current environment name.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Set the query budget of the speedy promise.
    pub fn speedy_max_queries(mut self, max_queries: i64) -> Self {
        self.speedy_max_queries = max_queries;
        self
    }

    /// Set the time budget of the speedy promise.
    pub fn speedy_max_duration(mut self, max_duration: Duration) -> Self {
        self.speedy_max_duration_ms =
            Some(u64::try_from(max_duration.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Validate unregistered handlers against the speedy promise.
    pub fn untagged_handlers_are_speedy(mut self, speedy: bool) -> Self {
        self.untagged_handlers_are_speedy = speedy;
        self
    }

    /// Choose which checks run.
    pub fn validations(mut self, checks: impl IntoIterator<Item = CheckKind>) -> Self {
        self.validations = checks.into_iter().collect();
        self
    }

    /// Run every available check.
    pub fn validate_all(self) -> Self {
        self.validations(CheckKind::ALL)
    }

    /// Raise broken promises as errors.
    pub fn raise_on_broken(mut self, raise: bool) -> Self {
        self.raise_on_broken = raise;
        self
    }

    /// Never record statements whose name contains `name`.
    pub fn ignore_statement_name(mut self, name: impl Into<String>) -> Self {
        self.ignored_statement_names.push(name.into());
        self
    }

    /// Replace the application frame prefixes.
    pub fn app_frame_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.app_frame_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the directory application frames are resolved against.
    pub fn source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = root.into();
        self
    }

    /// Enable or disable backtrace capture.
    pub fn capture_backtrace(mut self, capture: bool) -> Self {
        self.capture_backtrace = capture;
        self
    }

    /// Whether the current environment is one of the allowed ones.
    pub fn in_allowed_environment(&self) -> bool {
        self.allowed_environments.contains(&self.environment)
    }

    /// Whether promises are recorded and validated.
    pub fn is_active(&self) -> bool {
        self.enabled && self.in_allowed_environment()
    }

    /// Whether budget expressions may query the database.
    pub fn evaluation_enabled(&self) -> bool {
        self.in_allowed_environment()
    }

    /// The promise used for handlers that declared none.
    pub fn speedy_promise(&self) -> Promise {
        Promise::speedy(
            self.speedy_max_queries,
            self.speedy_max_duration_ms.map(Duration::from_millis),
        )
    }

    /// The trace cleaner configured by `app_frame_prefixes` and `source_root`.
    pub fn trace_cleaner(&self) -> TraceCleaner {
        TraceCleaner::new(self.source_root.clone(), self.app_frame_prefixes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::LazyExpr;

    #[test]
    fn defaults_are_disabled_and_scoped_to_dev_and_test() {
        let config = PromiseConfig::new().environment("development");
        assert!(!config.enabled);
        assert!(!config.is_active());
        assert!(config.evaluation_enabled());
        assert_eq!(config.validations, vec![CheckKind::Makes]);
        assert!(!config.raise_on_broken);

        let config = config.enable();
        assert!(config.is_active());

        let production = config.environment("production");
        assert!(!production.is_active());
        assert!(!production.evaluation_enabled());
    }

    #[test]
    fn speedy_promise_follows_config() {
        let config = PromiseConfig::new()
            .speedy_max_queries(3)
            .speedy_max_duration(Duration::from_millis(200));
        let promise = config.speedy_promise();
        assert_eq!(promise.makes, Some(LazyExpr::constant(3)));
        assert_eq!(promise.takes, Some(Duration::from_millis(200)));
    }

    #[test]
    fn loads_from_toml() {
        let config = PromiseConfig::from_toml_str(
            r#"
            enabled = true
            environment = "test"
            allowed_environments = ["test"]
            untagged_handlers_are_speedy = true
            speedy_max_queries = 2
            validations = ["full_table_scans", "makes", "takes"]
            raise_on_broken = true
            "#,
        )
        .unwrap();
        assert!(config.is_active());
        assert!(config.untagged_handlers_are_speedy);
        assert_eq!(config.speedy_max_queries, 2);
        assert_eq!(
            config.validations,
            vec![CheckKind::FullTableScans, CheckKind::Makes, CheckKind::Takes]
        );
        assert!(config.raise_on_broken);
        assert!(config.capture_backtrace);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = PromiseConfig::from_toml_str("validations = [\"sometimes\"]").unwrap_err();
        assert!(matches!(err, PromiseError::Config(_)));

        let err = PromiseConfig::from_toml_str("enabeld = true").unwrap_err();
        assert!(matches!(err, PromiseError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promise.toml");
        std::fs::write(&path, "enabled = true\nenvironment = \"development\"\n").unwrap();
        let config = PromiseConfig::from_toml_file(&path).unwrap();
        assert!(config.is_active());

        let err = PromiseConfig::from_toml_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, PromiseError::Config(_)));
    }
}
