//! Immutable configuration records for the runtime manager
//!
//! Defines:
//! - `ServerConfig` - where the Tomcat runtime lives and how to reach it
//! - `DeploymentConfig` - what to deploy, under which context, and watch policy
//!
//! Both records are built with chained `with_*` setters and frozen by a
//! validating factory; downstream components never mutate them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default HTTP listener port for generated instances
pub const DEFAULT_PORT: u16 = 8080;

/// Default listener host
pub const DEFAULT_HOST: &str = "localhost";

/// Default time allowed for the server to accept connections after `start`
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time allowed for a graceful stop before force-kill
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default quiet period after the last change before an automatic redeploy
pub const DEFAULT_INACTIVITY_SECS: u64 = 30;

/// Separator substituted for `/` in nested context paths so they map to
/// flat directory names (`/api/v1` -> `api#v1`)
pub const CONTEXT_SEPARATOR: char = '#';

/// Platform launch script name under `bin/`
pub fn launch_script_name() -> &'static str {
    if cfg!(windows) {
        "catalina.bat"
    } else {
        "catalina.sh"
    }
}

/// Runtime location, listener settings, environment, and timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Shared distribution directory (`CATALINA_HOME`)
    pub catalina_home: PathBuf,

    /// Writable instance directory (`CATALINA_BASE`); defaults to `catalina_home`
    pub catalina_base: PathBuf,

    /// HTTP listener host
    pub host: String,

    /// HTTP listener port
    pub port: u16,

    /// JDK/JRE to launch with (`JAVA_HOME`); inherited from the environment if unset
    #[serde(default)]
    pub java_home: Option<PathBuf>,

    /// Extra JVM options, appended to any inherited `JAVA_OPTS`
    #[serde(default)]
    pub java_opts: Vec<String>,

    /// Environment overrides, applied after everything else
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// How long `start()` polls for readiness before failing
    pub startup_timeout: Duration,

    /// How long `stop()` waits for graceful exit before force-kill
    pub shutdown_timeout: Duration,

    /// Entries appended to any inherited `CLASSPATH`
    #[serde(default)]
    pub extra_classpath: Vec<PathBuf>,
}

impl ServerConfig {
    /// Create a config for the given distribution directory with defaults
    /// for everything else
    pub fn new(catalina_home: impl Into<PathBuf>) -> Self {
        let catalina_home = catalina_home.into();
        Self {
            catalina_base: catalina_home.clone(),
            catalina_home,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            java_home: None,
            java_opts: Vec::new(),
            env: Vec::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            extra_classpath: Vec::new(),
        }
    }

    /// Set the instance directory (`CATALINA_BASE`)
    pub fn with_catalina_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.catalina_base = base.into();
        self
    }

    /// Set the listener host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listener port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set `JAVA_HOME` for spawned processes
    pub fn with_java_home(mut self, java_home: impl Into<PathBuf>) -> Self {
        self.java_home = Some(java_home.into());
        self
    }

    /// Append extra JVM options
    pub fn with_java_opts(mut self, opts: Vec<String>) -> Self {
        self.java_opts = opts;
        self
    }

    /// Set environment overrides (highest precedence)
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Set the startup readiness timeout
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the graceful-shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Append extra classpath entries
    pub fn with_extra_classpath(mut self, entries: Vec<PathBuf>) -> Self {
        self.extra_classpath = entries;
        self
    }

    /// Path to the platform launch script under the distribution
    pub fn launch_script(&self) -> PathBuf {
        self.catalina_home.join("bin").join(launch_script_name())
    }

    /// Freeze the record, enforcing the distribution-layout invariant.
    ///
    /// `catalina_home` must exist and contain `bin/catalina.sh|bat` and
    /// `lib/catalina.jar` before any downstream component uses it.
    pub fn validated(self) -> Result<Self> {
        if !self.catalina_home.is_dir() {
            return Err(Error::config(format!(
                "catalina home does not exist: {}",
                self.catalina_home.display()
            )));
        }
        if !self.launch_script().is_file()
            || !self.catalina_home.join("lib").join("catalina.jar").is_file()
        {
            return Err(Error::distribution_invalid(self.catalina_home));
        }
        Ok(self)
    }
}

/// What to deploy, where, and whether to keep it in sync.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DeploymentConfig {
    /// Module identifier, used only for log lines
    pub module: String,

    /// Exploded application source tree
    pub source_dir: PathBuf,

    /// Public path prefix, normalized (leading `/`, no trailing `/` except root)
    #[serde(deserialize_with = "deserialize_context")]
    pub context_path: String,

    /// Deployable root inside the instance (`webapps/`)
    pub webapps_dir: PathBuf,

    /// Explicit target directory name; overrides the context mapping
    #[serde(default)]
    pub target_dir_name: Option<String>,

    /// Whether the change watcher should run
    #[serde(default)]
    pub watch: bool,

    /// Quiet period (seconds) before an automatic redeploy; coerced to >= 1
    pub inactivity_secs: u64,
}

impl DeploymentConfig {
    pub fn new(
        module: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        context_path: &str,
        webapps_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            module: module.into(),
            source_dir: source_dir.into(),
            context_path: normalize_context(context_path),
            webapps_dir: webapps_dir.into(),
            target_dir_name: None,
            watch: false,
            inactivity_secs: DEFAULT_INACTIVITY_SECS,
        }
    }

    /// Force a specific target directory name regardless of context
    pub fn with_target_dir_name(mut self, name: impl Into<String>) -> Self {
        self.target_dir_name = Some(name.into());
        self
    }

    /// Enable or disable change watching
    pub fn with_watch(mut self, enabled: bool) -> Self {
        self.watch = enabled;
        self
    }

    /// Set the inactivity threshold in seconds (minimum 1)
    pub fn with_inactivity_secs(mut self, secs: u64) -> Self {
        self.inactivity_secs = secs.max(1);
        self
    }

    /// Directory name under `webapps/` this module deploys to.
    ///
    /// Pure function of the record: explicit override wins, the root context
    /// maps to `ROOT`, nested contexts flatten `/` to [`CONTEXT_SEPARATOR`].
    pub fn target_dir_name(&self) -> String {
        if let Some(name) = &self.target_dir_name {
            return name.clone();
        }
        if self.context_path == "/" {
            return "ROOT".to_string();
        }
        self.context_path
            .trim_start_matches('/')
            .replace('/', &CONTEXT_SEPARATOR.to_string())
    }

    /// Full target path for this deployment
    pub fn target_dir(&self) -> PathBuf {
        self.webapps_dir.join(self.target_dir_name())
    }

    /// The watch interval as a `Duration`
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs.max(1))
    }
}

/// Keep deserialized records inside the normalization invariant too.
fn deserialize_context<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_context(&raw))
}

/// Normalize a context identifier: always begins with `/`, trailing slash
/// stripped except for the root context. Idempotent.
pub fn normalize_context(context: &str) -> String {
    let trimmed = context.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Conventional instance directory name for a version/port pair
/// (`base-<version>-<port>`)
pub fn instance_dir_name(version: &str, port: u16) -> String {
    format!("base-{version}-{port}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_distribution() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::create_dir_all(dir.path().join("conf")).unwrap();
        std::fs::write(dir.path().join("bin").join(launch_script_name()), "#!/bin/sh\n").unwrap();
        std::fs::write(dir.path().join("lib/catalina.jar"), b"PK").unwrap();
        dir
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::new("/opt/tomcat");
        assert_eq!(config.catalina_base, PathBuf::from("/opt/tomcat"));
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8080);
        assert!(config.java_home.is_none());
        assert_eq!(config.startup_timeout, Duration::from_secs(120));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_server_config_builder_chaining() {
        let config = ServerConfig::new("/opt/tomcat")
            .with_catalina_base("/tmp/base-9.0.85-9090")
            .with_host("127.0.0.1")
            .with_port(9090)
            .with_java_home("/usr/lib/jvm/java-17")
            .with_java_opts(vec!["-Xmx512m".to_string()])
            .with_startup_timeout(Duration::from_secs(60))
            .with_shutdown_timeout(Duration::from_secs(10));

        assert_eq!(config.catalina_base, PathBuf::from("/tmp/base-9.0.85-9090"));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.java_opts, vec!["-Xmx512m".to_string()]);
        assert_eq!(config.startup_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validated_rejects_missing_home() {
        let result = ServerConfig::new("/nonexistent/tomcat").validated();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_validated_rejects_incomplete_layout() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        let result = ServerConfig::new(dir.path()).validated();
        assert!(matches!(result, Err(Error::DistributionInvalid { .. })));
    }

    #[test]
    fn test_validated_accepts_distribution_layout() {
        let dir = fake_distribution();
        let config = ServerConfig::new(dir.path()).validated().unwrap();
        assert!(config.launch_script().is_file());
    }

    #[test]
    fn test_normalize_context() {
        assert_eq!(normalize_context("myapp"), "/myapp");
        assert_eq!(normalize_context("/myapp"), "/myapp");
        assert_eq!(normalize_context("/myapp/"), "/myapp");
        assert_eq!(normalize_context("/api/v1/"), "/api/v1");
        assert_eq!(normalize_context("/"), "/");
        assert_eq!(normalize_context(""), "/");
    }

    #[test]
    fn test_normalize_context_idempotent() {
        for raw in ["myapp", "/myapp/", "/api/v1", "/", "", "a/b/c/"] {
            let once = normalize_context(raw);
            assert_eq!(normalize_context(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_target_dir_name_mapping() {
        let base = |ctx: &str| DeploymentConfig::new("app", "/src", ctx, "/webapps");

        assert_eq!(base("/").target_dir_name(), "ROOT");
        assert_eq!(base("/myapp").target_dir_name(), "myapp");
        assert_eq!(base("/api/v1").target_dir_name(), "api#v1");
        // nested context cannot collide with a single-segment context
        assert_ne!(base("/api/v1").target_dir_name(), base("/api").target_dir_name());
    }

    #[test]
    fn test_target_dir_name_override_wins() {
        let config = DeploymentConfig::new("app", "/src", "/api/v1", "/webapps")
            .with_target_dir_name("custom");
        assert_eq!(config.target_dir_name(), "custom");
        assert_eq!(config.target_dir(), PathBuf::from("/webapps/custom"));
    }

    #[test]
    fn test_inactivity_coerced_to_minimum() {
        let config = DeploymentConfig::new("app", "/src", "/", "/webapps").with_inactivity_secs(0);
        assert_eq!(config.inactivity_secs, 1);
        assert_eq!(config.inactivity_threshold(), Duration::from_secs(1));
    }

    #[test]
    fn test_deployment_config_defaults() {
        let config = DeploymentConfig::new("app", "/src", "app", "/webapps");
        assert_eq!(config.context_path, "/app");
        assert!(!config.watch);
        assert_eq!(config.inactivity_secs, 30);
        assert!(config.target_dir_name.is_none());
    }

    #[test]
    fn test_instance_dir_name() {
        assert_eq!(instance_dir_name("9.0.85", 9090), "base-9.0.85-9090");
    }

    #[test]
    fn test_server_config_toml_round_trip() {
        let config = ServerConfig::new("/opt/tomcat")
            .with_port(9090)
            .with_java_opts(vec!["-Xmx1g".to_string()]);

        let serialized = toml::to_string(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.port, 9090);
        assert_eq!(parsed.java_opts, vec!["-Xmx1g".to_string()]);
        assert_eq!(parsed.catalina_home, PathBuf::from("/opt/tomcat"));
    }

    #[test]
    fn test_deployment_config_toml_defaults() {
        let toml_content = r#"
module = "webapp"
source_dir = "/work/webapp/target/webapp"
context_path = "/webapp"
webapps_dir = "/tmp/base/webapps"
inactivity_secs = 5
"#;
        let config: DeploymentConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.module, "webapp");
        assert!(!config.watch);
        assert!(config.target_dir_name.is_none());
        assert_eq!(config.inactivity_secs, 5);
    }

    #[test]
    fn test_deployment_config_toml_normalizes_context() {
        // A hand-edited config file may carry any spelling of the context;
        // the record must come out normalized like constructed ones do.
        let toml_content = r#"
module = "webapp"
source_dir = "/work/webapp/target/webapp"
context_path = "/app/"
webapps_dir = "/tmp/base/webapps"
inactivity_secs = 5
"#;
        let config: DeploymentConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.context_path, "/app");
        assert_eq!(config.target_dir_name(), "app");

        let bare: DeploymentConfig = toml::from_str(&toml_content.replace("\"/app/\"", "\"app\""))
            .unwrap();
        assert_eq!(bare.context_path, "/app");

        let root: DeploymentConfig =
            toml::from_str(&toml_content.replace("\"/app/\"", "\"\"")).unwrap();
        assert_eq!(root.context_path, "/");
        assert_eq!(root.target_dir_name(), "ROOT");
    }
}
