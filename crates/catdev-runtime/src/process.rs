//! Server process lifecycle: run, start, stop
//!
//! All three entry points go through the distribution's launch script rather
//! than assembling a JVM command line by hand, so instance layout quirks stay
//! the script's problem. `run` keeps the server in the foreground and owns
//! the child; `start` delegates to the forking helper and polls the listener
//! for readiness; `stop` is graceful first, forceful after the shutdown
//! timeout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use catdev_core::prelude::*;
use catdev_core::ServerConfig;

/// Name of the PID file the launch script maintains inside the instance
const PID_FILE_NAME: &str = "catalina.pid";

/// How often `start()` re-polls the listener
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on the graceful stop request itself, separate from the wait for
/// the server to exit
const STOP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle phase of the managed server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Stopped,
    StartFailed,
    StopFailed,
}

/// Spawns and supervises the server through its launch script.
pub struct ProcessController {
    config: ServerConfig,
    state: ProcessState,
    child: Option<Child>,
}

impl ProcessController {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: ProcessState::NotStarted,
            child: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// PID file the launch script writes via `CATALINA_PID`
    pub fn pid_file(&self) -> PathBuf {
        self.config.catalina_base.join(PID_FILE_NAME)
    }

    fn script(&self) -> Result<PathBuf> {
        let script = self.config.launch_script();
        if !script.is_file() {
            return Err(Error::missing_script(script));
        }
        Ok(script)
    }

    fn command(&self, action: &str) -> Result<Command> {
        let script = self.script()?;
        let mut cmd = Command::new(&script);
        cmd.arg(action)
            .current_dir(&self.config.catalina_base)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let inherited: HashMap<String, String> = std::env::vars().collect();
        for (key, value) in build_environment(&self.config, &inherited) {
            cmd.env(key, value);
        }
        Ok(cmd)
    }

    fn spawn(&self, action: &str) -> Result<Child> {
        let mut child = self
            .command(action)?
            .spawn()
            .map_err(|e| Error::process_spawn(e.to_string()))?;
        forward_output(&mut child);
        Ok(child)
    }

    /// Run the server in the foreground until it exits or the process is
    /// interrupted. Returns the exit code, or `None` for a signal exit or
    /// an interrupt-triggered stop.
    pub async fn run(&mut self) -> Result<Option<i32>> {
        let mut child = self.spawn("run")?;
        self.state = ProcessState::Running;
        info!("Server running in foreground (pid {:?})", child.id());

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                self.state = ProcessState::Stopped;
                info!("Server exited with {status}");
                Ok(status.code())
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping server");
                self.child = Some(child);
                self.stop().await?;
                Ok(None)
            }
        }
    }

    /// Start the server in the background and wait until it accepts
    /// connections on the configured listener.
    pub async fn start(&mut self) -> Result<()> {
        let mut child = self.spawn("start")?;

        // The helper script forks the JVM and exits almost immediately; a
        // failure here is a launch failure, not a startup timeout.
        let status = child.wait().await?;
        if !status.success() {
            self.state = ProcessState::StartFailed;
            return Err(Error::process_spawn(format!(
                "launch script exited with {status}"
            )));
        }

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if self.is_listening().await {
                self.state = ProcessState::Running;
                info!(
                    "Server ready on {}:{}",
                    self.config.host, self.config.port
                );
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.state = ProcessState::StartFailed;
                return Err(Error::StartupTimeout {
                    host: self.config.host.clone(),
                    port: self.config.port,
                    timeout_secs: self.config.startup_timeout.as_secs(),
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Stop the server, gracefully first, forcefully after the shutdown
    /// timeout.
    ///
    /// With a foreground child from [`run`], force means killing our own
    /// child. Without one, the launch script's stop action does the work
    /// against the PID file; if it cannot finish in time there is no handle
    /// left to escalate on, so that is a hard failure.
    pub async fn stop(&mut self) -> Result<()> {
        let timeout = self.config.shutdown_timeout;

        if let Some(mut child) = self.child.take() {
            self.request_stop().await;
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("Server stopped ({status})");
                    self.state = ProcessState::Stopped;
                    self.clear_pid_file();
                    Ok(())
                }
                Ok(Err(e)) => {
                    self.state = ProcessState::StopFailed;
                    Err(e.into())
                }
                Err(_) => {
                    warn!(
                        "Server did not stop within {}s, killing process",
                        timeout.as_secs()
                    );
                    child.kill().await?;
                    self.state = ProcessState::Stopped;
                    self.clear_pid_file();
                    Ok(())
                }
            }
        } else {
            let mut child = self.spawn("stop")?;
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) if status.success() => {
                    info!("Server stopped");
                    self.state = ProcessState::Stopped;
                    self.clear_pid_file();
                    Ok(())
                }
                Ok(Ok(status)) => {
                    self.state = ProcessState::StopFailed;
                    Err(Error::process_spawn(format!(
                        "stop script exited with {status}"
                    )))
                }
                Ok(Err(e)) => {
                    self.state = ProcessState::StopFailed;
                    Err(e.into())
                }
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill stop script: {e}");
                    }
                    self.state = ProcessState::StopFailed;
                    Err(Error::ShutdownTimeout {
                        timeout_secs: timeout.as_secs(),
                    })
                }
            }
        }
    }

    /// True if something is accepting connections on the configured listener
    pub async fn is_listening(&self) -> bool {
        tokio::net::TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .is_ok()
    }

    /// Remove a stale PID file after a confirmed stop. The launch script
    /// usually does this itself; a force-kill leaves it behind.
    fn clear_pid_file(&self) {
        let pid = self.pid_file();
        if pid.exists() {
            if let Err(e) = std::fs::remove_file(&pid) {
                warn!("Failed to remove PID file {}: {e}", pid.display());
            }
        }
    }

    /// Best-effort graceful stop request against the foreground child; the
    /// script signals the process recorded in the PID file.
    async fn request_stop(&self) {
        match self.command("stop") {
            Ok(mut cmd) => match cmd.spawn() {
                Ok(mut child) => {
                    if tokio::time::timeout(STOP_REQUEST_TIMEOUT, child.wait())
                        .await
                        .is_err()
                    {
                        warn!("Stop request did not complete, escalating");
                    }
                }
                Err(e) => warn!("Failed to spawn stop request: {e}"),
            },
            Err(e) => warn!("Cannot issue stop request: {e}"),
        }
    }

    #[cfg(test)]
    fn attach_child(&mut self, child: Child) {
        self.child = Some(child);
        self.state = ProcessState::Running;
    }
}

/// Compute the environment for a spawned launch script.
///
/// Pure function of the config and the inherited environment: `JAVA_OPTS`
/// and `CLASSPATH` append to inherited values, explicit `env` overrides win
/// over everything.
pub fn build_environment(
    config: &ServerConfig,
    inherited: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert(
        "CATALINA_HOME".to_string(),
        config.catalina_home.to_string_lossy().into_owned(),
    );
    env.insert(
        "CATALINA_BASE".to_string(),
        config.catalina_base.to_string_lossy().into_owned(),
    );
    env.insert(
        "CATALINA_PID".to_string(),
        config
            .catalina_base
            .join(PID_FILE_NAME)
            .to_string_lossy()
            .into_owned(),
    );
    if let Some(java_home) = &config.java_home {
        env.insert(
            "JAVA_HOME".to_string(),
            java_home.to_string_lossy().into_owned(),
        );
    }
    if !config.java_opts.is_empty() {
        let mut opts = inherited.get("JAVA_OPTS").cloned().unwrap_or_default();
        if !opts.is_empty() {
            opts.push(' ');
        }
        opts.push_str(&config.java_opts.join(" "));
        env.insert("JAVA_OPTS".to_string(), opts);
    }
    if !config.extra_classpath.is_empty() {
        let separator = if cfg!(windows) { ';' } else { ':' };
        let mut classpath = inherited.get("CLASSPATH").cloned().unwrap_or_default();
        for entry in &config.extra_classpath {
            if !classpath.is_empty() {
                classpath.push(separator);
            }
            classpath.push_str(&entry.to_string_lossy());
        }
        env.insert("CLASSPATH".to_string(), classpath);
    }
    for (key, value) in &config.env {
        env.insert(key.clone(), value.clone());
    }
    env
}

fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "server", "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "server", "{line}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DISPATCH_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  run) exit 0 ;;
  start) exit 0 ;;
  stop) exit 0 ;;
  *) exit 2 ;;
esac
"#;

    fn fake_distribution(script_body: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        let script = dir
            .path()
            .join("bin")
            .join(catdev_core::config::launch_script_name());
        std::fs::write(&script, script_body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        std::fs::write(dir.path().join("lib/catalina.jar"), b"PK").unwrap();
        dir
    }

    fn config_for(home: &TempDir) -> ServerConfig {
        ServerConfig::new(home.path()).with_host("127.0.0.1")
    }

    #[test]
    fn test_missing_script_detected() {
        let home = TempDir::new().unwrap();
        let controller = ProcessController::new(ServerConfig::new(home.path()));
        assert!(matches!(
            controller.script(),
            Err(Error::MissingScript { .. })
        ));
    }

    #[test]
    fn test_build_environment_core_variables() {
        let config = ServerConfig::new("/opt/tomcat")
            .with_catalina_base("/tmp/base-9.0.85-9090")
            .with_java_home("/usr/lib/jvm/java-17");
        let env = build_environment(&config, &HashMap::new());

        assert_eq!(env["CATALINA_HOME"], "/opt/tomcat");
        assert_eq!(env["CATALINA_BASE"], "/tmp/base-9.0.85-9090");
        assert_eq!(env["CATALINA_PID"], "/tmp/base-9.0.85-9090/catalina.pid");
        assert_eq!(env["JAVA_HOME"], "/usr/lib/jvm/java-17");
        assert!(!env.contains_key("JAVA_OPTS"));
    }

    #[test]
    fn test_build_environment_appends_java_opts() {
        let config =
            ServerConfig::new("/opt/tomcat").with_java_opts(vec!["-Xmx512m".to_string()]);
        let mut inherited = HashMap::new();
        inherited.insert("JAVA_OPTS".to_string(), "-Dfoo=bar".to_string());

        let env = build_environment(&config, &inherited);
        assert_eq!(env["JAVA_OPTS"], "-Dfoo=bar -Xmx512m");
    }

    #[test]
    fn test_build_environment_appends_classpath() {
        let config = ServerConfig::new("/opt/tomcat")
            .with_extra_classpath(vec!["/work/extra.jar".into(), "/work/conf".into()]);
        let mut inherited = HashMap::new();
        inherited.insert("CLASSPATH".to_string(), "/base.jar".to_string());

        let env = build_environment(&config, &inherited);
        #[cfg(unix)]
        assert_eq!(env["CLASSPATH"], "/base.jar:/work/extra.jar:/work/conf");
    }

    #[test]
    fn test_build_environment_overrides_win() {
        let config = ServerConfig::new("/opt/tomcat")
            .with_env(vec![("CATALINA_BASE".to_string(), "/elsewhere".to_string())]);
        let env = build_environment(&config, &HashMap::new());
        assert_eq!(env["CATALINA_BASE"], "/elsewhere");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_returns_exit_code() {
        let home = fake_distribution("#!/bin/sh\nexit 3\n");
        let mut controller = ProcessController::new(config_for(&home));
        let code = controller.run().await.unwrap();
        assert_eq!(code, Some(3));
        assert_eq!(controller.state(), ProcessState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_succeeds_when_listener_ready() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let home = fake_distribution(DISPATCH_SCRIPT);
        let mut controller = ProcessController::new(config_for(&home).with_port(port));
        controller.start().await.unwrap();
        assert_eq!(controller.state(), ProcessState::Running);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_times_out_without_listener() {
        // Bind and drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let home = fake_distribution(DISPATCH_SCRIPT);
        let config = config_for(&home)
            .with_port(port)
            .with_startup_timeout(Duration::from_secs(2));
        let mut controller = ProcessController::new(config);

        let result = controller.start().await;
        assert!(matches!(result, Err(Error::StartupTimeout { .. })));
        assert_eq!(controller.state(), ProcessState::StartFailed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_fails_when_script_fails() {
        let home = fake_distribution("#!/bin/sh\nexit 1\n");
        let mut controller = ProcessController::new(config_for(&home));
        let result = controller.start().await;
        assert!(matches!(result, Err(Error::ProcessSpawn { .. })));
        assert_eq!(controller.state(), ProcessState::StartFailed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_external_via_script() {
        let home = fake_distribution(DISPATCH_SCRIPT);
        let mut controller = ProcessController::new(config_for(&home));
        controller.stop().await.unwrap();
        assert_eq!(controller.state(), ProcessState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_stubborn_foreground_child() {
        let home = fake_distribution(DISPATCH_SCRIPT);
        let config = config_for(&home).with_shutdown_timeout(Duration::from_secs(1));
        let mut controller = ProcessController::new(config);

        let child = Command::new("sh")
            .arg("-c")
            .arg("sleep 60")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        controller.attach_child(child);

        let started = std::time::Instant::now();
        controller.stop().await.unwrap();
        assert_eq!(controller.state(), ProcessState::Stopped);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_reports_failing_stop_script() {
        let home = fake_distribution("#!/bin/sh\nexit 1\n");
        let mut controller = ProcessController::new(config_for(&home));
        let result = controller.stop().await;
        assert!(matches!(result, Err(Error::ProcessSpawn { .. })));
        assert_eq!(controller.state(), ProcessState::StopFailed);
    }
}
