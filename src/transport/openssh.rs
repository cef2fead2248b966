//! SSH command runner over the system OpenSSH client
//!
//! Commands share one multiplexed connection (`ControlMaster`), opened by
//! [`CommandRunner::connect`] and torn down by [`CommandRunner::close`].
//! Authentication is non-interactive: keys from the agent or the configured
//! identity file.

use crate::config::ConnectionConfig;
use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit status of the ssh client itself failing
const SSH_FAILURE: i32 = 255;

pub struct OpenSshRunner {
    program: String,
    host: String,
    port: Option<u16>,
    user: String,
    identity_file: Option<String>,
    connect_timeout: Duration,
    control_path: PathBuf,
    connected: AtomicBool,
}

impl OpenSshRunner {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            program: "ssh".to_string(),
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            identity_file: config.identity_file.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            control_path: std::env::temp_dir().join("nasctl-%C"),
            connected: AtomicBool::new(false),
        }
    }

    /// Use another ssh-compatible client binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn options(&self) -> Vec<String> {
        let mut args = vec![
            "-T".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn command(&self, extra: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.options())
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Run a remote command; `None` waits forever
    async fn execute(&self, remote: &str, timeout: Option<Duration>) -> Result<CommandOutput> {
        let destination = self.destination();
        let child = self
            .command(&[destination.as_str(), remote])
            .spawn()
            .map_err(|e| Error::Connection(format!("Unable to start {}: {}", self.program, e)))?;

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    let msg = format!(
                        "A timeout of {} seconds occurred after trying to execute the following command remotely through SSH: \"{}\"",
                        limit.as_secs_f64(),
                        remote
                    );
                    warn!("{}", msg);
                    return Err(Error::ExecutionTimeout(msg));
                }
            },
            None => child.wait_with_output().await?,
        };

        let status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if status == 0 {
            return Ok(CommandOutput {
                status,
                stdout,
                stderr,
            });
        }
        debug!("ssh status: {} ({})", status, remote);
        Ok(CommandOutput {
            status,
            stdout: String::new(),
            stderr: stdout + &stderr,
        })
    }
}

#[async_trait]
impl CommandRunner for OpenSshRunner {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> Result<CommandOutput> {
        if !self.is_connected() {
            debug!("connection lost to NAS server, will try again now");
            self.connect().await?;
        }
        debug!("running ({})", command);
        let output = self.execute(command, timeout).await?;
        if output.status == SSH_FAILURE {
            self.connected.store(false, Ordering::SeqCst);
            return Err(Error::Connection(format!(
                "SSH session to {} failed: {}",
                self.host,
                output.stderr.trim()
            )));
        }
        debug!("ran ({})", command);
        Ok(output)
    }

    async fn connect(&self) -> Result<()> {
        debug!("connecting to the NAS server {}", self.host);
        let output = self.execute("true", Some(self.connect_timeout)).await.map_err(|e| match e {
            Error::ExecutionTimeout(_) => Error::Connection(format!(
                "Timed out after {:?} connecting to {}",
                self.connect_timeout, self.host
            )),
            e => e,
        })?;
        if !output.success() {
            return Err(Error::Connection(format!(
                "Unable to connect to {}: {}",
                self.host,
                output.stderr.trim()
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!("connection to the NAS server has been established");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("closing connection to the NAS server");
        self.connected.store(false, Ordering::SeqCst);
        let destination = self.destination();
        let output = self
            .command(&["-O", "exit", destination.as_str()])
            .output()
            .await?;
        if !output.status.success() {
            debug!(
                "no control master left for {}: {}",
                self.host,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        debug!("NAS server connection closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// Client stand-in running its last argument with the local shell
    fn fake_ssh(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("fake-ssh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\nfor last; do :; done\nexec /bin/sh -c \"$last\"").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn runner(dir: &tempfile::TempDir) -> OpenSshRunner {
        let config = ConnectionConfig {
            host: "nas.example".into(),
            port: Some(2222),
            identity_file: Some("/keys/id_rsa".into()),
            ..Default::default()
        };
        OpenSshRunner::new(&config).with_program(fake_ssh(dir))
    }

    #[test]
    fn test_options() {
        let runner = OpenSshRunner::new(&ConnectionConfig {
            port: Some(2222),
            identity_file: Some("/keys/id_rsa".into()),
            ..Default::default()
        });
        let options = runner.options();
        assert!(options.contains(&"BatchMode=yes".to_string()));
        assert!(options.contains(&"ConnectTimeout=30".to_string()));
        assert!(options.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(options.windows(2).any(|w| w == ["-i", "/keys/id_rsa"]));
        assert_eq!(runner.destination(), "support@localhost");
    }

    #[tokio::test]
    async fn test_run_connects_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir);
        assert!(!runner.is_connected());

        let output = runner.run("echo hello", None).await.unwrap();
        assert!(runner.is_connected());
        assert_eq!(output.status, 0);
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(runner.host(), "nas.example");
    }

    #[tokio::test]
    async fn test_failure_moves_stdout_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir);

        let output = runner.run("echo out; echo err >&2; exit 3", None).await.unwrap();
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout, "");
        assert_eq!(output.stderr, "out\nerr\n");
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir);

        let err = runner
            .run("sleep 5", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_matches!(err, Error::ExecutionTimeout(msg) if msg.starts_with("A timeout of 0.1 seconds occurred") && msg.ends_with("\"sleep 5\""));
    }

    #[tokio::test]
    async fn test_client_failure_drops_connection() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(&dir);

        assert_matches!(runner.run("exit 255", None).await, Err(Error::Connection(_)));
        assert!(!runner.is_connected());
        runner.close().await.unwrap();
    }
}
