//! Clish console session
//!
//! Every resource command goes through `clish`, the appliance console, run
//! from a bash login over SSH. The console prints errors on stdout and rarely
//! sets an exit status, so success is decided from markers in the text.

use super::Flavor;
use crate::config::NasConfig;
use crate::domain::ports::{CommandOutput, CommandRunnerRef};
use crate::error::{Error, Result};
use crate::parsers::{non_blank_lines, parse_key_values};
use crate::retry::{ordinal, FixedRetries};
use parking_lot::Mutex;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

const IS_BASH_TEST: &str = "is_bash_test";
const MASTER_USER: &str = "master";
const MASTER_PRIVILEGES: &str = "Master";

/// Stderr noise printed while the console waits on a lock
const BENIGN_STDERR: &[&str] = &[
    r".*Waiting\s+for\s+other\s+command\s+\(.*\)\s+to\s+complete.*",
    r"^\.+$",
    r".*lock\.lock: No such file or directory.*",
];

const SESSION_DISCONNECT: &str = r"Found\s+CVM\s+master\s+not\s+in\s+current\s+node,\s+switching\s+the\s+console,\s+current\s+session\s+will\s+get\s+disconnected";

struct SessionPatterns {
    benign_stderr: Vec<Regex>,
    error: Regex,
    info: Regex,
    disconnect: Regex,
}

impl SessionPatterns {
    fn new(flavor: Flavor) -> Result<Self> {
        let benign_stderr = BENIGN_STDERR
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            benign_stderr,
            error: Regex::new(&format!(r"{}\s\w+\sERROR", flavor.marker()))?,
            info: Regex::new(&format!(r"{}\s\w+\sINFO", flavor.marker()))?,
            disconnect: Regex::new(SESSION_DISCONNECT)?,
        })
    }
}

/// Console session bound to one SSH runner
///
/// The login shell and privilege checks are cached until the runner reports
/// a lost connection.
pub struct ClishSession {
    runner: CommandRunnerRef,
    flavor: Flavor,
    login_user: String,
    clish_user: String,
    retries: u32,
    retry_delay: Duration,
    patterns: SessionPatterns,
    is_bash: Mutex<Option<bool>>,
    is_master: Mutex<Option<bool>>,
}

impl ClishSession {
    pub fn new(flavor: Flavor, runner: CommandRunnerRef, config: &NasConfig) -> Result<Self> {
        Ok(Self {
            runner,
            flavor,
            login_user: config.connection.user.clone(),
            clish_user: config.clish.user.clone(),
            retries: config.clish.retries,
            retry_delay: config.clish.retry_delay(),
            patterns: SessionPatterns::new(flavor)?,
            is_bash: Mutex::new(None),
            is_master: Mutex::new(None),
        })
    }

    pub fn runner(&self) -> &CommandRunnerRef {
        &self.runner
    }

    /// Whether this appliance has the flavour's console installed
    pub async fn verify_discovery(&self) -> Result<bool> {
        let command = format!("/usr/bin/test -f {}", self.flavor.clish_path());
        let output = self.runner.run(&command, None).await?;
        Ok(output.success())
    }

    /// Run a console command and return its non-blank output lines
    pub async fn execute(&self, command: &str, timeout: Option<Duration>) -> Result<Vec<String>> {
        self.execute_with_env(command, timeout, &[]).await
    }

    /// Run a console command with environment variables set
    ///
    /// A session failover notice from the cluster is retried at a fixed
    /// interval; every other failure is returned on the first attempt.
    pub async fn execute_with_env(
        &self,
        command: &str,
        timeout: Option<Duration>,
        env: &[(&str, &str)],
    ) -> Result<Vec<String>> {
        let mut retry = 0u32;
        let stdout = backoff::future::retry_notify(
            FixedRetries::new(self.retries, self.retry_delay),
            || async {
                debug!("Running command: \"{}\"", command);
                let output = self
                    .run_clish(command, timeout, env)
                    .await
                    .map_err(backoff::Error::permanent)?;
                self.classify(command, output)
            },
            |_: Error, _: Duration| {
                retry += 1;
                debug!(
                    "Retrying for the {} time to run the following command: {}",
                    ordinal(retry),
                    command
                );
            },
        )
        .await?;

        Ok(non_blank_lines(&stdout).map(str::to_string).collect())
    }

    fn classify(
        &self,
        command: &str,
        output: CommandOutput,
    ) -> std::result::Result<String, backoff::Error<Error>> {
        debug!(
            "Ran command: \"{}\", out: \"{}\", err: \"{}\"",
            command, output.stdout, output.stderr
        );
        let p = &self.patterns;

        let stderr = output.stderr.trim_end();
        let bad_stderr =
            !stderr.is_empty() && !p.benign_stderr.iter().any(|r| r.is_match(stderr));
        if bad_stderr || p.error.is_match(&output.stdout) {
            let lines: Vec<&str> = non_blank_lines(&output.stdout)
                .chain(non_blank_lines(&output.stderr))
                .collect();
            return Err(backoff::Error::permanent(Error::ExecCommand(lines.join("\n"))));
        }

        if p.info.is_match(&output.stdout) {
            warn!("Info message got from {}: {}", self.flavor.name(), output.stdout);
            if p.disconnect.is_match(&output.stdout) {
                return Err(backoff::Error::transient(Error::ExecCommand(format!(
                    "Failed after {} retries. {} output: {}",
                    self.retries + 1,
                    self.flavor.name(),
                    output.stdout
                ))));
            }
        }
        Ok(output.stdout)
    }

    async fn run_clish(
        &self,
        command: &str,
        timeout: Option<Duration>,
        env: &[(&str, &str)],
    ) -> Result<CommandOutput> {
        if !self.is_bash().await? {
            return Err(Error::BadUser(format!(
                "The user \"{}\" should have their default login shell set to /bin/bash.",
                self.login_user
            )));
        }
        if !self.is_master().await? {
            return Err(Error::BadPrivileges(format!(
                "The \"{}\" user should have \"Master\" privileges.",
                self.clish_user
            )));
        }
        self.runner.run(&self.clish_command(command, env), timeout).await
    }

    fn clish_command(&self, command: &str, env: &[(&str, &str)]) -> String {
        let clish = format!(
            "LANG=C {} -u {} -c '{}'",
            self.flavor.clish_path(),
            self.clish_user,
            command
        );
        if env.is_empty() {
            return clish;
        }
        let vars: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{} {}", vars.join(" "), clish)
    }

    fn reset_if_disconnected(&self) {
        if !self.runner.is_connected() {
            *self.is_bash.lock() = None;
            *self.is_master.lock() = None;
        }
    }

    async fn is_bash(&self) -> Result<bool> {
        self.reset_if_disconnected();
        let cached = *self.is_bash.lock();
        if let Some(is_bash) = cached {
            return Ok(is_bash);
        }

        let output = self.runner.run(&format!("echo {}", IS_BASH_TEST), None).await?;
        let is_bash = output.stdout.trim() == IS_BASH_TEST;
        *self.is_bash.lock() = Some(is_bash);
        Ok(is_bash)
    }

    async fn is_master(&self) -> Result<bool> {
        if self.clish_user == MASTER_USER {
            return Ok(true);
        }
        self.reset_if_disconnected();
        let cached = *self.is_master.lock();
        if let Some(is_master) = cached {
            return Ok(is_master);
        }

        let command = format!("admin show {}", self.clish_user);
        let output = self.runner.run(&command, None).await?;
        let is_master = match parse_key_values(&output.stdout).get("Privileges") {
            Some(privileges) => privileges == MASTER_PRIVILEGES,
            None => {
                warn!(
                    "Cannot parse the privileges information related to the \"{}\" user. The output of the command \"{}\" is:\n{}",
                    self.clish_user, command, output.stdout
                );
                false
            }
        };
        *self.is_master.lock() = Some(is_master);
        Ok(is_master)
    }
}
