//! Connection lifecycle
//!
//! [`NasConnection::run`] opens the session, hands the [`Nas`] to a closure
//! and always closes the session afterwards, whatever the closure returned.

use crate::config::{NasConfig, NasKind};
use crate::domain::ports::CommandRunnerRef;
use crate::drivers::unity::UnityXt;
use crate::drivers::{DriverRegistry, Nas, NasDriver, NasDriverRef};
use crate::error::{Error, Result};
use crate::transport::OpenSshRunner;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct NasConnection {
    config: NasConfig,
    registry: DriverRegistry,
}

impl NasConnection {
    pub fn new(config: NasConfig) -> Self {
        Self {
            config,
            registry: DriverRegistry::with_defaults(),
        }
    }

    pub fn with_registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &NasConfig {
        &self.config
    }

    /// Run `operation` against the configured appliance
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(Nas) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.config.connection.kind {
            NasKind::Veritas => {
                let runner = Arc::new(OpenSshRunner::new(&self.config.connection));
                self.run_over_ssh(runner, operation).await
            }
            NasKind::Unityxt => {
                let driver = UnityXt::connect(&self.config)?;
                self.run_over_rest(&driver, operation).await
            }
        }
    }

    /// Driver named in the configuration, or the discovered one
    async fn driver(&self, runner: CommandRunnerRef) -> Result<NasDriverRef> {
        match &self.config.connection.driver {
            Some(name) => self.registry.get(name, runner, &self.config),
            None => self.registry.discover(runner, &self.config).await,
        }
    }

    pub async fn run_over_ssh<F, Fut, T>(&self, runner: CommandRunnerRef, operation: F) -> Result<T>
    where
        F: FnOnce(Nas) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        runner.connect().await.map_err(|e| match e {
            Error::Connection(_) => e,
            e => Error::Connection(e.to_string()),
        })?;
        info!("Connected to {}", runner.host());

        let result = async {
            let driver = self.driver(runner.clone()).await?;
            debug!("Using the {} driver", driver.name());
            operation(driver.nas()?).await
        }
        .await;
        if let Err(e) = &result {
            debug!("Operation on {} failed: {}", runner.host(), e);
        }

        if let Err(e) = runner.close().await {
            warn!("Failed to close the connection to {}: {}", runner.host(), e);
        }
        result
    }

    pub async fn run_over_rest<F, Fut, T>(&self, driver: &UnityXt, operation: F) -> Result<T>
    where
        F: FnOnce(Nas) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        driver.login().await?;
        info!("Logged in to {}", driver.api().host());

        let result = match driver.nas() {
            Ok(nas) => operation(nas).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            debug!("Operation on {} failed: {}", driver.api().host(), e);
        }

        if let Err(e) = driver.logout().await {
            warn!("Failed to log out of {}: {}", driver.api().host(), e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{CommandOutput, CommandRunner, Method};
    use crate::error::ResourceKind;
    use crate::testing::{FakeRest, FakeRunner, SFS_FS_LIST};
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    fn config(driver: Option<&str>) -> NasConfig {
        let mut config = NasConfig::without_delays();
        config.connection.driver = driver.map(str::to_string);
        config
    }

    #[tokio::test]
    async fn test_ssh_session_closed_after_operation() {
        let runner = FakeRunner::new();
        runner.disconnect();
        runner.on("storage fs list", CommandOutput::ok(SFS_FS_LIST));
        let connection = NasConnection::new(config(Some("sfs")));

        let names = connection
            .run_over_ssh(runner.clone(), |nas| async move {
                let list = nas.filesystem().list().await?;
                Ok(list.into_iter().map(|fs| fs.name).collect::<Vec<_>>())
            })
            .await;
        assert!(!runner.is_connected());
        assert_eq!(tokio_test::assert_ok!(names), vec!["fs1", "fs2"]);
    }

    #[tokio::test]
    async fn test_ssh_session_closed_after_failure() {
        let runner = FakeRunner::new();
        runner.on("/usr/bin/test -f /opt/VRTSnasgw/clish/bin/clish", CommandOutput::ok(""));
        let connection = NasConnection::new(config(None));

        let result: Result<()> = connection
            .run_over_ssh(runner.clone(), |nas| async move {
                assert_eq!(nas.name(), "SFS");
                Err(Error::does_not_exist(ResourceKind::FileSystem, "gone"))
            })
            .await;
        assert_matches!(result, Err(Error::DoesNotExist { .. }));
        assert!(!runner.is_connected());
    }

    #[tokio::test]
    async fn test_ssh_discovery_failure() {
        let runner = FakeRunner::new();
        let connection = NasConnection::new(config(None));
        let result = connection.run_over_ssh(runner.clone(), |_| async { Ok(()) }).await;
        assert_matches!(result, Err(Error::UnableToDiscoverDriver(_)));
        assert!(!runner.is_connected());
    }

    #[tokio::test]
    async fn test_rest_logs_out_after_failure() {
        let rest = FakeRest::new();
        rest.on(Method::Get, "/api/types/loginSessionInfo/instances", 200, json!({}));
        rest.on(Method::Post, "/api/types/loginSessionInfo/action/logout", 200, Value::Null);
        let connection = NasConnection::new(config(None));
        let driver = UnityXt::new(rest.clone(), connection.config());

        let result: Result<()> = connection
            .run_over_rest(&driver, |nas| async move { nas.disk().list().await.map(|_| ()) })
            .await;
        assert_matches!(result, Err(Error::Unsupported { .. }));
        assert_eq!(rest.count(Method::Post, "/api/types/loginSessionInfo/action/logout"), 1);
    }

    #[tokio::test]
    async fn test_rest_login_failure() {
        let rest = FakeRest::new();
        rest.on(Method::Get, "/api/types/loginSessionInfo/instances", 401, Value::Null);
        let connection = NasConnection::new(config(None));
        let driver = UnityXt::new(rest.clone(), connection.config());

        let result: Result<()> = connection
            .run_over_rest(&driver, |_| async { Err(Error::Internal("operation ran".into())) })
            .await;
        assert_matches!(result, Err(Error::Connection(msg)) if msg == "Login failed");
        assert_eq!(rest.count(Method::Post, "/api"), 0);
    }
}
