//! nasctl
//!
//! Command line front end of the unified NAS library: one subcommand per
//! resource operation, objects printed as JSON on stdout and logs on stderr.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  nasctl <resource> <operation>                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │  NasConfig  (--config YAML, flags, environment)              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  NasConnection::run ──▶ Nas ──▶ resource operation ──▶ JSON  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use unified_nas::{
    CacheResource, CreateFileSystem, FileSystemResource, Nas, NasConfig, NasConnection, NasKind,
    NasServerResource, Resource, ShareResource, SnapshotResource,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// nasctl - manage Veritas and UnityXT NAS appliances through one interface
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, short, env = "NASCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Appliance host name or address
    #[arg(long, env = "NAS_HOST")]
    host: Option<String>,

    /// SSH or REST port
    #[arg(long, env = "NAS_PORT")]
    port: Option<u16>,

    /// Login user
    #[arg(long, env = "NAS_USER")]
    user: Option<String>,

    /// REST password
    #[arg(long, env = "NAS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// SSH private key
    #[arg(long, env = "NAS_IDENTITY_FILE")]
    identity_file: Option<String>,

    /// Appliance family (veritas, unityxt)
    #[arg(long, env = "NAS_KIND")]
    kind: Option<NasKind>,

    /// Veritas driver (SFS, VA, VA74) instead of discovery
    #[arg(long, env = "NAS_DRIVER")]
    driver: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// File systems
    #[command(subcommand)]
    Fs(FsCommand),
    /// NFS shares
    #[command(subcommand)]
    Share(ShareCommand),
    /// Snapshot caches
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    /// Disks
    #[command(subcommand)]
    Disk(ListCommand),
    /// Storage pools
    #[command(subcommand)]
    Pool(ListCommand),
    /// NAS servers
    #[command(subcommand)]
    Nasserver(NasServerCommand),
    /// Print the JSON schema of the configuration file
    Schema,
}

#[derive(Subcommand, Debug)]
enum FsCommand {
    List,
    /// Capacity usage per file system
    Usage,
    Create {
        name: String,
        /// Size such as 10G or 512M
        size: String,
        pool: String,
        /// Volume layout, or NAS server name on UnityXT
        #[arg(long, default_value = "simple")]
        layout: String,
        /// "true" or "false", UnityXT only
        #[arg(long)]
        data_reduction: Option<String>,
    },
    Delete {
        name: String,
    },
    Resize {
        name: String,
        size: String,
        #[arg(long)]
        pool: Option<String>,
    },
    Online {
        name: String,
    },
    Offline {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum ShareCommand {
    List,
    Create {
        /// Exported path
        name: String,
        client: String,
        /// Comma separated export options
        #[arg(default_value = "rw,no_root_squash")]
        options: String,
    },
    Delete {
        name: String,
        client: String,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    List,
    Create {
        name: String,
        size: String,
        pool: String,
    },
    Delete {
        name: String,
    },
    Resize {
        name: String,
        size: String,
        #[arg(long)]
        pool: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    List,
    Create {
        name: String,
        filesystem: String,
        cache: String,
    },
    Delete {
        name: String,
        filesystem: String,
    },
    /// Roll a file system back to a snapshot
    Restore {
        name: String,
        filesystem: String,
    },
}

#[derive(Subcommand, Debug)]
enum ListCommand {
    List,
}

#[derive(Subcommand, Debug)]
enum NasServerCommand {
    List,
    /// Raw appliance attributes of a NAS server
    Details { name: String },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    if let Command::Schema = args.command {
        let schema = serde_json::to_string_pretty(&NasConfig::schema())?;
        println!("{}", schema);
        return Ok(());
    }

    let config = load_config(&args)?;
    info!(
        "nasctl {} against {} ({})",
        unified_nas::VERSION,
        config.connection.host,
        config.connection.kind
    );

    let connection = NasConnection::new(config);
    let host = connection.config().connection.host.clone();
    let command = args.command;
    debug!("Running {:?}", command);

    let output = connection
        .run(|nas| execute(nas, command))
        .await
        .with_context(|| format!("Operation on {} failed", host))?;

    if !output.is_null() {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

/// File configuration, then flags and environment on top
fn load_config(args: &Args) -> anyhow::Result<NasConfig> {
    let mut config = match &args.config {
        Some(path) => NasConfig::from_yaml_file(path)
            .with_context(|| format!("Unable to load the configuration from {}", path.display()))?,
        None => NasConfig::default(),
    };

    let connection = &mut config.connection;
    if let Some(host) = &args.host {
        connection.host = host.clone();
    }
    if let Some(port) = args.port {
        connection.port = Some(port);
    }
    if let Some(user) = &args.user {
        connection.user = user.clone();
    }
    if let Some(password) = &args.password {
        connection.password = Some(password.clone());
    }
    if let Some(identity) = &args.identity_file {
        connection.identity_file = Some(identity.clone());
    }
    if let Some(kind) = args.kind {
        connection.kind = kind;
    }
    if let Some(driver) = &args.driver {
        connection.driver = Some(driver.clone());
    }
    Ok(config)
}

// =============================================================================
// Dispatch
// =============================================================================

fn to_json<T: serde::Serialize>(value: T) -> unified_nas::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn execute(nas: Nas, command: Command) -> unified_nas::Result<Value> {
    match command {
        Command::Fs(command) => filesystem(&nas, command).await,
        Command::Share(command) => share(&nas, command).await,
        Command::Cache(command) => cache(&nas, command).await,
        Command::Snapshot(command) => snapshot(&nas, command).await,
        Command::Disk(ListCommand::List) => to_json(nas.disk().list().await?),
        Command::Pool(ListCommand::List) => to_json(nas.pool().list().await?),
        Command::Nasserver(NasServerCommand::List) => to_json(nas.nasserver().list().await?),
        Command::Nasserver(NasServerCommand::Details { name }) => nas.nasserver().details(&name).await,
        Command::Schema => Ok(Value::Null),
    }
}

async fn filesystem(nas: &Nas, command: FsCommand) -> unified_nas::Result<Value> {
    let resource = nas.filesystem();
    match command {
        FsCommand::List => to_json(resource.list().await?),
        FsCommand::Usage => to_json(resource.usage().await?),
        FsCommand::Create {
            name,
            size,
            pool,
            layout,
            data_reduction,
        } => {
            let mut request = CreateFileSystem::new(name, size, pool).with_layout(layout);
            request.data_reduction = data_reduction;
            to_json(resource.create(&request).await?)
        }
        FsCommand::Delete { name } => {
            resource.delete(&name).await?;
            Ok(json!({ "deleted": name }))
        }
        FsCommand::Resize { name, size, pool } => {
            resource.resize(&name, &size, pool.as_deref()).await?;
            Ok(json!({ "resized": name, "size": size }))
        }
        FsCommand::Online { name } => {
            resource.online(&name, true).await?;
            Ok(json!({ "online": name }))
        }
        FsCommand::Offline { name } => {
            resource.online(&name, false).await?;
            Ok(json!({ "offline": name }))
        }
    }
}

async fn share(nas: &Nas, command: ShareCommand) -> unified_nas::Result<Value> {
    let resource = nas.share();
    match command {
        ShareCommand::List => to_json(resource.list().await?),
        ShareCommand::Create { name, client, options } => {
            to_json(resource.create(&name, &client, &options).await?)
        }
        ShareCommand::Delete { name, client } => {
            resource.delete(&name, &client).await?;
            Ok(json!({ "deleted": name, "client": client }))
        }
    }
}

async fn cache(nas: &Nas, command: CacheCommand) -> unified_nas::Result<Value> {
    let resource = nas.cache();
    match command {
        CacheCommand::List => to_json(resource.list().await?),
        CacheCommand::Create { name, size, pool } => to_json(resource.create(&name, &size, &pool).await?),
        CacheCommand::Delete { name } => {
            resource.delete(&name).await?;
            Ok(json!({ "deleted": name }))
        }
        CacheCommand::Resize { name, size, pool } => {
            resource.resize(&name, &size, pool.as_deref()).await?;
            Ok(json!({ "resized": name, "size": size }))
        }
    }
}

async fn snapshot(nas: &Nas, command: SnapshotCommand) -> unified_nas::Result<Value> {
    let resource = nas.snapshot();
    match command {
        SnapshotCommand::List => to_json(resource.list().await?),
        SnapshotCommand::Create {
            name,
            filesystem,
            cache,
        } => to_json(resource.create(&name, &filesystem, &cache).await?),
        SnapshotCommand::Delete { name, filesystem } => {
            resource.delete(&name, &filesystem).await?;
            Ok(json!({ "deleted": name, "filesystem": filesystem }))
        }
        SnapshotCommand::Restore { name, filesystem } => {
            resource.restore(&name, &filesystem).await?;
            Ok(json!({ "restored": name, "filesystem": filesystem }))
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = ["reqwest=warn", "hyper=warn", "rustls=warn"]
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(
            EnvFilter::from_default_env().add_directive(level.into()),
            |filter, directive| filter.add_directive(directive),
        );

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
