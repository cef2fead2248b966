//! Test doubles for the transport ports and shared console fixtures

use crate::config::NasConfig;
use crate::domain::ports::{CommandOutput, CommandRunner, Method, RestResponse, RestTransport};
use crate::drivers::veritas::{Context, Flavor};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Fake SSH runner
// =============================================================================

#[derive(Clone)]
enum Reply {
    Output(CommandOutput),
    Timeout,
}

/// Scripted [`CommandRunner`]
///
/// Rules match on the console command for clish invocations and on the raw
/// line otherwise. Exact rules win over prefix rules, one-shot rules over
/// persistent ones, and the longest persistent prefix wins.
pub struct FakeRunner {
    rules: Mutex<Vec<(String, Reply)>>,
    once: Mutex<VecDeque<(String, Reply)>>,
    commands: Mutex<Vec<String>>,
    connected: AtomicBool,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        let runner = Self {
            rules: Mutex::new(Vec::new()),
            once: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        };
        runner.on("echo is_bash_test", CommandOutput::ok("is_bash_test\n"));
        Arc::new(runner)
    }

    fn rule(&self, prefix: &str, reply: Reply) {
        let mut rules = self.rules.lock();
        rules.retain(|(p, _)| p != prefix);
        rules.push((prefix.to_string(), reply));
    }

    /// Answer every command starting with `prefix`
    pub fn on(&self, prefix: &str, output: CommandOutput) {
        self.rule(prefix, Reply::Output(output));
    }

    /// Answer the next matching command only
    pub fn once(&self, prefix: &str, output: CommandOutput) {
        self.once
            .lock()
            .push_back((prefix.to_string(), Reply::Output(output)));
    }

    pub fn timeout(&self, prefix: &str) {
        self.rule(prefix, Reply::Timeout);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Raw command lines in the order they ran
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Commands whose console (or raw) text starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| console_command(c).starts_with(prefix))
            .count()
    }

    fn reply(&self, command: &str) -> Option<Reply> {
        let key = console_command(command);
        {
            let mut once = self.once.lock();
            let exact = once.iter().position(|(p, _)| p == key);
            let found = exact.or_else(|| once.iter().position(|(p, _)| key.starts_with(p.as_str())));
            if let Some(idx) = found {
                return once.remove(idx).map(|(_, reply)| reply);
            }
        }

        let rules = self.rules.lock();
        if let Some((_, reply)) = rules.iter().find(|(p, _)| p == key) {
            return Some(reply.clone());
        }
        rules
            .iter()
            .filter(|(p, _)| key.starts_with(p.as_str()))
            .max_by_key(|(p, _)| p.len())
            .map(|(_, reply)| reply.clone())
    }
}

/// Console text of a clish invocation, or the line itself
fn console_command(command: &str) -> &str {
    match command.find(" -c '") {
        Some(idx) if command.ends_with('\'') => &command[idx + 5..command.len() - 1],
        _ => command,
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &str, _timeout: Option<Duration>) -> Result<CommandOutput> {
        self.commands.lock().push(command.to_string());
        match self.reply(command) {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Timeout) => Err(Error::ExecutionTimeout(format!(
                "Timeout while executing the command \"{}\"",
                command
            ))),
            None => Ok(CommandOutput::failed(
                127,
                format!("bash: {}: command not found", command),
            )),
        }
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn host(&self) -> &str {
        "fake"
    }
}

/// Driver context over a fake runner, without retry delays
pub fn veritas(runner: &Arc<FakeRunner>, flavor: Flavor) -> Arc<Context> {
    match Context::new(flavor, runner.clone(), &NasConfig::without_delays()) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => panic!("context: {}", e),
    }
}

// =============================================================================
// Fake REST transport
// =============================================================================

/// Scripted [`RestTransport`] keyed by method and endpoint prefix
pub struct FakeRest {
    routes: Mutex<Vec<(Method, String, VecDeque<RestResponse>)>>,
    requests: Mutex<Vec<(Method, String, Option<Value>)>>,
}

impl FakeRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue a response; the last one of a route keeps answering
    pub fn on(&self, method: Method, endpoint: &str, status: u16, body: Value) {
        let mut routes = self.routes.lock();
        let response = RestResponse::new(status, body);
        match routes.iter_mut().find(|(m, e, _)| *m == method && e == endpoint) {
            Some((_, _, queue)) => queue.push_back(response),
            None => routes.push((method, endpoint.to_string(), VecDeque::from([response]))),
        }
    }

    /// Drop the queued responses of a route and answer with this one
    pub fn set(&self, method: Method, endpoint: &str, status: u16, body: Value) {
        self.routes
            .lock()
            .retain(|(m, e, _)| !(*m == method && e == endpoint));
        self.on(method, endpoint, status, body);
    }

    pub fn requests(&self) -> Vec<(Method, String, Option<Value>)> {
        self.requests.lock().clone()
    }

    pub fn count(&self, method: Method, endpoint: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(m, e, _)| *m == method && e.starts_with(endpoint))
            .count()
    }
}

#[async_trait]
impl RestTransport for FakeRest {
    async fn request(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<RestResponse> {
        self.requests
            .lock()
            .push((method, endpoint.to_string(), body.cloned()));

        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .filter(|(m, e, _)| *m == method && endpoint.starts_with(e.as_str()))
            .max_by_key(|(_, e, _)| e.len());
        match route {
            Some((_, _, queue)) if queue.len() > 1 => Ok(queue.pop_front().unwrap_or_default()),
            Some((_, _, queue)) => Ok(queue.front().cloned().unwrap_or_default()),
            None => Err(Error::Connection(format!("no route for {} {}", method, endpoint))),
        }
    }

    fn host(&self) -> &str {
        "unity.fake"
    }
}

// =============================================================================
// Console fixtures
// =============================================================================

pub const SFS_FS_LIST: &str = "\
FS                        STATUS       SIZE    LAYOUT              MIRRORS   COLUMNS   USE%  NFS SHARED  CIFS SHARED  SECONDARY TIER  POOL LIST
========================= ======       ====    ======              =======   =======   ====  ==========  ===========  ==============  =========
fs1                       online       10.75M  simple              -         -         5%    no          no           no              P1
fs2                       offline      1.00G   simple              -         -         1%    no          no           no              P2
";

pub const VA_FS_LIST: &str = "\
FS                        STATUS       SIZE    LAYOUT              MIRRORS   COLUMNS   USE%  USED  NFS SHARED  CIFS SHARED  FTP SHARED  SECONDARY TIER
========================= ======       ====    ======              =======   =======   ====  ====  ==========  ===========  ==========  ==============
fs1                       online       10.75M  simple              1         -         5%    no    no          no           no          -
";

pub const VXPRINT_FS1: &str = "\
Disk group: sfsdg

TY NAME         ASSOC        KSTATE   LENGTH   PLOFFS   STATE    TUTIL0  PUTIL0
v  fs1          fsgen        ENABLED  22016    -        ACTIVE   -       -
pl fs1-01       fs1          ENABLED  22016    -        ACTIVE   -       -
sd disk_1-04    fs1-01       ENABLED  11008    0        -        -       -       disk_1
sd disk_2-04    fs1-01       ENABLED  11008    11008    -        -       -       disk_2
";

pub const SFS_CACHE_LIST: &str = "\
CACHE NAME TOTAL(Mb) USED(Mb) (%) AVAIL(Mb) (%) SDCNT
cache1 100 10 (10) 90 (90) 1
";

/// `storage fs list <fs>` dump with the given rollsync status
pub fn fs_properties(rollsync: &str) -> String {
    format!(
        "\
General Info:
===============
Block Size:      1024 Bytes
Version:          Version 8

Primary Tier
============
Size:            10.75M
Layout:          simple
Mirrors:         -

Tier Info:
==========
primary

Defrag Status: Not Running
Resync   Status: Not Running
Rollsync Status: {}
Relayout Status: Not Running
",
        rollsync
    )
}
