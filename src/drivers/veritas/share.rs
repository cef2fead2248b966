//! NFS shares on the Veritas family

use super::Context;
use crate::domain::objects::Share;
use crate::domain::options::StringOptions;
use crate::domain::ports::{Resource, ShareResource};
use crate::error::{Error, ResourceKind, Result};
use crate::parsers::match_display_line;
use crate::resources::resolve_timeout;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

const FAULTED_DELIMITER: &str = "Faulted Shares:";

/// Added to every export on Access, where READDIRPLUS breaks some clients
const NORDIRPLUS: &str = "nordirplus";

pub(crate) struct SharePatterns {
    display: Vec<Regex>,
    faulted: Regex,
    /// First half of an entry that Access wraps over two lines
    wrapped: Regex,
}

impl SharePatterns {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            display: vec![Regex::new(
                r"^(?P<name>[/\w:-]+)\s+(?P<client>[\w\.\*/]+)\s+\((?P<options>[\w,]+)\)$",
            )?],
            faulted: Regex::new(r"^(?P<name>[/\w:-]+)\s+(?P<client>[\w\.\*/]+)\s*:\s*[\w\.-]+\s*$")?,
            wrapped: Regex::new(r"^(?P<name>[/\w:-]+)\s+(?P<client>[\d\.\*/]+)\s*(\((?P<options>[\w,]+)\))*$")?,
        })
    }
}

/// `nfs share` resource
#[derive(Clone)]
pub struct Shares {
    ctx: Arc<Context>,
}

impl Shares {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn patterns(&self) -> &SharePatterns {
        &self.ctx.patterns.share
    }

    fn unparsable_faulted(&self, line: &str) -> Error {
        Error::UnexpectedOutput(format!(
            "It's not possible to parse the output of faulted shares received from {}. Line output: \"{}\".",
            self.ctx.nas(),
            line
        ))
    }

    /// `(path, client)` pairs listed under the faulted section
    fn faulted(&self, lines: &[&str]) -> Result<HashSet<(String, String)>> {
        let mut faulted = HashSet::new();
        for line in lines.iter().filter(|l| !l.trim().is_empty()) {
            let caps = self
                .patterns()
                .faulted
                .captures(line)
                .ok_or_else(|| self.unparsable_faulted(line))?;
            faulted.insert((caps["name"].to_string(), caps["client"].to_string()));
        }
        Ok(faulted)
    }

    fn build(&self, line: &str, faulted: &HashSet<(String, String)>) -> Result<Share> {
        let caps = match_display_line(&self.patterns().display, line, self.ctx.nas())?;
        let name = &caps["name"];
        let mut client = &caps["client"];
        let is_faulted = faulted.contains(&(name.to_string(), client.to_string()));
        if client == "*" {
            client = "";
        }
        let mut share = Share::new(name, client, StringOptions::parse(&caps["options"]));
        share.faulted = is_faulted;
        Ok(share)
    }

    /// Access wraps long entries, continuing the options on the next line
    fn build_wrapped(&self, lines: &[&str], faulted: &HashSet<(String, String)>) -> Result<Vec<Share>> {
        let mut shares = Vec::new();
        let mut pending: Option<String> = None;
        for line in lines {
            let line = match pending.take() {
                Some(start) => format!("{} {}", start, line),
                None => line.to_string(),
            };
            if self.patterns().display.iter().any(|r| r.is_match(&line)) {
                shares.push(self.build(&line, faulted)?);
            } else if self.patterns().wrapped.is_match(&line) {
                pending = Some(line);
            } else {
                return Err(self.unparsable_faulted(&line));
            }
        }
        if let Some(line) = pending {
            warn!("The share listing of {} ended inside a wrapped entry: {}", self.ctx.nas(), line);
            return Err(Error::UnexpectedOutput(format!(
                "The share listing received from {} ends with an incomplete entry. Line output: \"{}\".",
                self.ctx.nas(),
                line
            )));
        }
        Ok(shares)
    }
}

#[async_trait]
impl Resource for Shares {
    type Object = Share;

    fn nas_name(&self) -> &str {
        self.ctx.nas()
    }

    async fn list(&self) -> Result<Vec<Share>> {
        let output = self.ctx.listing("nfs share show").await?.join("\n");
        let (shares, faulted) = match output.split(FAULTED_DELIMITER).collect::<Vec<_>>()[..] {
            [shares, faulted] => (shares, faulted),
            _ => (output.as_str(), ""),
        };

        let faulted = self.faulted(&faulted.lines().collect::<Vec<_>>())?;
        let lines: Vec<&str> = shares.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if self.ctx.flavor.is_access() {
            return self.build_wrapped(&lines, &faulted);
        }
        lines.iter().map(|line| self.build(line, &faulted)).collect()
    }
}

#[async_trait]
impl ShareResource for Shares {
    async fn create(&self, name: &str, client: &str, options: &str) -> Result<Share> {
        let mut options = StringOptions::parse(options);
        if self.ctx.flavor.is_access() {
            options.insert(NORDIRPLUS);
        }

        let cmd = format!("nfs share add {} {} {}", options, name, client);
        match self.ctx.execute(&cmd, self.ctx.timeouts.create()).await {
            Ok(_) => {}
            Err(Error::ExecCommand(err)) => {
                return Err(Error::creation(
                    ResourceKind::Share,
                    format!("Share creation failed: {}. Command: {}", err, cmd),
                ))
            }
            Err(e) => resolve_timeout(e, true, || self.exists((name, client).into())).await?,
        }
        Ok(Share::new(name, client, options))
    }

    async fn delete(&self, name: &str, client: &str) -> Result<()> {
        let cmd = format!("nfs share delete {} {}", name, client);
        match self.ctx.execute(&cmd, self.ctx.timeouts.delete()).await {
            Ok(_) => Ok(()),
            Err(Error::ExecCommand(err)) => Err(Error::deletion(
                ResourceKind::Share,
                format!("{}. Command: {}", err, cmd),
            )),
            Err(e) => resolve_timeout(e, false, || self.exists((name, client).into())).await,
        }
    }
}
