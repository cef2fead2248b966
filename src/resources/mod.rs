//! Generic resource protocol
//!
//! The parts of list/get/exists/create/delete that do not depend on the
//! vendor: identifier validation, lookup in a listing with incomplete-data
//! detection, and reconciliation of commands whose outcome is unknown after a
//! timeout.

use crate::domain::objects::NasObject;
use crate::domain::ports::Resource;
use crate::error::{Error, ResourceKind, Result};
use indexmap::IndexMap;
use std::future::Future;
use tracing::{debug, warn};

// =============================================================================
// Identifier
// =============================================================================

/// Identifier arguments of `get`, `exists` and `delete`
///
/// Positional values bind to the resource's identifier keys in order; named
/// values bind by key.
///
/// ```
/// use unified_nas::resources::Identifier;
///
/// let share = Identifier::new().arg("/vx/fs1").named("client", "10.0.0.1");
/// let fs: Identifier = "fs1".into();
/// # let _ = (share, fs);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifier {
    positional: Vec<String>,
    named: Vec<(String, String)>,
}

impl Identifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a positional value
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add a named value
    pub fn named(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.named.push((key.into(), value.into()));
        self
    }

    /// Bind the values to `keys`, checking arity and key names
    pub fn resolve(&self, keys: &[&str], kind: ResourceKind) -> Result<IndexMap<String, String>> {
        let given = self.positional.len() + self.named.len();
        if given != keys.len() {
            let plural = if keys.len() > 1 { "s" } else { "" };
            return Err(Error::InvalidArguments(format!(
                "This method takes exactly {} argument{} ({} given)",
                keys.len(),
                plural,
                given
            )));
        }

        let unknown: Vec<&str> = self
            .named
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| !keys.contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::InvalidArguments(format!(
                "The following arguments are not identifiers for a {}: {}. The expected identifiers are: {}",
                kind,
                unknown.join(", "),
                keys.join(", ")
            )));
        }

        let mut bound: IndexMap<String, String> = keys
            .iter()
            .map(|k| k.to_string())
            .zip(self.positional.iter().cloned())
            .collect();
        for (k, v) in &self.named {
            bound.insert(k.clone(), v.clone());
        }
        if bound.len() != keys.len() {
            return Err(Error::InvalidArguments(format!(
                "Repeated identifier arguments for a {}. The expected identifiers are: {}",
                kind,
                keys.join(", ")
            )));
        }
        Ok(bound)
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier::new().arg(name)
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Identifier::new().arg(name)
    }
}

impl From<(&str, &str)> for Identifier {
    fn from((first, second): (&str, &str)) -> Self {
        Identifier::new().arg(first).arg(second)
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Find one object in the resource's listing
///
/// Incomplete listings are searched as far as they go. A match with plain
/// fields still unresolved fails with
/// [`Error::IncompleteParsedInformation`] carrying the match.
pub async fn get_from_listing<R>(resource: &R, identifier: &Identifier) -> Result<R::Object>
where
    R: Resource + ?Sized,
{
    let kind = <R::Object as NasObject>::KIND;
    let wanted = identifier.resolve(<R::Object as NasObject>::IDENTIFIER_KEYS, kind)?;

    let objects = match resource.list().await {
        Ok(objects) => objects,
        Err(Error::IncompleteParsedInformation { message, parsed }) => {
            match <R::Object as NasObject>::from_parsed(&parsed) {
                Some(objects) => {
                    debug!("Searching incomplete {} listing: {}", kind, message);
                    objects
                }
                None => return Err(Error::IncompleteParsedInformation { message, parsed }),
            }
        }
        Err(e) => return Err(e),
    };

    let item = objects
        .into_iter()
        .find(|o| wanted.iter().all(|(k, v)| o.identifier_value(k).as_deref() == Some(v.as_str())))
        .ok_or_else(|| {
            let ident: Vec<&str> = wanted.values().map(String::as_str).collect();
            Error::does_not_exist(
                kind,
                format!(
                    "The \"{}\" {} does not exist in {}.",
                    ident.join(", "),
                    kind,
                    resource.nas_name()
                ),
            )
        })?;

    let missing = item.missing_fields();
    if !missing.is_empty() {
        return Err(Error::incomplete(
            format!(
                "The parsed output information from {} is incomplete, missing the following value(s): {}",
                resource.nas_name(),
                missing.join("\n")
            ),
            <R::Object as NasObject>::into_parsed(vec![item]),
        ));
    }
    Ok(item)
}

// =============================================================================
// Timeout Reconciliation
// =============================================================================

/// Settle a command whose outcome is unknown
///
/// Errors other than [`Error::ExecutionTimeout`] are returned unchanged. On a
/// timeout, `exists` is checked: when the object is in the state the command
/// was meant to produce (`expect_exists`) the command is taken as done.
/// Otherwise, or when the check itself fails, the original timeout is
/// returned.
pub async fn resolve_timeout<F, Fut>(error: Error, expect_exists: bool, exists: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    if !matches!(error, Error::ExecutionTimeout(_)) {
        return Err(error);
    }

    match exists().await {
        Ok(found) if found == expect_exists => {
            warn!("{} The operation took effect anyway.", error);
            Ok(())
        }
        Ok(_) => Err(error),
        Err(check) => {
            warn!("Could not verify the outcome after a timeout: {}", check);
            Err(error)
        }
    }
}
