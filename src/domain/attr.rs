//! Object attributes that are either known, missing or computed on demand
//!
//! Some appliance listings omit a field that can only be obtained with a
//! second, more expensive query (the pool owning a cache, the cache behind a
//! snapshot). Those fields are [`Attr::Deferred`]: the loader runs on first
//! [`Attr::resolve`] and the result is cached for the lifetime of the object
//! and its clones.

use crate::error::Result;
use futures::future::BoxFuture;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Loader of a deferred attribute
pub type Loader<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Lazily loaded value, shared between clones of the owning object
pub struct Deferred<T> {
    loader: Loader<T>,
    cell: Arc<OnceCell<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            cell: Arc::clone(&self.cell),
        }
    }
}

/// Attribute of a domain object
pub enum Attr<T> {
    /// Plain known value
    Value(T),
    /// Plain value the appliance did not report
    Missing,
    /// Value computed by a secondary query on first read
    Deferred(Deferred<T>),
}

impl<T> Attr<T> {
    pub fn value(value: T) -> Self {
        Attr::Value(value)
    }

    pub fn missing() -> Self {
        Attr::Missing
    }

    /// Build a deferred attribute from an async loader
    pub fn deferred<F>(loader: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    {
        Attr::Deferred(Deferred {
            loader: Arc::new(loader),
            cell: Arc::new(OnceCell::new()),
        })
    }

    /// Known value, without triggering any query
    pub fn peek(&self) -> Option<&T> {
        match self {
            Attr::Value(v) => Some(v),
            Attr::Missing => None,
            Attr::Deferred(d) => d.cell.get(),
        }
    }

    /// Plain attribute without a value
    pub fn is_missing(&self) -> bool {
        matches!(self, Attr::Missing)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Attr::Deferred(_))
    }

    /// Read the value, running the loader once if the attribute is deferred
    pub async fn resolve(&self) -> Result<Option<&T>> {
        match self {
            Attr::Value(v) => Ok(Some(v)),
            Attr::Missing => Ok(None),
            Attr::Deferred(d) => {
                let loader = Arc::clone(&d.loader);
                let value = d.cell.get_or_try_init(|| loader()).await?;
                Ok(Some(value))
            }
        }
    }
}

impl<T> Clone for Attr<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        match self {
            Attr::Value(v) => Attr::Value(v.clone()),
            Attr::Missing => Attr::Missing,
            Attr::Deferred(d) => Attr::Deferred(d.clone()),
        }
    }
}

impl<T> fmt::Debug for Attr<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attr::Value(v) => write!(f, "{:?}", v),
            Attr::Missing => write!(f, "None"),
            Attr::Deferred(d) => match d.cell.get() {
                Some(v) => write!(f, "{:?}", v),
                None => write!(f, "<deferred>"),
            },
        }
    }
}

impl<T> From<Option<T>> for Attr<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Attr::Value(v),
            None => Attr::Missing,
        }
    }
}

impl<T> Serialize for Attr<T>
where
    T: Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.peek().serialize(serializer)
    }
}
