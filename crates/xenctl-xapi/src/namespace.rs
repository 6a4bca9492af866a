//! Dynamic namespace dispatch.
//!
//! Nothing here is generated per method. The resolver records which
//! namespaces the server advertised, and a [`Namespace`] forwards any
//! `method` name verbatim as `namespace.method`, with the owning session's
//! token prepended. Methods that are not in the catalog are still sent;
//! the server decides whether they exist.

use crate::catalog::MethodCatalog;
use crate::error::XenResult;
use crate::session::Session;
use crate::value::XmlRpcValue;

use std::collections::BTreeSet;

/// Set of namespaces made callable for one session.
#[derive(Debug, Clone, Default)]
pub struct NamespaceResolver {
    registered: BTreeSet<String>,
}

impl NamespaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every namespace in `catalog`. Returns how many were new,
    /// so re-resolving the same catalog returns 0.
    pub fn resolve(&mut self, catalog: &MethodCatalog) -> usize {
        let before = self.registered.len();
        self.registered
            .extend(catalog.namespaces().map(str::to_string));
        self.registered.len() - before
    }

    pub fn is_registered(&self, namespace: &str) -> bool {
        self.registered.contains(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.registered.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

/// Catch-all dispatcher for one namespace, bound to one session.
#[derive(Clone, Copy)]
pub struct Namespace<'s> {
    session: &'s Session,
    name: &'s str,
}

impl<'s> Namespace<'s> {
    pub(crate) fn new(session: &'s Session, name: &'s str) -> Self {
        Self { session, name }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Whether the server advertised this namespace at login.
    pub fn is_advertised(&self) -> bool {
        self.session.resolver().is_registered(self.name)
    }

    /// Whether the catalog lists `method` under this namespace.
    pub fn advertises(&self, method: &str) -> bool {
        self.session.catalog().contains(self.name, method)
    }

    /// `namespace.method(session, args…)`.
    pub async fn call(&self, method: &str, args: Vec<XmlRpcValue>) -> XenResult<XmlRpcValue> {
        let full = format!("{}.{}", self.name, method);
        self.session.call(&full, args).await
    }
}
