//! Method catalog: the server's advertised method names, grouped by namespace.

use crate::error::XenResult;
use crate::gateway::Gateway;

use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Introspection method used to enumerate the catalog.
pub const LIST_METHODS: &str = "system.listMethods";

/// Immutable snapshot of `system.listMethods`, partitioned by namespace.
#[derive(Debug, Clone, Default)]
pub struct MethodCatalog {
    by_namespace: BTreeMap<String, BTreeSet<String>>,
}

impl MethodCatalog {
    /// Build from raw dotted method names. Names without a dot are skipped.
    pub fn from_methods<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut by_namespace: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in methods {
            if let Some((ns, method)) = split_method(name.as_ref()) {
                by_namespace
                    .entry(ns.to_string())
                    .or_default()
                    .insert(method.to_string());
            }
        }
        Self { by_namespace }
    }

    /// Fetch the catalog once from the server.
    pub async fn fetch(gateway: &Gateway) -> XenResult<Self> {
        let names = gateway.call_raw(LIST_METHODS, &[]).await?.into_string_list()?;
        let catalog = Self::from_methods(&names);
        debug!(
            "method catalog: {} methods in {} namespaces",
            catalog.len(),
            catalog.by_namespace.len()
        );
        Ok(catalog)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.by_namespace.keys().map(String::as_str)
    }

    pub fn methods(&self, namespace: &str) -> impl Iterator<Item = &str> {
        self.by_namespace
            .get(namespace)
            .into_iter()
            .flat_map(|m| m.iter().map(String::as_str))
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.by_namespace.contains_key(namespace)
    }

    pub fn contains(&self, namespace: &str, method: &str) -> bool {
        self.by_namespace
            .get(namespace)
            .is_some_and(|m| m.contains(method))
    }

    /// Total number of (namespace, method) entries.
    pub fn len(&self) -> usize {
        self.by_namespace.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_namespace.is_empty()
    }
}

/// Split `Async.VM.clone` into (`Async.VM`, `clone`).
///
/// Trailing all-digit segments are version qualifiers and are dropped
/// first, so `VM.get_record.2` yields (`VM`, `get_record`).
pub fn split_method(name: &str) -> Option<(&str, &str)> {
    let mut trimmed = name.trim();
    while let Some((head, last)) = trimmed.rsplit_once('.') {
        if !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()) {
            trimmed = head;
        } else {
            break;
        }
    }
    let (ns, method) = trimmed.rsplit_once('.')?;
    if ns.is_empty() || method.is_empty() {
        return None;
    }
    Some((ns, method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_last_dot() {
        assert_eq!(split_method("VM.get_all_records"), Some(("VM", "get_all_records")));
        assert_eq!(split_method("Async.VM.clone"), Some(("Async.VM", "clone")));
        assert_eq!(split_method("listMethods"), None);
        assert_eq!(split_method(".x"), None);
    }

    #[test]
    fn strips_numeric_qualifiers() {
        assert_eq!(split_method("VM.get_record.2"), Some(("VM", "get_record")));
        assert_eq!(split_method("host.call_plugin.1.0"), Some(("host", "call_plugin")));
        assert_eq!(split_method("VM.set_VCPUs_number_live"), Some(("VM", "set_VCPUs_number_live")));
    }

    #[test]
    fn catalog_groups_and_dedups() {
        let cat = MethodCatalog::from_methods([
            "VM.get_all_records",
            "VM.clone",
            "VM.clone",
            "session.login_with_password",
            "Async.VM.clone",
            "VM.get_record.2",
        ]);
        assert_eq!(
            cat.namespaces().collect::<Vec<_>>(),
            vec!["Async.VM", "VM", "session"]
        );
        assert!(cat.contains("VM", "get_record"));
        assert_eq!(cat.methods("VM").count(), 3);
        assert_eq!(cat.len(), 5);
        assert!(!cat.has_namespace("pool"));
    }
}
