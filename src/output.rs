//! Table and JSON rendering for command results.

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use xenctl_xapi::catalog::MethodCatalog;
use xenctl_xapi::types::{HostMemory, Remote, SrRecord, VmRecord};
use xenctl_xapi::units::format_bytes;
use xenctl_xapi::value::XmlRpcValue;

fn table(headers: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(headers);
    table
}

pub fn json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn memory(raw: &str) -> String {
    raw.parse::<u64>().map(format_bytes).unwrap_or_else(|_| raw.to_string())
}

pub fn vm_table(vms: &[Remote<VmRecord>]) -> String {
    let mut table = table(vec!["NAME", "UUID", "POWER", "MEMORY", "VCPUS"]);
    for vm in vms {
        table.add_row(vec![
            vm.record.name_label.clone(),
            vm.record.uuid.clone(),
            format!("{:?}", vm.record.power_state),
            memory(&vm.record.memory_static_max),
            vm.record.vcpus_max.clone(),
        ]);
    }
    table.to_string()
}

pub fn template_table(templates: &[Remote<VmRecord>]) -> String {
    let mut table = table(vec!["NAME", "UUID", "DESCRIPTION"]);
    for t in templates {
        table.add_row(vec![
            t.record.name_label.clone(),
            t.record.uuid.clone(),
            t.record.name_description.clone(),
        ]);
    }
    table.to_string()
}

pub fn sr_table(srs: &[Remote<SrRecord>]) -> String {
    let mut table = table(vec!["NAME", "UUID", "TYPE", "SHARED", "SIZE", "USED"]);
    for sr in srs {
        table.add_row(vec![
            sr.record.name_label.clone(),
            sr.record.uuid.clone(),
            sr.record.sr_type.clone(),
            sr.record.shared.to_string(),
            memory(&sr.record.physical_size),
            memory(&sr.record.physical_utilisation),
        ]);
    }
    table.to_string()
}

pub fn host_table(hosts: &[HostMemory]) -> String {
    let mut table = table(vec!["NAME", "ADDRESS", "LIVE", "MEMORY", "FREE"]);
    for h in hosts {
        table.add_row(vec![
            h.name_label.clone(),
            h.address.clone(),
            h.live.to_string(),
            format_bytes(h.memory_total),
            format_bytes(h.memory_free),
        ]);
    }
    table.to_string()
}

/// Namespaces with method counts, or the methods of one namespace.
pub fn catalog_listing(catalog: &MethodCatalog, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => catalog
            .methods(ns)
            .map(|m| format!("{ns}.{m}"))
            .collect::<Vec<_>>()
            .join("\n"),
        None => {
            let mut table = table(vec!["NAMESPACE", "METHODS"]);
            for ns in catalog.namespaces() {
                table.add_row(vec![ns.to_string(), catalog.methods(ns).count().to_string()]);
            }
            table.to_string()
        }
    }
}

/// Raw call results: scalars bare, containers as pretty JSON.
pub fn value(v: &XmlRpcValue) -> anyhow::Result<String> {
    match v {
        XmlRpcValue::Array(_) | XmlRpcValue::Struct(_) => {
            json(&serde_json::Value::from(v.clone()))
        }
        scalar => Ok(scalar.to_display_string()),
    }
}
