//! Shared types for XenAPI management.

use crate::error::{XenError, XenResult};
use crate::value::XmlRpcValue;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection / Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for connecting to a XenAPI pool master.
///
/// The password is deliberately not part of the config; it is handed to
/// [`Session::open`](crate::session::Session::open) separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XenConfig {
    /// Host name, `host:port` or full URL (`https://xen01.lab/`)
    pub endpoint: String,
    /// Username (usually `root`)
    #[serde(default = "default_username")]
    pub username: String,
    /// Skip TLS certificate verification (self-signed pool masters)
    #[serde(default)]
    pub insecure: bool,
    /// Timeout for a single RPC round trip, in seconds
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// Connect timeout for bulk import/export streams, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Delay between task status polls, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum number of task status polls before giving up
    #[serde(default = "default_poll_attempts")]
    pub poll_max_attempts: u32,
}

fn default_username() -> String { "root".into() }
fn default_rpc_timeout() -> u64 { 60 }
fn default_connect_timeout() -> u64 { 30 }
fn default_poll_interval() -> u64 { 1000 }
fn default_poll_attempts() -> u32 { 60 }

impl Default for XenConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            username: default_username(),
            insecure: false,
            rpc_timeout_secs: default_rpc_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            poll_interval_ms: default_poll_interval(),
            poll_max_attempts: default_poll_attempts(),
        }
    }
}

impl XenConfig {
    pub fn new(endpoint: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Object references
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque server-side handle (`OpaqueRef:…`). Only compared, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectRef(String);

/// The reference XenAPI uses for "no object".
pub const NULL_REF: &str = "OpaqueRef:NULL";

impl ObjectRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_empty() || self.0 == NULL_REF
    }
}

impl From<String> for ObjectRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ObjectRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference together with its (freshly fetched) record.
#[derive(Debug, Clone, Serialize)]
pub struct Remote<T> {
    pub reference: ObjectRef,
    pub record: T,
}

/// Decode one record struct into a typed view.
pub fn decode_record<T: DeserializeOwned>(value: XmlRpcValue) -> XenResult<T> {
    Ok(serde_json::from_value(serde_json::Value::from(value))?)
}

/// Decode a `get_all_records` map (ref → record), sorted by reference.
pub fn decode_records<T: DeserializeOwned>(value: XmlRpcValue) -> XenResult<Vec<Remote<T>>> {
    let XmlRpcValue::Struct(map) = value else {
        return Err(XenError::parse(format!(
            "expected ref → record struct, got {}",
            value.type_name()
        )));
    };
    map.into_iter()
        .map(|(reference, record)| {
            Ok(Remote {
                reference: ObjectRef::from(reference),
                record: decode_record(record)?,
            })
        })
        .collect()
}

/// XenAPI sends int64 fields as decimal strings.
pub fn parse_int64(field: &str, raw: &str) -> XenResult<u64> {
    raw.trim()
        .parse()
        .map_err(|e| XenError::parse(format!("{field}: invalid integer '{raw}': {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  VM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum VmPowerState {
    Halted,
    Paused,
    Running,
    Suspended,
    #[default]
    #[serde(other)]
    Unknown,
}

/// The subset of a `VM` record the workflows use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VmRecord {
    pub uuid: String,
    pub name_label: String,
    pub name_description: String,
    pub power_state: VmPowerState,
    pub is_a_template: bool,
    pub is_a_snapshot: bool,
    pub is_control_domain: bool,
    pub memory_static_min: String,
    pub memory_static_max: String,
    pub memory_dynamic_min: String,
    pub memory_dynamic_max: String,
    #[serde(rename = "VCPUs_max")]
    pub vcpus_max: String,
    #[serde(rename = "VBDs")]
    pub vbds: Vec<ObjectRef>,
    pub resident_on: Option<ObjectRef>,
}

impl VmRecord {
    /// A regular guest: not a template, snapshot or dom0.
    pub fn is_guest(&self) -> bool {
        !self.is_a_template && !self.is_a_snapshot && !self.is_control_domain
    }

    pub fn memory_static_max_bytes(&self) -> XenResult<u64> {
        parse_int64("memory_static_max", &self.memory_static_max)
    }

    pub fn memory_static_min_bytes(&self) -> XenResult<u64> {
        parse_int64("memory_static_min", &self.memory_static_min)
    }
}

/// The subset of a `VBD` record needed to find a VM's disks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VbdRecord {
    pub uuid: String,
    #[serde(rename = "VM")]
    pub vm: Option<ObjectRef>,
    #[serde(rename = "VDI")]
    pub vdi: Option<ObjectRef>,
    /// `Disk`, `CD` or `Floppy`
    #[serde(rename = "type")]
    pub vbd_type: String,
    pub userdevice: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SrRecord {
    pub uuid: String,
    pub name_label: String,
    pub name_description: String,
    #[serde(rename = "type")]
    pub sr_type: String,
    pub content_type: String,
    pub shared: bool,
    pub physical_size: String,
    pub physical_utilisation: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Hosts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRecord {
    pub uuid: String,
    pub name_label: String,
    pub hostname: String,
    pub address: String,
    pub enabled: bool,
    pub metrics: Option<ObjectRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostMetricsRecord {
    pub uuid: String,
    pub memory_total: String,
    pub memory_free: String,
    pub live: bool,
}

/// Host memory summary, ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct HostMemory {
    pub host: ObjectRef,
    pub name_label: String,
    pub address: String,
    pub live: bool,
    pub memory_total: u64,
    pub memory_free: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Success,
    Failure,
    Cancelling,
    Cancelled,
}

impl TaskStatus {
    /// `success`, `failure` and `cancelled` end a task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRecord {
    pub uuid: String,
    pub name_label: String,
    pub status: TaskStatus,
    pub progress: f64,
    /// Result payload; for imports this is an XML fragment holding VM refs.
    pub result: String,
    pub error_info: Vec<String>,
}

impl TaskRecord {
    /// All `OpaqueRef:` tokens found in the result payload.
    pub fn result_refs(&self) -> Vec<ObjectRef> {
        extract_refs(&self.result)
    }
}

/// Pull every `OpaqueRef:…` token out of a free-form payload.
pub fn extract_refs(payload: &str) -> Vec<ObjectRef> {
    let mut refs = Vec::new();
    let mut rest = payload;
    while let Some(start) = rest.find("OpaqueRef:") {
        let tail = &rest[start..];
        let end = tail
            .find(|c: char| c == '<' || c == '"' || c == '\'' || c == ',' || c.is_whitespace())
            .unwrap_or(tail.len());
        let token = &tail[..end];
        if token != NULL_REF {
            refs.push(ObjectRef::from(token));
        }
        rest = &tail[end..];
    }
    refs
}
