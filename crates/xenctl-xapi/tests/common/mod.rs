//! In-process XenAPI pool master for integration tests.
//!
//! Serves XML-RPC on `/` and the bulk `/import` and `/export` handlers on a
//! loopback port, backed by an in-memory inventory.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use secrecy::SecretString;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use xenctl_xapi::codec::{decode_method_call, encode_method_response, MethodCall, MethodResponse};
use xenctl_xapi::credentials::NoPrompt;
use xenctl_xapi::value::{structure, XmlRpcValue};
use xenctl_xapi::{Session, XenConfig};

pub const PASSWORD: &str = "secret";
pub const TOKEN: &str = "OpaqueRef:mock-session";

const METHODS: &[&str] = &[
    "session.login_with_password",
    "VM.get_all_records",
    "VM.get_record",
    "VM.clone",
    "VM.provision",
    "VM.start",
    "VM.clean_shutdown",
    "VM.hard_shutdown",
    "VM.destroy",
    "VM.set_memory_limits",
    "VM.set_memory_static_max",
    "VM.set_memory_dynamic_max",
    "VM.set_memory_dynamic_min",
    "VM.set_name_description",
    "SR.get_all_records",
    "task.create",
    "task.get_record",
    "task.destroy",
];

pub type Record = BTreeMap<String, XmlRpcValue>;
type Shared = Arc<Mutex<PoolState>>;

#[derive(Debug, Clone)]
pub struct Task {
    pub status: String,
    pub result: String,
    pub error_info: Vec<String>,
}

#[derive(Default)]
pub struct PoolState {
    pub calls: Vec<String>,
    pub vms: BTreeMap<String, Record>,
    pub srs: BTreeMap<String, Record>,
    pub tasks: BTreeMap<String, Task>,
    pub destroyed_tasks: Vec<String>,
    /// Disk image per VM ref, served by `/export`
    pub disks: HashMap<String, Vec<u8>>,
    /// `sr_uuid` query value of every import
    pub imported_into: Vec<Option<String>>,
    pub fail_export: bool,
    /// `/import` reads the whole upload, fails the task and answers 500
    pub fail_import: bool,
    pub stuck_tasks: bool,
    /// Reject `VM.set_memory_limits` like older servers
    pub legacy_memory_api: bool,
    next_id: u64,
}

impl PoolState {
    fn next_ref(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("OpaqueRef:{kind}-{}", self.next_id)
    }

    pub fn add_vm(&mut self, name: &str, uuid: &str, template: bool) -> String {
        let r = self.next_ref(if template { "tpl" } else { "vm" });
        self.vms.insert(r.clone(), vm_record(name, uuid, template));
        r
    }

    pub fn add_sr(&mut self, name: &str, uuid: &str) -> String {
        let r = self.next_ref("sr");
        let record = [
            ("uuid", XmlRpcValue::from(uuid)),
            ("name_label", XmlRpcValue::from(name)),
            ("type", XmlRpcValue::from("lvm")),
            ("content_type", XmlRpcValue::from("user")),
            ("shared", XmlRpcValue::from(false)),
            ("physical_size", XmlRpcValue::from("107374182400")),
            ("physical_utilisation", XmlRpcValue::from("1073741824")),
        ];
        self.srs.insert(r.clone(), into_record(record));
        r
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.iter().filter(|m| *m == method).count()
    }

    pub fn field(&self, vm: &str, field: &str) -> Option<String> {
        self.vms.get(vm)?.get(field).map(XmlRpcValue::to_display_string)
    }
}

fn into_record<const N: usize>(pairs: [(&str, XmlRpcValue); N]) -> Record {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub fn vm_record(name: &str, uuid: &str, template: bool) -> Record {
    into_record([
        ("uuid", XmlRpcValue::from(uuid)),
        ("name_label", XmlRpcValue::from(name)),
        ("name_description", XmlRpcValue::from("")),
        ("power_state", XmlRpcValue::from("Halted")),
        ("is_a_template", XmlRpcValue::from(template)),
        ("is_a_snapshot", XmlRpcValue::from(false)),
        ("is_control_domain", XmlRpcValue::from(false)),
        ("memory_static_min", XmlRpcValue::from("268435456")),
        ("memory_static_max", XmlRpcValue::from("1073741824")),
        ("memory_dynamic_min", XmlRpcValue::from("1073741824")),
        ("memory_dynamic_max", XmlRpcValue::from("1073741824")),
        ("VCPUs_max", XmlRpcValue::from("1")),
        ("VBDs", XmlRpcValue::Array(Vec::new())),
    ])
}

pub struct MockPool {
    pub addr: SocketAddr,
    pub state: Shared,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockPool {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(setup: impl FnOnce(&mut PoolState)) -> Self {
        let mut pool = PoolState::default();
        setup(&mut pool);
        let state: Shared = Arc::new(Mutex::new(pool));

        let app = Router::new()
            .route("/", post(rpc))
            .route("/import", put(import))
            .route("/export", get(export))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    rx.await.ok();
                })
                .await
                .ok();
        });

        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    pub fn config(&self) -> XenConfig {
        let mut config = XenConfig::new(format!("{}", self.addr), "root");
        config.poll_interval_ms = 5;
        config.poll_max_attempts = 40;
        config
    }

    pub async fn login(&self) -> Session {
        Session::open(
            &self.config(),
            Some(SecretString::new(PASSWORD.into())),
            &NoPrompt,
        )
        .await
        .expect("login against mock pool")
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut PoolState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

impl Drop for MockPool {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

// ── XML-RPC ─────────────────────────────────────────────────────────

async fn rpc(State(state): State<Shared>, body: String) -> Response {
    let response = match decode_method_call(&body) {
        Ok(call) => MethodResponse::Params(dispatch(&mut state.lock().unwrap(), &call)),
        Err(e) => MethodResponse::Fault {
            code: -32700,
            message: e.to_string(),
        },
    };
    (
        [(header::CONTENT_TYPE, "text/xml")],
        encode_method_response(&response),
    )
        .into_response()
}

fn ok(value: impl Into<XmlRpcValue>) -> XmlRpcValue {
    structure([
        ("Status", XmlRpcValue::from("Success")),
        ("Value", value.into()),
    ])
}

fn fail(description: &[&str]) -> XmlRpcValue {
    structure([
        ("Status", XmlRpcValue::from("Failure")),
        ("ErrorDescription", XmlRpcValue::from(description.to_vec())),
    ])
}

fn set_field(state: &mut PoolState, vm: &str, field: &str, value: XmlRpcValue) -> XmlRpcValue {
    match state.vms.get_mut(vm) {
        Some(record) => {
            record.insert(field.to_string(), value);
            ok("")
        }
        None => fail(&["HANDLE_INVALID", "VM", vm]),
    }
}

fn dispatch(state: &mut PoolState, call: &MethodCall) -> XmlRpcValue {
    state.calls.push(call.method.clone());
    let p = |i: usize| {
        call.params
            .get(i)
            .map(XmlRpcValue::to_display_string)
            .unwrap_or_default()
    };

    match call.method.as_str() {
        "system.listMethods" => return XmlRpcValue::from(METHODS.to_vec()),
        "session.login_with_password" => {
            return if p(1) == PASSWORD {
                ok(TOKEN)
            } else {
                fail(&["SESSION_AUTHENTICATION_FAILED", &p(0), "Authentication failure"])
            };
        }
        _ => {}
    }
    if p(0) != TOKEN {
        return fail(&["SESSION_INVALID", &p(0)]);
    }

    match call.method.as_str() {
        "VM.get_all_records" => ok(records(&state.vms)),
        "SR.get_all_records" => ok(records(&state.srs)),
        "VM.get_record" => match state.vms.get(&p(1)) {
            Some(r) => ok(XmlRpcValue::Struct(r.clone())),
            None => fail(&["HANDLE_INVALID", "VM", &p(1)]),
        },
        "VM.clone" => {
            let Some(mut record) = state.vms.get(&p(1)).cloned() else {
                return fail(&["HANDLE_INVALID", "VM", &p(1)]);
            };
            let vm = state.next_ref("vm");
            record.insert("is_a_template".into(), false.into());
            record.insert("name_label".into(), p(2).into());
            record.insert("uuid".into(), format!("uuid-{vm}").into());
            state.vms.insert(vm.clone(), record);
            ok(vm)
        }
        "VM.provision" => set_field(state, &p(1), "other_config", XmlRpcValue::from("provisioned")),
        "VM.set_name_description" => set_field(state, &p(1), "name_description", p(2).into()),
        "VM.start" => set_field(state, &p(1), "power_state", "Running".into()),
        "VM.clean_shutdown" | "VM.hard_shutdown" => {
            set_field(state, &p(1), "power_state", "Halted".into())
        }
        "VM.set_memory_limits" if state.legacy_memory_api => {
            fail(&["MESSAGE_METHOD_UNKNOWN", "VM.set_memory_limits"])
        }
        "VM.set_memory_limits" => {
            let vm = p(1);
            set_field(state, &vm, "memory_static_min", p(2).into());
            set_field(state, &vm, "memory_static_max", p(3).into());
            set_field(state, &vm, "memory_dynamic_min", p(4).into());
            set_field(state, &vm, "memory_dynamic_max", p(5).into())
        }
        "VM.set_memory_static_max" => set_field(state, &p(1), "memory_static_max", p(2).into()),
        "VM.set_memory_dynamic_max" => set_field(state, &p(1), "memory_dynamic_max", p(2).into()),
        "VM.set_memory_dynamic_min" => set_field(state, &p(1), "memory_dynamic_min", p(2).into()),
        "VM.destroy" => match state.vms.remove(&p(1)) {
            Some(_) => ok(""),
            None => fail(&["HANDLE_INVALID", "VM", &p(1)]),
        },
        "task.create" => {
            let task = state.next_ref("task");
            state.tasks.insert(
                task.clone(),
                Task {
                    status: "pending".into(),
                    result: String::new(),
                    error_info: Vec::new(),
                },
            );
            ok(task)
        }
        "task.get_record" => match state.tasks.get(&p(1)) {
            Some(t) => ok(structure([
                ("uuid", XmlRpcValue::from(format!("uuid-{}", p(1)))),
                ("name_label", XmlRpcValue::from("mock task")),
                ("status", XmlRpcValue::from(t.status.as_str())),
                ("progress", XmlRpcValue::Double(if t.status == "pending" { 0.3 } else { 1.0 })),
                ("result", XmlRpcValue::from(t.result.as_str())),
                ("error_info", XmlRpcValue::from(t.error_info.clone())),
            ])),
            None => fail(&["HANDLE_INVALID", "task", &p(1)]),
        },
        "task.destroy" => match state.tasks.remove(&p(1)) {
            Some(_) => {
                state.destroyed_tasks.push(p(1));
                ok("")
            }
            None => fail(&["HANDLE_INVALID", "task", &p(1)]),
        },
        other => fail(&["MESSAGE_METHOD_UNKNOWN", other]),
    }
}

fn records(map: &BTreeMap<String, Record>) -> XmlRpcValue {
    XmlRpcValue::Struct(
        map.iter()
            .map(|(k, v)| (k.clone(), XmlRpcValue::Struct(v.clone())))
            .collect(),
    )
}

// ── Bulk handlers ───────────────────────────────────────────────────

fn authorized(q: &HashMap<String, String>) -> bool {
    q.get("session_id").map(String::as_str) == Some(TOKEN)
}

async fn import(
    State(state): State<Shared>,
    Query(q): Query<HashMap<String, String>>,
    body: Body,
) -> StatusCode {
    if !authorized(&q) {
        return StatusCode::FORBIDDEN;
    }
    let Some(task) = q.get("task_id").cloned() else {
        return StatusCode::BAD_REQUEST;
    };
    let Ok(bytes) = axum::body::to_bytes(body, usize::MAX).await else {
        return StatusCode::BAD_REQUEST;
    };

    let mut s = state.lock().unwrap();
    if s.fail_import {
        if let Some(t) = s.tasks.get_mut(&task) {
            t.status = "failure".into();
            t.error_info = vec!["IMPORT_ERROR".into(), "corrupt archive".into()];
        }
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    s.imported_into.push(q.get("sr_uuid").cloned());
    let vm = s.next_ref("vm");
    let name = format!("imported-{}", s.next_id);
    s.vms.insert(vm.clone(), vm_record(&name, &name, false));
    s.disks.insert(vm.clone(), bytes.to_vec());
    let stuck = s.stuck_tasks;
    if let Some(t) = s.tasks.get_mut(&task).filter(|_| !stuck) {
        t.status = "success".into();
        t.result = format!("<value><array><data><value>{vm}</value></data></array></value>");
    }
    StatusCode::OK
}

async fn export(State(state): State<Shared>, Query(q): Query<HashMap<String, String>>) -> Response {
    if !authorized(&q) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let task = q.get("task_id").cloned().unwrap_or_default();
    let vm = q.get("ref").cloned().unwrap_or_default();

    let mut s = state.lock().unwrap();
    if s.fail_export {
        if let Some(t) = s.tasks.get_mut(&task) {
            t.status = "failure".into();
            t.error_info = vec!["VM_EXPORT_FAILED".into(), vm];
        }
        return (StatusCode::INTERNAL_SERVER_ERROR, "export failed").into_response();
    }
    let Some(disk) = s.disks.get(&vm).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let stuck = s.stuck_tasks;
    if let Some(t) = s.tasks.get_mut(&task).filter(|_| !stuck) {
        t.status = "success".into();
    }
    (StatusCode::OK, disk).into_response()
}
