//! VM workflows composed from gated calls.
//!
//! Provisioning from a template, memory sizing across API generations,
//! teardown with disk cleanup, power operations and the task-bound bulk
//! workflows (import, export, pool-to-pool transfer).

use crate::error::{XenError, XenErrorKind, XenResult};
use crate::lookup::lookup;
use crate::session::Session;
use crate::storage::StorageManager;
use crate::task::{settle, TaskEngine};
use crate::transfer::{relay, BulkTransfer};
use crate::types::*;
use crate::value::XmlRpcValue;

use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;

/// Parameters for [`VmManager::create_vm`].
#[derive(Debug, Clone, Default)]
pub struct VmCreateSpec {
    /// Template name label, uuid or reference
    pub template: String,
    pub name: String,
    pub description: Option<String>,
    /// Memory size in bytes; template default when `None`
    pub memory: Option<u64>,
    pub start: bool,
}

/// Which memory API accepted the new size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemoryStrategy {
    /// `VM.set_memory_limits`
    Limits,
    /// `VM.set_memory_static_max` and the dynamic setters
    LegacySetters,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyReport {
    pub vm: ObjectRef,
    pub name_label: String,
    pub destroyed_vdis: Vec<ObjectRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub bytes: u64,
    pub vms: Vec<ObjectRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub bytes: u64,
    /// VMs created on the destination pool
    pub vms: Vec<ObjectRef>,
}

pub struct VmManager<'a> {
    session: &'a Session,
}

impl<'a> VmManager<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    async fn vm_call(&self, method: &str, args: Vec<XmlRpcValue>) -> XenResult<XmlRpcValue> {
        self.session.invoke("VM", method, args).await
    }

    // ── List / Find ─────────────────────────────────────────────────

    /// Every VM object, including templates, snapshots and dom0.
    pub async fn list_all(&self) -> XenResult<Vec<Remote<VmRecord>>> {
        decode_records(self.vm_call("get_all_records", vec![]).await?)
    }

    pub async fn list_vms(&self) -> XenResult<Vec<Remote<VmRecord>>> {
        let mut all = self.list_all().await?;
        all.retain(|vm| vm.record.is_guest());
        Ok(all)
    }

    pub async fn list_templates(&self) -> XenResult<Vec<Remote<VmRecord>>> {
        let mut all = self.list_all().await?;
        all.retain(|vm| vm.record.is_a_template && !vm.record.is_a_snapshot);
        Ok(all)
    }

    pub async fn find_vm(&self, key: &str) -> XenResult<Remote<VmRecord>> {
        lookup(&self.list_vms().await?, key, "VM")
    }

    pub async fn find_template(&self, key: &str) -> XenResult<Remote<VmRecord>> {
        lookup(&self.list_templates().await?, key, "template")
    }

    pub async fn get_record(&self, vm: &ObjectRef) -> XenResult<VmRecord> {
        decode_record(self.vm_call("get_record", vec![vm.into()]).await?)
    }

    // ── Create / Destroy ────────────────────────────────────────────

    /// Clone a template into a new VM and provision its disks.
    ///
    /// The template must resolve to exactly one record before anything is
    /// cloned.
    pub async fn create_vm(&self, spec: &VmCreateSpec) -> XenResult<ObjectRef> {
        if spec.name.trim().is_empty() {
            return Err(XenError::invalid_input("new VM needs a name"));
        }
        let template = self.find_template(&spec.template).await?;
        info!(
            "creating VM '{}' from template '{}' ({})",
            spec.name, template.record.name_label, template.record.uuid
        );

        let vm = self
            .vm_call("clone", vec![(&template.reference).into(), spec.name.as_str().into()])
            .await?
            .into_ref()?;
        self.vm_call("provision", vec![(&vm).into()]).await?;

        if let Some(bytes) = spec.memory {
            self.set_memory(&vm, bytes).await?;
        }
        if let Some(description) = &spec.description {
            self.vm_call("set_name_description", vec![(&vm).into(), description.into()])
                .await?;
        }
        if spec.start {
            self.start(&vm).await?;
        }
        info!("created VM {} ({})", spec.name, vm);
        Ok(vm)
    }

    /// Set static max and both dynamic limits to `bytes`.
    ///
    /// Tries `VM.set_memory_limits` first, then the per-field setters of
    /// older servers. Fails only when every variant failed, with each
    /// variant's error listed in the details.
    pub async fn set_memory(&self, vm: &ObjectRef, bytes: u64) -> XenResult<MemoryStrategy> {
        if bytes == 0 {
            return Err(XenError::invalid_input("memory size must be positive"));
        }
        let record = self.get_record(vm).await?;
        let static_min = record.memory_static_min_bytes().unwrap_or(bytes).min(bytes);
        let growing = record.memory_static_max_bytes().map_or(true, |cur| bytes >= cur);

        let mut failures = Vec::new();

        let limits = vec![
            vm.into(),
            static_min.to_string().into(),
            bytes.to_string().into(),
            bytes.to_string().into(),
            bytes.to_string().into(),
        ];
        match self.vm_call("set_memory_limits", limits).await {
            Ok(_) => return Ok(MemoryStrategy::Limits),
            Err(e) => {
                debug!("set_memory_limits on {} failed: {}", vm, e);
                failures.push(format!("set_memory_limits: {e}"));
            }
        }

        // The static limit must stay above the dynamic ones at every step.
        let setters: [&str; 3] = if growing {
            ["set_memory_static_max", "set_memory_dynamic_max", "set_memory_dynamic_min"]
        } else {
            ["set_memory_dynamic_min", "set_memory_dynamic_max", "set_memory_static_max"]
        };
        let mut legacy = Ok(());
        for setter in setters {
            if let Err(e) = self
                .vm_call(setter, vec![vm.into(), bytes.to_string().into()])
                .await
            {
                legacy = Err(format!("{setter}: {e}"));
                break;
            }
        }
        match legacy {
            Ok(()) => Ok(MemoryStrategy::LegacySetters),
            Err(failure) => {
                failures.push(failure);
                Err(XenError::new(
                    XenErrorKind::RemoteError,
                    format!("could not set memory of {vm} to {bytes} bytes"),
                )
                .with_details(failures))
            }
        }
    }

    /// Hard-stop if needed, destroy the VM, then destroy its disk VDIs.
    pub async fn destroy_vm(&self, key: &str) -> XenResult<DestroyReport> {
        let vm = self.find_vm(key).await?;
        if vm.record.power_state != VmPowerState::Halted {
            info!("hard shutdown of {} before destroy", vm.record.name_label);
            self.vm_call("hard_shutdown", vec![(&vm.reference).into()]).await?;
        }

        let mut disks = Vec::new();
        for vbd in &vm.record.vbds {
            let record: VbdRecord =
                decode_record(self.session.invoke("VBD", "get_record", vec![vbd.into()]).await?)?;
            match record.vdi {
                Some(vdi) if record.vbd_type == "Disk" && !vdi.is_null() => disks.push(vdi),
                _ => {}
            }
        }

        self.vm_call("destroy", vec![(&vm.reference).into()]).await?;
        for vdi in &disks {
            self.session.invoke("VDI", "destroy", vec![vdi.into()]).await?;
        }
        info!(
            "destroyed VM {} and {} disk(s)",
            vm.record.name_label,
            disks.len()
        );
        Ok(DestroyReport {
            vm: vm.reference,
            name_label: vm.record.name_label,
            destroyed_vdis: disks,
        })
    }

    // ── Power ───────────────────────────────────────────────────────

    async fn start(&self, vm: &ObjectRef) -> XenResult<()> {
        // start_paused = false, force = false
        self.vm_call("start", vec![vm.into(), false.into(), false.into()])
            .await?;
        Ok(())
    }

    pub async fn start_vm(&self, key: &str) -> XenResult<ObjectRef> {
        let vm = self.find_vm(key).await?;
        self.start(&vm.reference).await?;
        Ok(vm.reference)
    }

    /// Clean shutdown, or hard power-off when `force` is set.
    pub async fn shutdown_vm(&self, key: &str, force: bool) -> XenResult<ObjectRef> {
        let vm = self.find_vm(key).await?;
        let method = if force { "hard_shutdown" } else { "clean_shutdown" };
        self.vm_call(method, vec![(&vm.reference).into()]).await?;
        Ok(vm.reference)
    }

    // ── Bulk workflows ──────────────────────────────────────────────

    /// Upload an XVA into `sr` (pool default SR when `None`).
    pub async fn import_vm(&self, path: &Path, sr: Option<&str>) -> XenResult<ImportReport> {
        let sr_uuid = match sr {
            Some(key) => Some(StorageManager::new(self.session).find_sr(key).await?.record.uuid),
            None => None,
        };
        let bulk = BulkTransfer::new(self.session);
        let label = format!("xenctl import {}", path.display());

        let run = TaskEngine::new(self.session)
            .run(&label, "", |task| {
                let url = bulk.import_url(&task, sr_uuid.as_deref());
                let bulk = &bulk;
                async move { bulk.upload_file(url, path).await }
            })
            .await?;

        let vms = run.record.result_refs();
        info!("imported {} bytes as {} VM(s)", run.value, vms.len());
        Ok(ImportReport {
            bytes: run.value,
            vms,
        })
    }

    /// Download a VM as XVA to `path`. Returns the bytes written.
    pub async fn export_vm(&self, key: &str, path: &Path) -> XenResult<u64> {
        let vm = self.find_vm(key).await?;
        let bulk = BulkTransfer::new(self.session);
        let label = format!("xenctl export {}", vm.record.name_label);

        let run = TaskEngine::new(self.session)
            .run(&label, "", |task| {
                let url = bulk.export_url(&task, &vm.reference);
                let bulk = &bulk;
                async move { bulk.download_to_file(url, path).await }
            })
            .await?;
        Ok(run.value)
    }

    /// Copy a VM from this session's pool into `destination`'s pool.
    ///
    /// One task per session. Both tasks are polled and destroyed whatever
    /// happened to the stream or the other task, and every failure is
    /// reported in one composite error.
    pub async fn transfer_to(
        &self,
        destination: &Session,
        key: &str,
        sr: Option<&str>,
    ) -> XenResult<TransferReport> {
        let vm = self.find_vm(key).await?;
        let sr_uuid = match sr {
            Some(k) => Some(StorageManager::new(destination).find_sr(k).await?.record.uuid),
            None => None,
        };

        let src_tasks = TaskEngine::new(self.session);
        let dst_tasks = TaskEngine::new(destination);
        let label = format!("xenctl transfer {}", vm.record.name_label);

        let src_task = src_tasks.create(&label, "export").await?;
        let dst_task = match dst_tasks.create(&label, "import").await {
            Ok(task) => task,
            Err(e) => {
                if let Err(cleanup) = src_tasks.destroy(&src_task).await {
                    warn!("could not destroy task {}: {}", src_task, cleanup);
                }
                return Err(e);
            }
        };

        let source_bulk = BulkTransfer::new(self.session);
        let dest_bulk = BulkTransfer::new(destination);
        info!(
            "transferring {} from {} to {}",
            vm.record.name_label,
            self.session.host(),
            destination.host()
        );
        let relayed = relay(
            &source_bulk,
            source_bulk.export_url(&src_task, &vm.reference),
            &dest_bulk,
            dest_bulk.import_url(&dst_task, sr_uuid.as_deref()),
        )
        .await;

        let (src_polled, dst_polled) = tokio::join!(
            src_tasks.poll_until_terminal(&src_task),
            dst_tasks.poll_until_terminal(&dst_task)
        );
        let (src_destroyed, dst_destroyed) =
            tokio::join!(src_tasks.destroy(&src_task), dst_tasks.destroy(&dst_task));

        let mut errors = Vec::new();
        let bytes = relayed.unwrap_or_else(|e| {
            errors.push(e);
            0
        });
        if let Err(e) = src_polled.and_then(|o| settle(&src_task, o)) {
            errors.push(e);
        }
        let vms = match dst_polled.and_then(|o| settle(&dst_task, o)) {
            Ok(record) => record.result_refs(),
            Err(e) => {
                errors.push(e);
                Vec::new()
            }
        };
        errors.extend(src_destroyed.err());
        errors.extend(dst_destroyed.err());

        if !errors.is_empty() {
            return Err(XenError::composite(
                format!("transfer of VM '{}' failed", vm.record.name_label),
                errors,
            ));
        }
        info!("transferred {} bytes, {} VM(s) created", bytes, vms.len());
        Ok(TransferReport { bytes, vms })
    }
}
