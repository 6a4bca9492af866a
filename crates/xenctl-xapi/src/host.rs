//! Pool hosts and their memory metrics.

use crate::error::XenResult;
use crate::lookup::lookup;
use crate::session::Session;
use crate::types::*;

use log::debug;

pub struct HostManager<'a> {
    session: &'a Session,
}

impl<'a> HostManager<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub async fn list_hosts(&self) -> XenResult<Vec<Remote<HostRecord>>> {
        let value = self.session.invoke("host", "get_all_records", vec![]).await?;
        decode_records(value)
    }

    pub async fn find_host(&self, key: &str) -> XenResult<Remote<HostRecord>> {
        lookup(&self.list_hosts().await?, key, "host")
    }

    pub async fn metrics_record(&self, metrics: &ObjectRef) -> XenResult<HostMetricsRecord> {
        let value = self
            .session
            .invoke("host_metrics", "get_record", vec![metrics.into()])
            .await?;
        decode_record(value)
    }

    /// Memory total/free for every host. Hosts without a metrics object
    /// are reported as not live with zero memory.
    pub async fn host_metrics(&self) -> XenResult<Vec<HostMemory>> {
        let mut out = Vec::new();
        for host in self.list_hosts().await? {
            let mut memory = HostMemory {
                host: host.reference.clone(),
                name_label: host.record.name_label.clone(),
                address: host.record.address.clone(),
                live: false,
                memory_total: 0,
                memory_free: 0,
            };
            match host.record.metrics.as_ref().filter(|m| !m.is_null()) {
                Some(metrics) => {
                    let record = self.metrics_record(metrics).await?;
                    memory.live = record.live;
                    memory.memory_total = parse_int64("memory_total", &record.memory_total)?;
                    memory.memory_free = parse_int64("memory_free", &record.memory_free)?;
                }
                None => debug!("host {} has no metrics object", host.reference),
            }
            out.push(memory);
        }
        Ok(out)
    }
}
