//! Streaming bulk import/export over the pool master's HTTP handlers.
//!
//! Disk images are never held in memory: uploads stream from a file handle,
//! downloads stream into one, and a relay pipes an export response body
//! straight into an import request.

use crate::error::{XenError, XenResult};
use crate::session::Session;
use crate::types::ObjectRef;

use futures::{StreamExt, TryStreamExt};
use log::{debug, info};
use reqwest::{header, Body, Response, StatusCode};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use url::Url;

pub const IMPORT_PATH: &str = "/import";
pub const EXPORT_PATH: &str = "/export";

/// Bulk HTTP operations bound to one session.
pub struct BulkTransfer<'a> {
    session: &'a Session,
}

impl<'a> BulkTransfer<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// `/import?session_id=…&task_id=…[&sr_uuid=…]`
    pub fn import_url(&self, task: &ObjectRef, sr_uuid: Option<&str>) -> Url {
        let mut url = self.base(IMPORT_PATH, task);
        if let Some(sr) = sr_uuid {
            url.query_pairs_mut().append_pair("sr_uuid", sr);
        }
        url
    }

    /// `/export?session_id=…&task_id=…&ref=…`
    pub fn export_url(&self, task: &ObjectRef, vm: &ObjectRef) -> Url {
        let mut url = self.base(EXPORT_PATH, task);
        url.query_pairs_mut().append_pair("ref", vm.as_str());
        url
    }

    fn base(&self, path: &str, task: &ObjectRef) -> Url {
        let mut url = self.session.endpoint().clone();
        url.set_path(path);
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("session_id", self.session.token())
            .append_pair("task_id", task.as_str());
        url
    }

    /// PUT a local file. Returns the number of bytes sent.
    pub async fn upload_file(&self, url: Url, path: &Path) -> XenResult<u64> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| XenError::io(format!("{}: {e}", path.display())))?;
        let len = file.metadata().await?.len();
        debug!("uploading {} ({} bytes) to {}", path.display(), len, url.path());

        let resp = self
            .session
            .bulk_client()
            .put(url)
            .header(header::CONTENT_LENGTH, len)
            .body(Body::from(file))
            .send()
            .await?;
        expect_ok(IMPORT_PATH, resp.status())?;
        info!("uploaded {} bytes from {}", len, path.display());
        Ok(len)
    }

    /// GET an export and return the open response, body not yet read.
    pub async fn open_export(&self, url: Url) -> XenResult<Response> {
        debug!("opening export stream {}", url.path());
        let resp = self.session.bulk_client().get(url).send().await?;
        expect_ok(EXPORT_PATH, resp.status())?;
        Ok(resp)
    }

    /// GET an export into a local file. Returns the number of bytes written.
    pub async fn download_to_file(&self, url: Url, path: &Path) -> XenResult<u64> {
        let resp = self.open_export(url).await?;
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| XenError::io(format!("{}: {e}", path.display())))?;

        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        info!("downloaded {} bytes to {}", written, path.display());
        Ok(written)
    }
}

/// Pipe an export from one pool into an import on another.
///
/// The export body is forwarded chunk by chunk as the import request body,
/// so both connections stay open for the whole copy. Returns the number of
/// bytes relayed.
pub async fn relay(
    source: &BulkTransfer<'_>,
    export: Url,
    destination: &BulkTransfer<'_>,
    import: Url,
) -> XenResult<u64> {
    let resp = source.open_export(export).await?;

    let relayed = Arc::new(AtomicU64::new(0));
    let counter = relayed.clone();
    let stream = resp.bytes_stream().inspect_ok(move |chunk| {
        counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    });

    debug!("relaying export into {}", import.path());
    let put = destination
        .session
        .bulk_client()
        .put(import)
        .body(Body::wrap_stream(stream))
        .send()
        .await?;
    expect_ok(IMPORT_PATH, put.status())?;

    let total = relayed.load(Ordering::Relaxed);
    info!("relayed {} bytes", total);
    Ok(total)
}

/// Bulk handlers signal success with exactly `200 OK`.
fn expect_ok(handler: &str, status: StatusCode) -> XenResult<()> {
    if status == StatusCode::OK {
        return Ok(());
    }
    Err(XenError::transport(format!(
        "{handler} answered HTTP {}",
        status.as_u16()
    ))
    .with_details(vec![status.as_u16().to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::*;

    #[tokio::test]
    async fn urls_carry_session_and_task() {
        let transport = ScriptedTransport::new(with_login(&[], |_| success(true)));
        let session = open_session(transport).await;
        let bulk = BulkTransfer::new(&session);
        let task = ObjectRef::from("OpaqueRef:task-9");

        let import = bulk.import_url(&task, Some("sr-uuid-1"));
        assert_eq!(import.path(), "/import");
        let pairs: Vec<(String, String)> = import.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("session_id".into(), TEST_TOKEN.into()),
                ("task_id".into(), "OpaqueRef:task-9".into()),
                ("sr_uuid".into(), "sr-uuid-1".into()),
            ]
        );

        let export = bulk.export_url(&task, &ObjectRef::from("OpaqueRef:vm-1"));
        assert_eq!(export.path(), "/export");
        assert!(export
            .query_pairs()
            .any(|(k, v)| k == "ref" && v == "OpaqueRef:vm-1"));
        assert!(bulk.import_url(&task, None).query_pairs().all(|(k, _)| k != "sr_uuid"));
    }

    #[test]
    fn only_200_is_success() {
        assert!(expect_ok(IMPORT_PATH, StatusCode::OK).is_ok());
        let err = expect_ok(EXPORT_PATH, StatusCode::INTERNAL_SERVER_ERROR).unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(expect_ok(IMPORT_PATH, StatusCode::NO_CONTENT).is_err());
    }
}
