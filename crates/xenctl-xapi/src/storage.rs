//! Storage repositories.

use crate::error::XenResult;
use crate::lookup::lookup;
use crate::session::Session;
use crate::types::{decode_records, Remote, SrRecord};

pub struct StorageManager<'a> {
    session: &'a Session,
}

impl<'a> StorageManager<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// All SRs, sorted by reference.
    pub async fn list_srs(&self) -> XenResult<Vec<Remote<SrRecord>>> {
        let value = self.session.invoke("SR", "get_all_records", vec![]).await?;
        decode_records(value)
    }

    /// One SR by name label, uuid or reference.
    pub async fn find_sr(&self, key: &str) -> XenResult<Remote<SrRecord>> {
        lookup(&self.list_srs().await?, key, "SR")
    }
}
