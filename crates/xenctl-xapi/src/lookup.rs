//! Unambiguous lookup of records by name, uuid or reference.

use crate::error::{XenError, XenResult};
use crate::types::{HostRecord, Remote, SrRecord, VmRecord};

/// Records that carry a name label and a uuid.
pub trait Named {
    fn name_label(&self) -> &str;
    fn uuid(&self) -> &str;
}

impl Named for VmRecord {
    fn name_label(&self) -> &str {
        &self.name_label
    }
    fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl Named for SrRecord {
    fn name_label(&self) -> &str {
        &self.name_label
    }
    fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl Named for HostRecord {
    fn name_label(&self) -> &str {
        &self.name_label
    }
    fn uuid(&self) -> &str {
        &self.uuid
    }
}

/// Find exactly one record whose name label, uuid or reference equals `key`.
///
/// Zero or several matches are both errors; an ambiguous lookup lists every
/// candidate as `name (uuid)`.
pub fn lookup<T: Named + Clone>(records: &[Remote<T>], key: &str, kind: &str) -> XenResult<Remote<T>> {
    let key = key.trim();
    if key.is_empty() {
        return Err(XenError::invalid_input(format!("empty {kind} name")));
    }

    let mut matches: Vec<&Remote<T>> = records
        .iter()
        .filter(|r| {
            r.record.name_label() == key || r.record.uuid() == key || r.reference.as_str() == key
        })
        .collect();
    matches.sort_by(|a, b| a.reference.cmp(&b.reference));

    match matches.as_slice() {
        [] => Err(XenError::lookup(format!("no {kind} named '{key}'"), Vec::new())),
        [one] => Ok((*one).clone()),
        many => Err(XenError::lookup(
            format!("{} {kind}s match '{key}'", many.len()),
            many.iter()
                .map(|r| format!("{} ({})", r.record.name_label(), r.record.uuid()))
                .collect(),
        )),
    }
}
