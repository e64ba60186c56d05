use std::collections::BTreeSet;
use std::io::Read;

use crate::error::{PersistError, Result};
use crate::format::ObjectKind;
use crate::record::{CodeRecord, ObjectHeader, Record, RecordReader};

/// Shape of a persisted stream, gathered without a target interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub version: u16,
    pub flags: u32,
    pub roots: u32,
    pub records: u64,
    pub tables: u64,
    pub closures: u64,
    pub upvalues: u64,
    pub userdata: u64,
    pub back_refs: u64,
    pub scalars: u64,
    pub permanents: BTreeSet<String>,
    pub named_code: BTreeSet<String>,
    pub inline_code: u64,
    pub max_depth: usize,
}

impl StreamSummary {
    pub fn objects(&self) -> u64 {
        self.tables + self.closures + self.upvalues + self.userdata
    }
}

/// Walk every record of a stream, checking nesting and root count but resolving nothing.
pub fn inspect_stream<R: Read>(r: R, max_bytes_len: usize) -> Result<StreamSummary> {
    let mut reader = RecordReader::new(r, max_bytes_len)?;
    let header = reader.header();
    let mut summary = StreamSummary {
        version: header.version,
        flags: header.flags,
        roots: header.roots,
        ..StreamSummary::default()
    };

    let mut depth = 0usize;
    let mut roots_seen = 0u32;
    loop {
        let record = reader.next_record()?;
        summary.records += 1;
        let completes_value = match record {
            Record::End => break,
            Record::Nil
            | Record::Boolean(_)
            | Record::Integer(_)
            | Record::Float(_)
            | Record::String(_) => {
                summary.scalars += 1;
                true
            }
            Record::PermanentRef(identifier) => {
                summary.permanents.insert(identifier);
                true
            }
            Record::BackRef(_) => {
                summary.back_refs += 1;
                true
            }
            Record::Object { header, .. } => {
                match header.kind() {
                    ObjectKind::Table => summary.tables += 1,
                    ObjectKind::Closure => summary.closures += 1,
                    ObjectKind::Upvalue => summary.upvalues += 1,
                    ObjectKind::Userdata => summary.userdata += 1,
                }
                if let ObjectHeader::Closure { code, .. } = header {
                    match code {
                        CodeRecord::Named(name) => {
                            summary.named_code.insert(name);
                        }
                        CodeRecord::Inline(_) => summary.inline_code += 1,
                    }
                }
                depth += 1;
                summary.max_depth = summary.max_depth.max(depth);
                false
            }
            Record::Terminator => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(PersistError::Corrupt("terminator outside object"))?;
                true
            }
        };
        if completes_value && depth == 0 {
            roots_seen += 1;
            if roots_seen > header.roots {
                return Err(PersistError::Corrupt("trailing records after last root"));
            }
        }
    }

    if depth != 0 {
        return Err(PersistError::Corrupt("object left unterminated"));
    }
    reader.ensure_exhausted()?;
    if roots_seen != header.roots {
        return Err(PersistError::Corrupt("stream ended before all roots"));
    }
    Ok(summary)
}
