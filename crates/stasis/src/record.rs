use std::io::{self, Read, Write};

use crate::error::{PersistError, Result};
use crate::format::{
    CodeForm, ObjectKind, Tag, STREAM_ENDIANNESS_LITTLE, STREAM_MAGIC, STREAM_VERSION_V1,
};
use crate::io::{ReadLeExt, WriteLeExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u16,
    pub flags: u32,
    pub roots: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeRecord {
    Named(String),
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectHeader {
    Table,
    Closure { code: CodeRecord, upvalues: u32 },
    Upvalue,
    Userdata { payload: Vec<u8> },
}

impl ObjectHeader {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectHeader::Table => ObjectKind::Table,
            ObjectHeader::Closure { .. } => ObjectKind::Closure,
            ObjectHeader::Upvalue => ObjectKind::Upvalue,
            ObjectHeader::Userdata { .. } => ObjectKind::Userdata,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
    PermanentRef(String),
    BackRef(u32),
    Object { index: u32, header: ObjectHeader },
    Terminator,
    End,
}

pub(crate) fn write_stream_header<W: Write>(w: &mut W, flags: u32, roots: u32) -> Result<()> {
    w.write_bytes(STREAM_MAGIC)?;
    w.write_u16_le(STREAM_VERSION_V1)?;
    w.write_u8(STREAM_ENDIANNESS_LITTLE)?;
    w.write_u8(0)?; // reserved
    w.write_u32_le(flags)?;
    w.write_u32_le(roots)?;
    Ok(())
}

fn read_stream_header<R: Read>(r: &mut R) -> Result<StreamHeader> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != STREAM_MAGIC {
        return Err(PersistError::InvalidMagic);
    }
    let version = r.read_u16_le()?;
    if version != STREAM_VERSION_V1 {
        return Err(PersistError::UnsupportedVersion(version));
    }
    let endianness = r.read_u8()?;
    if endianness != STREAM_ENDIANNESS_LITTLE {
        return Err(PersistError::InvalidEndianness(endianness));
    }
    let _reserved = r.read_u8()?;
    let flags = r.read_u32_le()?;
    let roots = r.read_u32_le()?;
    Ok(StreamHeader {
        version,
        flags,
        roots,
    })
}

/// Pulls records off a stream one at a time, without interpreting references.
pub struct RecordReader<R> {
    inner: R,
    header: StreamHeader,
    max_bytes_len: usize,
    finished: bool,
}

impl<R: Read> RecordReader<R> {
    /// Validate the stream header and position the reader at the first record.
    pub fn new(mut inner: R, max_bytes_len: usize) -> Result<Self> {
        let header = read_stream_header(&mut inner)?;
        Ok(Self {
            inner,
            header,
            max_bytes_len,
            finished: false,
        })
    }

    pub fn header(&self) -> StreamHeader {
        self.header
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fail unless the underlying reader is at EOF. Call after `End`; a stream is never followed by
    /// other data.
    pub fn ensure_exhausted(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(()),
                Ok(_) => return Err(PersistError::Corrupt("trailing bytes after end marker")),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn next_record(&mut self) -> Result<Record> {
        if self.finished {
            return Err(PersistError::Corrupt("record read past end marker"));
        }
        let r = &mut self.inner;
        let record = match Tag(r.read_u8()?) {
            Tag::NIL => Record::Nil,
            Tag::BOOLEAN => match r.read_u8()? {
                0 => Record::Boolean(false),
                1 => Record::Boolean(true),
                _ => return Err(PersistError::Corrupt("invalid boolean byte")),
            },
            Tag::INTEGER => Record::Integer(r.read_i64_le()?),
            Tag::FLOAT => Record::Float(r.read_f64_le()?),
            Tag::STRING => Record::String(r.read_len_prefixed_bytes_u32(self.max_bytes_len)?),
            Tag::PERMANENT_REF => Record::PermanentRef(r.read_string_u32(self.max_bytes_len)?),
            Tag::BACK_REF => Record::BackRef(r.read_u32_le()?),
            Tag::OBJECT => {
                let index = r.read_u32_le()?;
                let kind = ObjectKind::from_u8(r.read_u8()?)
                    .ok_or(PersistError::Corrupt("invalid object kind"))?;
                let header = match kind {
                    ObjectKind::Table => ObjectHeader::Table,
                    ObjectKind::Upvalue => ObjectHeader::Upvalue,
                    ObjectKind::Closure => {
                        let form = CodeForm::from_u8(r.read_u8()?)
                            .ok_or(PersistError::Corrupt("invalid code form"))?;
                        let code = match form {
                            CodeForm::Named => {
                                CodeRecord::Named(r.read_string_u32(self.max_bytes_len)?)
                            }
                            CodeForm::Inline => CodeRecord::Inline(
                                r.read_len_prefixed_bytes_u32(self.max_bytes_len)?,
                            ),
                        };
                        let upvalues = r.read_u32_le()?;
                        ObjectHeader::Closure { code, upvalues }
                    }
                    ObjectKind::Userdata => ObjectHeader::Userdata {
                        payload: r.read_len_prefixed_bytes_u32(self.max_bytes_len)?,
                    },
                };
                Record::Object { index, header }
            }
            Tag::TERMINATOR => Record::Terminator,
            Tag::END => {
                self.finished = true;
                Record::End
            }
            _ => return Err(PersistError::Corrupt("unknown record tag")),
        };
        Ok(record)
    }
}
