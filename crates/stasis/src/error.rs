use std::io;

use thiserror::Error;

use crate::model::AdapterError;

pub type Result<T> = std::result::Result<T, PersistError>;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    #[error("invalid stream magic")]
    InvalidMagic,

    #[error("unsupported stream version {0}")]
    UnsupportedVersion(u16),

    #[error("invalid endianness tag {0}")]
    InvalidEndianness(u8),

    #[error("corrupt stream: {0}")]
    Corrupt(&'static str),

    #[error("utf-8 decoding failed: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("value of kind `{kind}` cannot be persisted")]
    UnsupportedValue { kind: &'static str },

    #[error("permanent identifier `{0}` is already registered")]
    DuplicateIdentifier(String),

    #[error("object is already registered as permanent `{identifier}`")]
    DuplicateObject { identifier: String },

    #[error("permanent `{0}` is not registered in the target interpreter")]
    UnknownPermanent(String),

    #[error("reference to object #{index} which the stream never produced")]
    DanglingReference { index: u32 },

    #[error("closure code has no registered reference in the code image")]
    UnregisteredCode,

    #[error("code reference `{0}` is unknown to the code image")]
    UnknownCode(String),

    #[error("stream carries inline code but inline code was not allowed")]
    InlineCodeRejected,

    #[error("{what} exceeds limit of {limit}")]
    LimitExceeded { what: &'static str, limit: usize },

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}
