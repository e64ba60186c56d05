use std::fmt;
use std::hash::Hash;

use thiserror::Error;

use crate::value::{Kind, Value};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0} objects are not supported by this interpreter build")]
    UnsupportedKind(&'static str),

    #[error("handle does not name a live {expected}")]
    InvalidHandle { expected: &'static str },

    #[error("{0}")]
    Rejected(String),
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Read-only view of a live interpreter's value graph.
///
/// Implementations must not mutate the interpreter while an encode is walking it; entry
/// iterators are not expected to survive interleaved mutation.
pub trait ValueModel {
    /// Identity handle of a heap object. `Eq`/`Hash` must compare identity, not contents.
    type Handle: Clone + Eq + Hash + fmt::Debug;
    /// Executable code referenced by closures, resolved through a [`CodeImage`].
    type Code;

    /// Whether [`ValueModel::table_entries`] yields entries in a stable insertion order. When it
    /// does not, the encoder sorts entries to keep output byte-reproducible.
    const ORDERED_TABLES: bool = false;

    fn object_kind(&self, object: &Self::Handle) -> Kind;

    fn classify(&self, value: &Value<Self::Handle>) -> Kind {
        match value {
            Value::Object(h) => self.object_kind(h),
            scalar => scalar.scalar_kind().unwrap_or(Kind::Nil),
        }
    }

    fn table_entries(
        &self,
        table: &Self::Handle,
    ) -> AdapterResult<impl Iterator<Item = (Value<Self::Handle>, Value<Self::Handle>)> + '_>;

    /// Metatable of a table or userdata, if any.
    fn metatable(&self, object: &Self::Handle) -> AdapterResult<Option<Value<Self::Handle>>>;

    fn closure_code(&self, closure: &Self::Handle) -> AdapterResult<Self::Code>;

    /// Captured upvalue cells in capture order.
    fn closure_upvalues(&self, closure: &Self::Handle) -> AdapterResult<Vec<Value<Self::Handle>>>;

    fn upvalue_get(&self, cell: &Self::Handle) -> AdapterResult<Value<Self::Handle>>;

    /// Literal bytes of a userdata block. Hosts without a persistence hook for some userdata
    /// flavour return [`AdapterError::UnsupportedKind`].
    fn userdata_payload(&self, userdata: &Self::Handle) -> AdapterResult<Vec<u8>>;
}

/// Construction side of the adapter, used while decoding into a target interpreter.
///
/// Every constructor must accept placeholder arguments (`Nil` upvalues, empty tables) and allow
/// the real values to be written in later.
pub trait ValueBuilder: ValueModel {
    fn make_table(&mut self) -> AdapterResult<Self::Handle>;

    fn set_table_entry(
        &mut self,
        table: &Self::Handle,
        key: Value<Self::Handle>,
        value: Value<Self::Handle>,
    ) -> AdapterResult<()>;

    fn set_metatable(
        &mut self,
        object: &Self::Handle,
        metatable: Value<Self::Handle>,
    ) -> AdapterResult<()>;

    fn make_closure(
        &mut self,
        code: Self::Code,
        upvalues: Vec<Value<Self::Handle>>,
    ) -> AdapterResult<Self::Handle>;

    fn set_closure_upvalue(
        &mut self,
        closure: &Self::Handle,
        slot: usize,
        value: Value<Self::Handle>,
    ) -> AdapterResult<()>;

    fn make_upvalue(&mut self, value: Value<Self::Handle>) -> AdapterResult<Self::Handle>;

    fn set_upvalue(&mut self, cell: &Self::Handle, value: Value<Self::Handle>) -> AdapterResult<()>;

    fn make_userdata(&mut self, payload: Vec<u8>) -> AdapterResult<Self::Handle>;
}

/// Host lookup between executable code and the stable names it is persisted under.
pub trait CodeImage<C> {
    fn code_ref_of(&self, code: &C) -> Option<String>;

    fn resolve_code(&self, name: &str) -> Option<C>;

    /// Serialized form of `code` for hosts that opt into inlining.
    fn dump_code(&self, _code: &C) -> Option<Vec<u8>> {
        None
    }

    fn load_code(&self, _bytes: &[u8]) -> Option<C> {
        None
    }
}

/// Code image for hosts whose graphs never contain closures.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCodeImage;

impl<C> CodeImage<C> for NoCodeImage {
    fn code_ref_of(&self, _code: &C) -> Option<String> {
        None
    }

    fn resolve_code(&self, _name: &str) -> Option<C> {
        None
    }
}
