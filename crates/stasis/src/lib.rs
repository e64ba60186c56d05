//! Persistence for a live interpreter's value graph.
//!
//! A graph of tables, closures, upvalue cells, userdata and scalars is written depth-first as a
//! tagged stream. Shared objects and cycles become back-references; host built-ins registered in
//! a [`PermanentRegistry`] are written by name and re-resolved against the target interpreter on
//! load.

mod decoder;
mod encoder;
mod error;
mod format;
mod identity;
mod inspect;
mod io;
mod model;
mod record;
mod registry;
mod value;

pub use crate::decoder::{DecodeOptions, Decoder};
pub use crate::encoder::{EncodeOptions, EncodeStats, Encoder, KeyOrder};
pub use crate::error::{PersistError, Result};
pub use crate::format::{
    CodeForm, ObjectKind, Tag, FLAG_INLINE_CODE, STREAM_ENDIANNESS_LITTLE, STREAM_MAGIC,
    STREAM_VERSION_V1,
};
pub use crate::identity::{Operand, PatchSite, ReadIdentityTable, WriteIdentityTable};
pub use crate::inspect::{inspect_stream, StreamSummary};
pub use crate::model::{
    AdapterError, AdapterResult, CodeImage, NoCodeImage, ValueBuilder, ValueModel,
};
pub use crate::record::{CodeRecord, ObjectHeader, Record, RecordReader, StreamHeader};
pub use crate::registry::PermanentRegistry;
pub use crate::value::{Kind, Value};

use std::io::{Read, Write};

/// Persist `roots` and everything reachable from them.
pub fn save_graph<W, M, C>(
    w: &mut W,
    model: &M,
    registry: &PermanentRegistry<M::Handle>,
    code: &C,
    roots: &[Value<M::Handle>],
    options: EncodeOptions,
) -> Result<EncodeStats>
where
    W: Write,
    M: ValueModel,
    C: CodeImage<M::Code>,
{
    Encoder::new(model, registry, code)
        .with_options(options)
        .encode(w, roots)
}

/// Rebuild the roots of a persisted stream inside `model`.
///
/// On error the target interpreter holds a partially built graph and must be discarded.
pub fn restore_graph<R, M, C>(
    r: &mut R,
    model: &mut M,
    registry: &PermanentRegistry<M::Handle>,
    code: &C,
    options: DecodeOptions,
) -> Result<Vec<Value<M::Handle>>>
where
    R: Read,
    M: ValueBuilder,
    C: CodeImage<M::Code>,
{
    Decoder::new(model, registry, code)
        .with_options(options)
        .decode(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    /// Builder that accepts every construction and never produces real objects.
    #[derive(Default)]
    struct NullHeap {
        next: u32,
    }

    impl NullHeap {
        fn fresh(&mut self) -> AdapterResult<u32> {
            self.next += 1;
            Ok(self.next)
        }
    }

    impl ValueModel for NullHeap {
        type Handle = u32;
        type Code = ();

        fn object_kind(&self, _object: &u32) -> Kind {
            Kind::Table
        }

        fn table_entries(
            &self,
            _table: &u32,
        ) -> AdapterResult<impl Iterator<Item = (Value<u32>, Value<u32>)> + '_> {
            Ok(std::iter::empty())
        }

        fn metatable(&self, _object: &u32) -> AdapterResult<Option<Value<u32>>> {
            Ok(None)
        }

        fn closure_code(&self, _closure: &u32) -> AdapterResult<()> {
            Ok(())
        }

        fn closure_upvalues(&self, _closure: &u32) -> AdapterResult<Vec<Value<u32>>> {
            Ok(Vec::new())
        }

        fn upvalue_get(&self, _cell: &u32) -> AdapterResult<Value<u32>> {
            Ok(Value::Nil)
        }

        fn userdata_payload(&self, _userdata: &u32) -> AdapterResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    impl ValueBuilder for NullHeap {
        fn make_table(&mut self) -> AdapterResult<u32> {
            self.fresh()
        }

        fn set_table_entry(&mut self, _t: &u32, _k: Value<u32>, _v: Value<u32>) -> AdapterResult<()> {
            Ok(())
        }

        fn set_metatable(&mut self, _o: &u32, _m: Value<u32>) -> AdapterResult<()> {
            Ok(())
        }

        fn make_closure(&mut self, _code: (), _upvalues: Vec<Value<u32>>) -> AdapterResult<u32> {
            self.fresh()
        }

        fn set_closure_upvalue(&mut self, _c: &u32, _slot: usize, _v: Value<u32>) -> AdapterResult<()> {
            Ok(())
        }

        fn make_upvalue(&mut self, _v: Value<u32>) -> AdapterResult<u32> {
            self.fresh()
        }

        fn set_upvalue(&mut self, _c: &u32, _v: Value<u32>) -> AdapterResult<()> {
            Ok(())
        }

        fn make_userdata(&mut self, _payload: Vec<u8>) -> AdapterResult<u32> {
            self.fresh()
        }
    }

    struct AnyCode;

    impl CodeImage<()> for AnyCode {
        fn code_ref_of(&self, _code: &()) -> Option<String> {
            Some("main".to_string())
        }

        fn resolve_code(&self, _name: &str) -> Option<()> {
            Some(())
        }

        fn load_code(&self, _bytes: &[u8]) -> Option<()> {
            Some(())
        }
    }

    proptest! {
        // "Fuzz" the decoder. This is not a replacement for coverage-guided fuzzing, but it does
        // guard against panics on corrupted/truncated inputs.
        #[test]
        fn decoder_never_panics(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let mut heap = NullHeap::default();
            let registry = PermanentRegistry::new();
            let options = DecodeOptions {
                max_objects: 4096,
                max_bytes_len: 4096,
                max_depth: 256,
                allow_inline_code: true,
            };
            let _ = restore_graph(&mut std::io::Cursor::new(&data), &mut heap, &registry, &AnyCode, options);
            let _ = inspect_stream(std::io::Cursor::new(&data), 4096);
        }

        #[test]
        fn decoder_never_panics_after_valid_header(body in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let mut data = Vec::new();
            crate::record::write_stream_header(&mut data, 0, 2).unwrap();
            data.extend_from_slice(&body);

            let mut heap = NullHeap::default();
            let registry = PermanentRegistry::new();
            let options = DecodeOptions {
                max_objects: 4096,
                max_bytes_len: 4096,
                max_depth: 256,
                allow_inline_code: true,
            };
            let _ = restore_graph(&mut std::io::Cursor::new(&data), &mut heap, &registry, &AnyCode, options);
        }
    }
}
