#![allow(dead_code)]

use std::io::Cursor;

use stasis::{
    restore_graph, save_graph, DecodeOptions, EncodeOptions, PermanentRegistry, Value,
    STREAM_ENDIANNESS_LITTLE, STREAM_MAGIC, STREAM_VERSION_V1,
};
use stasis_heap::{register_builtins, Builtins, Heap, HeapValue, ObjRef, ProtoLibrary};

/// One interpreter instance: heap, registered built-ins and loaded protos.
pub struct World {
    pub heap: Heap,
    pub registry: PermanentRegistry<ObjRef>,
    pub library: ProtoLibrary,
    pub builtins: Builtins,
}

impl World {
    pub fn new() -> Self {
        Self::with_padding(0)
    }

    /// Allocate `padding` unrelated objects first so built-ins land on different handles than
    /// in a world created with another padding.
    pub fn with_padding(padding: usize) -> Self {
        let mut heap = Heap::new();
        for _ in 0..padding {
            heap.new_table();
        }
        let mut registry = PermanentRegistry::new();
        let builtins = register_builtins(&mut heap, &mut registry).unwrap();
        let mut library = ProtoLibrary::new();
        library.define("counter", vec![0x10, 0x20]);
        library.define("greet", vec![0x30]);
        Self {
            heap,
            registry,
            library,
            builtins,
        }
    }

    pub fn try_save(&self, roots: &[HeapValue], options: EncodeOptions) -> stasis::Result<Vec<u8>> {
        let mut out = Vec::new();
        save_graph(
            &mut out,
            &self.heap,
            &self.registry,
            &self.library,
            roots,
            options,
        )?;
        Ok(out)
    }

    pub fn save(&self, roots: &[HeapValue]) -> Vec<u8> {
        self.try_save(roots, EncodeOptions::default()).unwrap()
    }

    pub fn try_load_with(
        &mut self,
        bytes: &[u8],
        options: DecodeOptions,
    ) -> stasis::Result<Vec<HeapValue>> {
        restore_graph(
            &mut Cursor::new(bytes),
            &mut self.heap,
            &self.registry,
            &self.library,
            options,
        )
    }

    pub fn try_load(&mut self, bytes: &[u8]) -> stasis::Result<Vec<HeapValue>> {
        self.try_load_with(bytes, DecodeOptions::default())
    }

    pub fn load(&mut self, bytes: &[u8]) -> Vec<HeapValue> {
        self.try_load(bytes).unwrap()
    }

    pub fn get(&self, table: &HeapValue, key: impl Into<HeapValue>) -> HeapValue {
        self.heap.table_get(obj(table), key).unwrap()
    }
}

pub fn obj(value: &HeapValue) -> ObjRef {
    *value
        .as_object()
        .unwrap_or_else(|| panic!("expected object, got {value:?}"))
}

/// Stream header for hand-built bodies.
pub fn header(roots: u32, flags: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(STREAM_MAGIC);
    out.extend_from_slice(&STREAM_VERSION_V1.to_le_bytes());
    out.push(STREAM_ENDIANNESS_LITTLE);
    out.push(0);
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&roots.to_le_bytes());
    out
}

pub fn string(s: &str) -> HeapValue {
    Value::from(s)
}
