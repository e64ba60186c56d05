use stasis::PermanentRegistry;
use tracing::debug;

use crate::heap::{Heap, ObjRef};

/// Handles of the built-ins installed by [`register_builtins`].
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    pub print: ObjRef,
    pub tostring: ObjRef,
    pub string_lib: ObjRef,
}

const STRING_FUNCTIONS: &[&str] = &["len", "sub", "upper"];

/// Allocate the standard built-ins in `heap` and register each under its stable identifier.
///
/// Every interpreter that reads or writes persisted state must call this before encoding or
/// decoding, so both sides agree on the identifiers.
pub fn register_builtins(
    heap: &mut Heap,
    registry: &mut PermanentRegistry<ObjRef>,
) -> stasis::Result<Builtins> {
    let print = heap.new_native("print");
    registry.register("print", print)?;

    let tostring = heap.new_native("tostring");
    registry.register("tostring", tostring)?;

    let string_lib = heap.new_table();
    for name in STRING_FUNCTIONS {
        let f = heap.new_native(format!("string.{name}"));
        heap.table_set(string_lib, *name, stasis::Value::Object(f))?;
        registry.register(format!("string.{name}"), f)?;
    }
    registry.register("string", string_lib)?;

    debug!(permanents = registry.len(), "registered builtins");
    Ok(Builtins {
        print,
        tostring,
        string_lib,
    })
}
