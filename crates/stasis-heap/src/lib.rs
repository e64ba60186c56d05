//! Reference interpreter heap for the `stasis` persistence core.
//!
//! The heap is a plain arena of tables, closures, upvalue cells, userdata, native functions and
//! OS resources, with just enough behaviour to build graphs, persist them and compare the result.

mod builtins;
mod equality;
mod heap;
mod model;
mod proto;

pub use crate::builtins::{register_builtins, Builtins};
pub use crate::equality::structurally_equal;
pub use crate::heap::{Closure, Heap, HeapValue, ObjRef, Object, Table, Userdata};
pub use crate::proto::{Proto, ProtoLibrary};
