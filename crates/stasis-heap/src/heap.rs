use std::fmt;
use std::rc::Rc;

use stasis::{AdapterError, AdapterResult, Value};

use crate::proto::Proto;

pub type HeapValue = Value<ObjRef>;

/// Handle to an object in a [`Heap`]. Equal handles are the same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(usize);

impl ObjRef {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Insertion-ordered table. Assigning `nil` removes the key.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<(HeapValue, HeapValue)>,
    metatable: Option<ObjRef>,
}

impl Table {
    pub fn get(&self, key: &HeapValue) -> HeapValue {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Nil)
    }

    fn set(&mut self, key: HeapValue, value: HeapValue) -> AdapterResult<()> {
        match &key {
            Value::Nil => return Err(AdapterError::Rejected("table key is nil".to_string())),
            Value::Float(f) if f.is_nan() => {
                return Err(AdapterError::Rejected("table key is NaN".to_string()))
            }
            _ => {}
        }
        let existing = self.entries.iter().position(|(k, _)| *k == key);
        match (existing, value.is_nil()) {
            (Some(pos), true) => {
                self.entries.remove(pos);
            }
            (Some(pos), false) => self.entries[pos].1 = value,
            (None, true) => {}
            (None, false) => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(HeapValue, HeapValue)] {
        &self.entries
    }

    pub fn metatable(&self) -> Option<ObjRef> {
        self.metatable
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub proto: Rc<Proto>,
    /// Upvalue cells (`Object::Upvalue`) in capture order.
    pub upvalues: Vec<HeapValue>,
}

#[derive(Debug, Clone, Default)]
pub struct Userdata {
    pub payload: Vec<u8>,
    pub metatable: Option<ObjRef>,
    /// Light userdata wraps a raw host pointer and has no persistence hook.
    pub light: bool,
}

#[derive(Debug, Clone)]
pub enum Object {
    Table(Table),
    Closure(Closure),
    Upvalue(HeapValue),
    Userdata(Userdata),
    /// Host function; only persistable when registered as permanent.
    Native(String),
    /// Open OS resource (file, socket); never persistable.
    Resource(String),
}

/// Arena of interpreter objects. Objects are never freed; a fresh heap stands in for a fresh
/// interpreter instance.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn alloc(&mut self, object: Object) -> ObjRef {
        let handle = ObjRef(self.objects.len());
        self.objects.push(object);
        handle
    }

    pub fn get(&self, handle: ObjRef) -> Option<&Object> {
        self.objects.get(handle.index())
    }

    pub fn new_table(&mut self) -> ObjRef {
        self.alloc(Object::Table(Table::default()))
    }

    pub fn new_upvalue(&mut self, value: HeapValue) -> ObjRef {
        self.alloc(Object::Upvalue(value))
    }

    /// Closure over the given upvalue cells.
    pub fn new_closure(&mut self, proto: Rc<Proto>, cells: &[ObjRef]) -> ObjRef {
        let upvalues = cells.iter().copied().map(Value::Object).collect();
        self.alloc(Object::Closure(Closure { proto, upvalues }))
    }

    pub fn new_userdata(&mut self, payload: impl Into<Vec<u8>>) -> ObjRef {
        self.alloc(Object::Userdata(Userdata {
            payload: payload.into(),
            ..Userdata::default()
        }))
    }

    pub fn new_light_userdata(&mut self) -> ObjRef {
        self.alloc(Object::Userdata(Userdata {
            light: true,
            ..Userdata::default()
        }))
    }

    pub fn new_native(&mut self, name: impl Into<String>) -> ObjRef {
        self.alloc(Object::Native(name.into()))
    }

    pub fn new_resource(&mut self, description: impl Into<String>) -> ObjRef {
        self.alloc(Object::Resource(description.into()))
    }

    pub fn table(&self, handle: ObjRef) -> AdapterResult<&Table> {
        match self.get(handle) {
            Some(Object::Table(t)) => Ok(t),
            _ => Err(AdapterError::InvalidHandle { expected: "table" }),
        }
    }

    fn table_mut(&mut self, handle: ObjRef) -> AdapterResult<&mut Table> {
        match self.objects.get_mut(handle.index()) {
            Some(Object::Table(t)) => Ok(t),
            _ => Err(AdapterError::InvalidHandle { expected: "table" }),
        }
    }

    pub fn closure(&self, handle: ObjRef) -> AdapterResult<&Closure> {
        match self.get(handle) {
            Some(Object::Closure(c)) => Ok(c),
            _ => Err(AdapterError::InvalidHandle { expected: "closure" }),
        }
    }

    pub(crate) fn closure_mut(&mut self, handle: ObjRef) -> AdapterResult<&mut Closure> {
        match self.objects.get_mut(handle.index()) {
            Some(Object::Closure(c)) => Ok(c),
            _ => Err(AdapterError::InvalidHandle { expected: "closure" }),
        }
    }

    pub fn userdata(&self, handle: ObjRef) -> AdapterResult<&Userdata> {
        match self.get(handle) {
            Some(Object::Userdata(u)) => Ok(u),
            _ => Err(AdapterError::InvalidHandle {
                expected: "userdata",
            }),
        }
    }

    pub fn table_get(&self, table: ObjRef, key: impl Into<HeapValue>) -> AdapterResult<HeapValue> {
        Ok(self.table(table)?.get(&key.into()))
    }

    pub fn table_set(
        &mut self,
        table: ObjRef,
        key: impl Into<HeapValue>,
        value: impl Into<HeapValue>,
    ) -> AdapterResult<()> {
        self.table_mut(table)?.set(key.into(), value.into())
    }

    /// Assign a table (or nothing) as the metatable of a table or userdata.
    pub fn attach_metatable(&mut self, object: ObjRef, metatable: Option<ObjRef>) -> AdapterResult<()> {
        if let Some(mt) = metatable {
            self.table(mt)?;
        }
        match self.objects.get_mut(object.index()) {
            Some(Object::Table(t)) => t.metatable = metatable,
            Some(Object::Userdata(u)) => u.metatable = metatable,
            _ => {
                return Err(AdapterError::InvalidHandle {
                    expected: "table or userdata",
                })
            }
        }
        Ok(())
    }

    pub fn metatable_of(&self, object: ObjRef) -> AdapterResult<Option<ObjRef>> {
        match self.get(object) {
            Some(Object::Table(t)) => Ok(t.metatable),
            Some(Object::Userdata(u)) => Ok(u.metatable),
            _ => Err(AdapterError::InvalidHandle {
                expected: "table or userdata",
            }),
        }
    }

    pub fn upvalue(&self, cell: ObjRef) -> AdapterResult<&HeapValue> {
        match self.get(cell) {
            Some(Object::Upvalue(v)) => Ok(v),
            _ => Err(AdapterError::InvalidHandle { expected: "upvalue" }),
        }
    }

    pub fn set_upvalue_value(&mut self, cell: ObjRef, value: HeapValue) -> AdapterResult<()> {
        match self.objects.get_mut(cell.index()) {
            Some(Object::Upvalue(v)) => {
                *v = value;
                Ok(())
            }
            _ => Err(AdapterError::InvalidHandle { expected: "upvalue" }),
        }
    }

    /// Value currently held by the `slot`-th captured variable of a closure.
    pub fn closure_upvalue_value(&self, closure: ObjRef, slot: usize) -> AdapterResult<HeapValue> {
        let cell = self
            .closure(closure)?
            .upvalues
            .get(slot)
            .and_then(|v| v.as_object().copied())
            .ok_or(AdapterError::InvalidHandle { expected: "upvalue" })?;
        Ok(self.upvalue(cell)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_keeps_insertion_order_and_nil_deletes() {
        let mut heap = Heap::new();
        let t = heap.new_table();
        heap.table_set(t, "b", 2i64).unwrap();
        heap.table_set(t, "a", 1i64).unwrap();
        heap.table_set(t, "b", 3i64).unwrap();
        heap.table_set(t, 7i64, true).unwrap();

        let keys: Vec<_> = heap.table(t).unwrap().entries().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Value::from("b"), Value::from("a"), Value::Integer(7)]);
        assert_eq!(heap.table_get(t, "b").unwrap(), Value::Integer(3));

        heap.table_set(t, "a", Value::Nil).unwrap();
        assert_eq!(heap.table(t).unwrap().len(), 2);
        assert_eq!(heap.table_get(t, "a").unwrap(), Value::Nil);
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let mut heap = Heap::new();
        let t = heap.new_table();
        assert!(heap.table_set(t, Value::Nil, 1i64).is_err());
        assert!(heap.table_set(t, f64::NAN, 1i64).is_err());
    }

    #[test]
    fn metatable_must_be_a_table() {
        let mut heap = Heap::new();
        let t = heap.new_table();
        let u = heap.new_userdata(vec![1, 2, 3]);
        let f = heap.new_native("print");
        heap.attach_metatable(u, Some(t)).unwrap();
        assert_eq!(heap.metatable_of(u).unwrap(), Some(t));
        assert!(heap.attach_metatable(t, Some(f)).is_err());
        assert!(heap.attach_metatable(f, Some(t)).is_err());
    }

    #[test]
    fn accessors_reject_wrong_kinds() {
        let mut heap = Heap::new();
        let t = heap.new_table();
        assert!(matches!(
            heap.closure(t),
            Err(AdapterError::InvalidHandle { expected: "closure" })
        ));
        assert!(heap.upvalue(ObjRef(99)).is_err());
    }

    #[test]
    fn handles_are_arena_positions() {
        let mut heap = Heap::new();
        let handles: Vec<_> = (0..300).map(|_| heap.new_table()).collect();
        for (pos, handle) in handles.iter().enumerate() {
            assert_eq!(handle.index(), pos);
            assert!(heap.table(*handle).is_ok());
        }
        assert_eq!(handles[257].to_string(), "obj#257");
        assert_eq!(heap.len(), 300);
    }
}
