use std::rc::Rc;

use stasis::{AdapterError, AdapterResult, Kind, Value, ValueBuilder, ValueModel};

use crate::heap::{Closure, Heap, HeapValue, Object, ObjRef, Userdata};
use crate::proto::Proto;

impl ValueModel for Heap {
    type Handle = ObjRef;
    type Code = Rc<Proto>;

    const ORDERED_TABLES: bool = true;

    fn object_kind(&self, object: &ObjRef) -> Kind {
        match self.get(*object) {
            Some(Object::Table(_)) => Kind::Table,
            Some(Object::Closure(_)) => Kind::Closure,
            Some(Object::Upvalue(_)) => Kind::Upvalue,
            Some(Object::Userdata(_)) => Kind::Userdata,
            Some(Object::Native(_)) => Kind::Permanent,
            Some(Object::Resource(_)) => Kind::Unsupported("os resource"),
            None => Kind::Unsupported("dangling handle"),
        }
    }

    fn table_entries(
        &self,
        table: &ObjRef,
    ) -> AdapterResult<impl Iterator<Item = (HeapValue, HeapValue)> + '_> {
        Ok(self.table(*table)?.entries().iter().cloned())
    }

    fn metatable(&self, object: &ObjRef) -> AdapterResult<Option<HeapValue>> {
        Ok(self.metatable_of(*object)?.map(Value::Object))
    }

    fn closure_code(&self, closure: &ObjRef) -> AdapterResult<Rc<Proto>> {
        Ok(Rc::clone(&self.closure(*closure)?.proto))
    }

    fn closure_upvalues(&self, closure: &ObjRef) -> AdapterResult<Vec<HeapValue>> {
        Ok(self.closure(*closure)?.upvalues.clone())
    }

    fn upvalue_get(&self, cell: &ObjRef) -> AdapterResult<HeapValue> {
        Ok(self.upvalue(*cell)?.clone())
    }

    fn userdata_payload(&self, userdata: &ObjRef) -> AdapterResult<Vec<u8>> {
        let userdata = self.userdata(*userdata)?;
        if userdata.light {
            return Err(AdapterError::UnsupportedKind("light userdata"));
        }
        Ok(userdata.payload.clone())
    }
}

impl ValueBuilder for Heap {
    fn make_table(&mut self) -> AdapterResult<ObjRef> {
        Ok(self.new_table())
    }

    fn set_table_entry(&mut self, table: &ObjRef, key: HeapValue, value: HeapValue) -> AdapterResult<()> {
        self.table_set(*table, key, value)
    }

    fn set_metatable(&mut self, object: &ObjRef, metatable: HeapValue) -> AdapterResult<()> {
        match metatable {
            Value::Nil => self.attach_metatable(*object, None),
            Value::Object(mt) => self.attach_metatable(*object, Some(mt)),
            _ => Err(AdapterError::Rejected("metatable must be a table".to_string())),
        }
    }

    fn make_closure(&mut self, code: Rc<Proto>, upvalues: Vec<HeapValue>) -> AdapterResult<ObjRef> {
        Ok(self.alloc(Object::Closure(Closure {
            proto: code,
            upvalues,
        })))
    }

    fn set_closure_upvalue(&mut self, closure: &ObjRef, slot: usize, value: HeapValue) -> AdapterResult<()> {
        if let Some(cell) = value.as_object() {
            self.upvalue(*cell)?;
        }
        let closure = self.closure_mut(*closure)?;
        let target = closure
            .upvalues
            .get_mut(slot)
            .ok_or(AdapterError::Rejected(format!("closure has no upvalue slot {slot}")))?;
        *target = value;
        Ok(())
    }

    fn make_upvalue(&mut self, value: HeapValue) -> AdapterResult<ObjRef> {
        Ok(self.new_upvalue(value))
    }

    fn set_upvalue(&mut self, cell: &ObjRef, value: HeapValue) -> AdapterResult<()> {
        self.set_upvalue_value(*cell, value)
    }

    fn make_userdata(&mut self, payload: Vec<u8>) -> AdapterResult<ObjRef> {
        Ok(self.alloc(Object::Userdata(Userdata {
            payload,
            ..Userdata::default()
        })))
    }
}
