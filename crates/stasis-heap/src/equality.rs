use std::collections::HashMap;

use stasis::Value;

use crate::heap::{Heap, HeapValue, Object, ObjRef};

/// Whether two values in (possibly different) heaps describe the same graph.
///
/// Objects are matched one-to-one, so sharing and cycles must have the same shape on both
/// sides. Tables compare entry by entry in insertion order; natives and resources compare by
/// name, closures by proto contents.
pub fn structurally_equal(a_heap: &Heap, a: &HeapValue, b_heap: &Heap, b: &HeapValue) -> bool {
    let mut matcher = Matcher {
        a_heap,
        b_heap,
        forward: HashMap::new(),
        backward: HashMap::new(),
        work: Vec::new(),
    };
    if !matcher.pair(a, b) {
        return false;
    }
    while let Some((x, y)) = matcher.work.pop() {
        if !matcher.objects(x, y) {
            return false;
        }
    }
    true
}

struct Matcher<'a> {
    a_heap: &'a Heap,
    b_heap: &'a Heap,
    forward: HashMap<ObjRef, ObjRef>,
    backward: HashMap<ObjRef, ObjRef>,
    work: Vec<(ObjRef, ObjRef)>,
}

impl Matcher<'_> {
    fn pair(&mut self, a: &HeapValue, b: &HeapValue) -> bool {
        match (a, b) {
            (Value::Object(x), Value::Object(y)) => self.link(*x, *y),
            (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
            (Value::Object(_), _) | (_, Value::Object(_)) => false,
            (x, y) => x == y,
        }
    }

    fn link(&mut self, x: ObjRef, y: ObjRef) -> bool {
        match (self.forward.get(&x), self.backward.get(&y)) {
            (Some(&fy), Some(&bx)) => fy == y && bx == x,
            (None, None) => {
                self.forward.insert(x, y);
                self.backward.insert(y, x);
                self.work.push((x, y));
                true
            }
            _ => false,
        }
    }

    fn optional(&mut self, x: Option<ObjRef>, y: Option<ObjRef>) -> bool {
        match (x, y) {
            (None, None) => true,
            (Some(x), Some(y)) => self.link(x, y),
            _ => false,
        }
    }

    fn objects(&mut self, x: ObjRef, y: ObjRef) -> bool {
        let (a_heap, b_heap) = (self.a_heap, self.b_heap);
        let (Some(a), Some(b)) = (a_heap.get(x), b_heap.get(y)) else {
            return false;
        };
        match (a, b) {
            (Object::Table(ta), Object::Table(tb)) => {
                ta.len() == tb.len()
                    && self.optional(ta.metatable(), tb.metatable())
                    && ta
                        .entries()
                        .iter()
                        .zip(tb.entries())
                        .all(|((ka, va), (kb, vb))| self.pair(ka, kb) && self.pair(va, vb))
            }
            (Object::Closure(ca), Object::Closure(cb)) => {
                *ca.proto == *cb.proto
                    && ca.upvalues.len() == cb.upvalues.len()
                    && ca
                        .upvalues
                        .iter()
                        .zip(&cb.upvalues)
                        .all(|(ua, ub)| self.pair(ua, ub))
            }
            (Object::Upvalue(va), Object::Upvalue(vb)) => self.pair(va, vb),
            (Object::Userdata(ua), Object::Userdata(ub)) => {
                ua.payload == ub.payload
                    && ua.light == ub.light
                    && self.optional(ua.metatable, ub.metatable)
            }
            (Object::Native(na), Object::Native(nb)) => na == nb,
            (Object::Resource(ra), Object::Resource(rb)) => ra == rb,
            _ => false,
        }
    }
}
