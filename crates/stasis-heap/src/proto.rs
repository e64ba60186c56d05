use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use stasis::CodeImage;

/// Compiled function body. Closures share protos through `Rc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proto {
    pub name: String,
    pub bytecode: Vec<u8>,
}

/// Named protos loaded into an interpreter; the code image closures are persisted against.
///
/// Code loaded from an inline record is adopted under its name, so a restored graph shares one
/// `Rc` per proto and can be saved again by reference.
#[derive(Debug, Default)]
pub struct ProtoLibrary {
    protos: RefCell<HashMap<String, Rc<Proto>>>,
}

impl ProtoLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a proto under `name`, replacing any previous definition.
    pub fn define(&mut self, name: impl Into<String>, bytecode: impl Into<Vec<u8>>) -> Rc<Proto> {
        let name = name.into();
        let proto = Rc::new(Proto {
            name: name.clone(),
            bytecode: bytecode.into(),
        });
        self.protos.get_mut().insert(name, Rc::clone(&proto));
        proto
    }

    pub fn get(&self, name: &str) -> Option<Rc<Proto>> {
        self.protos.borrow().get(name).cloned()
    }
}

impl CodeImage<Rc<Proto>> for ProtoLibrary {
    fn code_ref_of(&self, code: &Rc<Proto>) -> Option<String> {
        self.protos
            .borrow()
            .get(&code.name)
            .filter(|known| Rc::ptr_eq(known, code))
            .map(|known| known.name.clone())
    }

    fn resolve_code(&self, name: &str) -> Option<Rc<Proto>> {
        self.get(name)
    }

    // Inline layout: u32 name length, name, bytecode.
    fn dump_code(&self, code: &Rc<Proto>) -> Option<Vec<u8>> {
        let name_len: u32 = code.name.len().try_into().ok()?;
        let mut out = Vec::with_capacity(4 + code.name.len() + code.bytecode.len());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(code.name.as_bytes());
        out.extend_from_slice(&code.bytecode);
        Some(out)
    }

    fn load_code(&self, bytes: &[u8]) -> Option<Rc<Proto>> {
        let len_bytes: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        let name_len = u32::from_le_bytes(len_bytes) as usize;
        let name_end = 4usize.checked_add(name_len)?;
        let name = String::from_utf8(bytes.get(4..name_end)?.to_vec()).ok()?;
        let bytecode = &bytes[name_end..];

        let mut protos = self.protos.borrow_mut();
        if let Some(known) = protos.get(&name) {
            // A different body under a loaded name would silently rebind existing closures.
            return (known.bytecode == bytecode).then(|| Rc::clone(known));
        }
        let proto = Rc::new(Proto {
            name: name.clone(),
            bytecode: bytecode.to_vec(),
        });
        protos.insert(name, Rc::clone(&proto));
        Some(proto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_library_protos_have_code_refs() {
        let mut library = ProtoLibrary::new();
        let main = library.define("main", vec![1, 2, 3]);
        let stray = Rc::new(Proto {
            name: "main".to_string(),
            bytecode: vec![9],
        });

        assert_eq!(library.code_ref_of(&main).as_deref(), Some("main"));
        assert_eq!(library.code_ref_of(&stray), None);
        assert!(Rc::ptr_eq(&library.resolve_code("main").unwrap(), &main));
        assert!(library.resolve_code("other").is_none());
    }

    #[test]
    fn inline_code_reloads_as_equal_proto() {
        let mut library = ProtoLibrary::new();
        let main = library.define("main", vec![0xAA, 0xBB]);
        let bytes = library.dump_code(&main).unwrap();
        let reloaded = ProtoLibrary::new().load_code(&bytes).unwrap();
        assert_eq!(*reloaded, *main);
        assert!(ProtoLibrary::new().load_code(&[0xFF, 0, 0, 0]).is_none());
    }

    #[test]
    fn loaded_code_is_adopted_by_name() {
        let mut source = ProtoLibrary::new();
        let main = source.define("main", vec![0x01]);
        let bytes = source.dump_code(&main).unwrap();

        let target = ProtoLibrary::new();
        let first = target.load_code(&bytes).unwrap();
        let second = target.load_code(&bytes).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(target.code_ref_of(&first).as_deref(), Some("main"));
        assert!(Rc::ptr_eq(&target.resolve_code("main").unwrap(), &first));
    }

    #[test]
    fn loaded_code_reuses_identical_definition_and_refuses_conflicts() {
        let mut target = ProtoLibrary::new();
        let local = target.define("main", vec![0x01]);

        let mut source = ProtoLibrary::new();
        let same = source.define("main", vec![0x01]);
        let same = source.dump_code(&same).unwrap();
        assert!(Rc::ptr_eq(&target.load_code(&same).unwrap(), &local));

        let other = source.define("main", vec![0x02]);
        let other = source.dump_code(&other).unwrap();
        assert!(target.load_code(&other).is_none());
        assert!(Rc::ptr_eq(&target.get("main").unwrap(), &local));
    }
}
