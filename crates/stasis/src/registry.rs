use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{PersistError, Result};

/// Bidirectional map between host objects that must never be content-serialized and the
/// stable identifiers they are persisted under.
///
/// Writer and reader must register the same identifiers; the objects behind them may differ
/// between interpreter builds.
#[derive(Debug, Clone)]
pub struct PermanentRegistry<H> {
    by_identifier: HashMap<String, H>,
    by_object: HashMap<H, String>,
}

impl<H> Default for PermanentRegistry<H> {
    fn default() -> Self {
        Self {
            by_identifier: HashMap::new(),
            by_object: HashMap::new(),
        }
    }
}

impl<H: Clone + Eq + Hash> PermanentRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, identifier: impl Into<String>, object: H) -> Result<()> {
        let identifier = identifier.into();
        if self.by_identifier.contains_key(&identifier) {
            return Err(PersistError::DuplicateIdentifier(identifier));
        }
        if let Some(existing) = self.by_object.get(&object) {
            return Err(PersistError::DuplicateObject {
                identifier: existing.clone(),
            });
        }
        self.by_object.insert(object.clone(), identifier.clone());
        self.by_identifier.insert(identifier, object);
        Ok(())
    }

    pub fn lookup_by_object(&self, object: &H) -> Option<&str> {
        self.by_object.get(object).map(String::as_str)
    }

    pub fn lookup_by_identifier(&self, identifier: &str) -> Option<&H> {
        self.by_identifier.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }

    /// Registered identifiers in sorted order.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_identifier.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
