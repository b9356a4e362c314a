//! Type-name to numeric id registry used by the binary codec
//!
//! One registry is constructed per process (or per test) and injected into
//! codec calls; nothing here is ambient global state, so tests never leak
//! registrations across cases.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Default)]
struct RegistryInner {
    by_name: HashMap<String, u32>,
    by_id: Vec<String>,
}

/// Process-wide mapping between registered payload type names and stable
/// small integer ids. Ids are dense and assigned in registration order.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the id for `type_name`, registering it if unseen.
    pub fn get_or_register(&self, type_name: &str) -> u32 {
        if let Some(id) = self.inner.read().by_name.get(type_name) {
            return *id;
        }
        let mut inner = self.inner.write();
        // Re-check under the write lock: another thread may have registered
        // the name between the two lock acquisitions.
        if let Some(id) = inner.by_name.get(type_name) {
            return *id;
        }
        let id = inner.by_id.len() as u32;
        inner.by_id.push(type_name.to_string());
        inner.by_name.insert(type_name.to_string(), id);
        id
    }

    /// Resolve an already-registered id, if any.
    pub fn id_of(&self, type_name: &str) -> Option<u32> {
        self.inner.read().by_name.get(type_name).copied()
    }

    /// Resolve a type name from its id, if registered.
    pub fn name_of(&self, id: u32) -> Option<String> {
        self.inner.read().by_id.get(id as usize).cloned()
    }

    /// Full id → name table, ordered by id. This is what the registry
    /// artifact of a dump serializes.
    pub fn entries(&self) -> Vec<(u32, String)> {
        self.inner
            .read()
            .by_id
            .iter()
            .enumerate()
            .map(|(id, name)| (id as u32, name.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}
