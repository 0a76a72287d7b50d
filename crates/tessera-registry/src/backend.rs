//! Persistence collaborator for registers
//!
//! The store itself never touches the disk; persistent registers are read
//! through and flushed to an external key-value backend. The in-memory
//! implementation serves tests and nodes that opt out of persistence.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::Value;

/// External key-value store backing persistent registers
pub trait RegistryBackend: Send + Sync {
    fn load(&self, name: &str) -> Option<Value>;

    fn store(&self, name: &str, value: &Value);

    fn remove(&self, name: &str);

    fn clear(&self);
}

/// Volatile backend: persistence within the process lifetime only
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl RegistryBackend for MemoryBackend {
    fn load(&self, name: &str) -> Option<Value> {
        self.entries.lock().get(name).cloned()
    }

    fn store(&self, name: &str, value: &Value) {
        self.entries.lock().insert(name.to_owned(), value.clone());
    }

    fn remove(&self, name: &str) {
        self.entries.lock().remove(name);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        backend.store("a.b", &Value::U16(vec![5]));
        assert_eq!(backend.load("a.b"), Some(Value::U16(vec![5])));

        backend.remove("a.b");
        assert_eq!(backend.load("a.b"), None);
    }

    #[test]
    fn test_memory_backend_clear() {
        let backend = MemoryBackend::new();
        backend.store("x", &Value::Bit(vec![true]));
        backend.store("y", &Value::Bit(vec![false]));
        backend.clear();
        assert!(backend.is_empty());
    }
}
