//! The register store

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use tessera_core::{Error, Result};

use crate::{MemoryBackend, RegistryBackend, Value, ValueKind};

/// Mutability and persistence attributes of a register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterFlags {
    pub mutable: bool,
    pub persistent: bool,
}

impl RegisterFlags {
    /// Writable configuration that survives restarts
    pub const MUTABLE_PERSISTENT: RegisterFlags = RegisterFlags {
        mutable: true,
        persistent: true,
    };

    /// Writable, forgotten on restart
    pub const MUTABLE_VOLATILE: RegisterFlags = RegisterFlags {
        mutable: true,
        persistent: false,
    };

    /// Diagnostic value: readable only
    pub const READ_ONLY: RegisterFlags = RegisterFlags {
        mutable: false,
        persistent: false,
    };
}

type Getter = Box<dyn Fn() -> Value + Send + Sync>;
type Setter = Box<dyn Fn(Value) + Send + Sync>;

enum Backing {
    Stored(Value),
    Dynamic {
        getter: Getter,
        setter: Option<Setter>,
    },
}

struct Register {
    backing: Backing,
    flags: RegisterFlags,
}

impl Register {
    fn current(&self) -> Value {
        match &self.backing {
            Backing::Stored(value) => value.clone(),
            Backing::Dynamic { getter, .. } => getter(),
        }
    }
}

/// Typed key-value store of configuration and diagnostic registers.
///
/// The kind and arity of a register are fixed by the default supplied on
/// first access; later writes must coerce into that shape or are rejected.
/// Write permission is enforced here and nowhere else.
pub struct Registry {
    entries: Mutex<BTreeMap<String, Register>>,
    backend: Arc<dyn RegistryBackend>,
}

impl Registry {
    /// Store with in-process persistence only
    pub fn new() -> Self {
        Registry::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Store flushing persistent registers through `backend`
    pub fn with_backend(backend: Arc<dyn RegistryBackend>) -> Self {
        Registry {
            entries: Mutex::new(BTreeMap::new()),
            backend,
        }
    }

    /// Create the register on first access and return its current value.
    ///
    /// A persisted value takes precedence over `default` when it coerces
    /// into the default's kind and arity; anything else falls back to the
    /// default.
    pub fn ensure(&self, name: &str, default: Value, flags: RegisterFlags) -> Value {
        debug_assert!(!default.is_empty(), "register default must carry a value");
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(name) {
            return existing.current();
        }

        let variable_arity = matches!(default.kind(), ValueKind::String | ValueKind::Bytes);
        let mut value = default.clone();
        if flags.persistent {
            if let Some(stored) = self.backend.load(name) {
                match stored.coerce(default.kind()) {
                    Some(coerced) if variable_arity || coerced.arity() == default.arity() => {
                        value = coerced
                    }
                    _ => debug!(register = name, "discarding incompatible persisted value"),
                }
            }
        }

        entries.insert(
            name.to_owned(),
            Register {
                backing: Backing::Stored(value.clone()),
                flags,
            },
        );
        value
    }

    /// Expose a live computation as a register.
    ///
    /// Accessor-backed registers are never persistent and are mutable only
    /// when a setter is supplied.
    pub fn register_dynamic(&self, name: &str, getter: Getter, setter: Option<Setter>) {
        let flags = RegisterFlags {
            mutable: setter.is_some(),
            persistent: false,
        };
        self.entries.lock().insert(
            name.to_owned(),
            Register {
                backing: Backing::Dynamic { getter, setter },
                flags,
            },
        );
    }

    /// Current value, or None if the register was never created
    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.lock().get(name).map(Register::current)
    }

    /// Write a register, coercing the value into the register's kind
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock();
        let register = entries
            .get_mut(name)
            .ok_or_else(|| Error::MissingRegister(name.to_owned()))?;
        if !register.flags.mutable {
            return Err(Error::ImmutableRegister(name.to_owned()));
        }

        let shape = register.current();
        let expected = shape.kind();
        let offered = value.kind();
        let mismatch = |offered: ValueKind| Error::TypeMismatch {
            name: name.to_owned(),
            expected: expected.name(),
            offered: offered.name(),
        };
        let coerced = value.coerce(expected).ok_or_else(|| mismatch(offered))?;
        let variable_arity = matches!(expected, ValueKind::String | ValueKind::Bytes);
        if !variable_arity && coerced.arity() != shape.arity() {
            return Err(mismatch(offered));
        }

        match &mut register.backing {
            Backing::Stored(current) => *current = coerced,
            Backing::Dynamic { setter, .. } => match setter {
                Some(setter) => setter(coerced),
                // mutable implies a setter for dynamic registers
                None => return Err(Error::ImmutableRegister(name.to_owned())),
            },
        }
        Ok(())
    }

    /// Attributes of a register
    pub fn flags(&self, name: &str) -> Option<RegisterFlags> {
        self.entries.lock().get(name).map(|r| r.flags)
    }

    /// All register names in lexicographic order
    pub fn list(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Name at `index` in lexicographic order, for paged remote listing
    pub fn name_at(&self, index: usize) -> Option<String> {
        self.entries.lock().keys().nth(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove a register; its persisted copy, if any, is removed as well
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.entries.lock().remove(name);
        if let Some(register) = &removed {
            if register.flags.persistent {
                self.backend.remove(name);
            }
        }
        removed.is_some()
    }

    /// Write every persistent stored register through the backend
    pub fn flush(&self) -> usize {
        let entries = self.entries.lock();
        let mut flushed = 0;
        for (name, register) in entries.iter() {
            if !register.flags.persistent {
                continue;
            }
            if let Backing::Stored(value) = &register.backing {
                self.backend.store(name, value);
                flushed += 1;
            }
        }
        debug!(count = flushed, "flushed persistent registers");
        flushed
    }

    /// Clear all persistent state; defaults reapply on next access
    pub fn factory_reset(&self) {
        self.backend.clear();
        let mut entries = self.entries.lock();
        entries.retain(|_, register| !register.flags.persistent);
        debug!("factory reset: persistent registers cleared");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
