//! Parameter containers: what the publisher dumps and the client loads.

use crate::codec;
use crate::error::{DataflowError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mutable model state that can be dumped to and loaded from one blob.
pub trait ParameterState: Send + Sync {
    /// Serialize the current state.
    fn dumps(&self) -> Result<Vec<u8>>;

    /// Apply a blob produced by `dumps` in place.
    fn loads(&self, blob: &[u8]) -> Result<()>;
}

impl<S: ParameterState + ?Sized> ParameterState for Arc<S> {
    fn dumps(&self) -> Result<Vec<u8>> {
        (**self).dumps()
    }

    fn loads(&self, blob: &[u8]) -> Result<()> {
        (**self).loads(blob)
    }
}

/// One named component of a model (a network, a normalizer, ...).
pub trait StateDict: Send {
    fn state_dict(&self) -> Result<Vec<u8>>;

    fn load_state_dict(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Shared handle to a module, also held by the code that uses the module.
pub type SharedModule = Arc<Mutex<dyn StateDict>>;

/// Named collection of modules dumped and loaded as a single blob.
///
/// Modules are encoded in name order, so equal states produce equal blobs
/// and therefore equal hashes.
#[derive(Default, Clone)]
pub struct ModuleDict {
    modules: BTreeMap<String, SharedModule>,
}

impl ModuleDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module under `name`, replacing any previous one.
    pub fn insert<M: StateDict + 'static>(&mut self, name: impl Into<String>, module: Arc<Mutex<M>>) {
        self.modules.insert(name.into(), module);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<M: StateDict + 'static>(mut self, name: impl Into<String>, module: Arc<Mutex<M>>) -> Self {
        self.insert(name, module);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SharedModule> {
        self.modules.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ParameterState for ModuleDict {
    fn dumps(&self) -> Result<Vec<u8>> {
        let mut dicts = BTreeMap::new();
        for (name, module) in &self.modules {
            dicts.insert(name.as_str(), module.lock().state_dict()?);
        }
        codec::serialize(&dicts)
    }

    fn loads(&self, blob: &[u8]) -> Result<()> {
        let dicts: BTreeMap<String, Vec<u8>> = codec::deserialize(blob)?;
        if !dicts.keys().eq(self.modules.keys()) {
            return Err(DataflowError::Serialization(format!(
                "module mismatch: expected {:?}, got {:?}",
                self.modules.keys().collect::<Vec<_>>(),
                dicts.keys().collect::<Vec<_>>()
            )));
        }
        for (name, bytes) in &dicts {
            self.modules[name].lock().load_state_dict(bytes)?;
        }
        Ok(())
    }
}
