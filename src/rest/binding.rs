//! Binding index: maps a request to the handler whose binding is its
//! longest node-wise prefix.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::rest::error::RestError;
use crate::rest::request::RestRequest;

/// Storage and lookup of handler bindings.
pub trait BindingIndex<V>: Send + Sync {
    /// Registers `value` under `binding`; a second registration of the same
    /// raw binding fails.
    fn insert(&mut self, binding: RestRequest, value: V) -> Result<(), RestError>;

    /// Value bound to the longest prefix of `request`, if any.
    fn find(&self, request: &RestRequest) -> Option<&V>;

    fn values(&self) -> Box<dyn Iterator<Item = &V> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered index keyed by the raw routing string.
///
/// Lookup probes the request's ancestors, longest first, so `/a/` still
/// matches `/a/x/` when an unrelated `/a/b/` sorts between them.
#[derive(Debug)]
pub struct SortedBindings<V> {
    entries: BTreeMap<String, V>,
}

impl<V> SortedBindings<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> Default for SortedBindings<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync> BindingIndex<V> for SortedBindings<V> {
    fn insert(&mut self, binding: RestRequest, value: V) -> Result<(), RestError> {
        match self.entries.entry(binding.to_raw_string().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
            Entry::Occupied(_) => Err(RestError::DuplicateBinding {
                binding: binding.to_string(),
            }),
        }
    }

    fn find(&self, request: &RestRequest) -> Option<&V> {
        request.prefix_keys().find_map(|key| self.entries.get(key))
    }

    fn values(&self) -> Box<dyn Iterator<Item = &V> + '_> {
        Box::new(self.entries.values())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
