//! Per-request state carried by an [`Exchange`](crate::exchange::Exchange).
//!
//! - [`Extensions`]: type-keyed objects a transport injects for handlers
//!   (database handles, request ids, tenant info). Read by the
//!   [`ContextObject`](crate::mapping::ContextObject) parameter mapping.
//! - [`PathParams`]: values captured by `:name` segments of the matched
//!   route, handed back to the exchange before the action runs.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

/// Type-erased request extensions map, used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the extensions map, replacing any previous value of the same type
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns `true` if a value of type `T` is present
    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.map.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Path parameters extracted from the matched route
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the parameters map
    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    /// Number of captured parameters
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` when nothing was captured
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn extensions_are_keyed_by_type() {
        let mut ext = Extensions::new();
        ext.insert(Tenant("acme"));
        ext.insert(42_u32);
        assert_eq!(ext.get::<Tenant>(), Some(&Tenant("acme")));
        assert_eq!(ext.get::<u32>(), Some(&42));
        assert!(!ext.contains::<String>());
    }

    #[test]
    fn extensions_insert_replaces() {
        let mut ext = Extensions::new();
        ext.insert(Tenant("a"));
        ext.insert(Tenant("b"));
        assert_eq!(ext.get::<Tenant>(), Some(&Tenant("b")));
    }

    #[test]
    fn path_params_roundtrip() {
        let mut params = PathParams::new();
        assert!(params.is_empty());
        params.insert("id".into(), "42".into());
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.get("other"), None);
        assert_eq!(params.len(), 1);
    }
}
