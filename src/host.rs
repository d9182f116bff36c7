//! Host-side symbol resolution: the types PHP's `GET_CLASS`/`CONSTRUCT`/
//! `CLASS_*` callback requests resolve against (§4.6 "ADDED — host symbol
//! resolution").
//!
//! A small set of methods with defaulted `Err(Unsupported)` bodies, so a
//! host type only needs to implement the operations it actually supports.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::value::PhpValue;

bitflags::bitflags! {
    /// Feature bitmap reported to PHP in a `GET_CLASS` reply, so the PHP
    /// side's generated proxy class knows which magic methods to wire up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostFeatures: u32 {
        const HAS_LENGTH   = 0b0000_0001;
        const HAS_SIZE     = 0b0000_0010;
        const HAS_ITERATOR = 0b0000_0100;
    }
}

/// A live host-side object reachable from PHP via a handle id.
///
/// Every method defaults to `Unsupported`; concrete host types override only
/// what they mean to expose.
#[async_trait]
pub trait HostObject: Send + Sync {
    async fn get(&self, _property: &str) -> Result<PhpValue, Error> {
        Err(Error::Unsupported("get"))
    }

    async fn set(&self, _property: &str, _value: PhpValue) -> Result<(), Error> {
        Err(Error::Unsupported("set"))
    }

    async fn call(&self, _method: &str, _args: Vec<PhpValue>) -> Result<PhpValue, Error> {
        Err(Error::Unsupported("call"))
    }

    async fn invoke(&self, _args: Vec<PhpValue>) -> Result<PhpValue, Error> {
        Err(Error::Unsupported("invoke"))
    }

    async fn to_string(&self) -> Result<String, Error> {
        Err(Error::Unsupported("to_string"))
    }

    async fn json_encode(&self) -> Result<String, Error> {
        Err(Error::Unsupported("json_encode"))
    }

    /// Returns the next `(value, done)` pair; `done == true` ends iteration.
    async fn iter_next(&self) -> Result<(PhpValue, bool), Error> {
        Err(Error::Unsupported("iter"))
    }

    async fn props(&self) -> Result<Vec<String>, Error> {
        Err(Error::Unsupported("props"))
    }

    async fn isset(&self, _property: &str) -> Result<bool, Error> {
        Err(Error::Unsupported("isset"))
    }

    async fn unset(&self, _property: &str) -> Result<(), Error> {
        Err(Error::Unsupported("unset"))
    }

    /// Called when PHP destructs the handle pointing at this object. Errors
    /// are logged and swallowed by the controller, never surfaced to PHP.
    async fn dispose(&self) -> Result<(), Error> {
        Ok(())
    }

    fn features(&self) -> HostFeatures {
        HostFeatures::empty()
    }
}

/// Factory for a named host class, invoked on an inbound `CONSTRUCT`
/// callback request.
#[async_trait]
pub trait HostClass: Send + Sync {
    async fn construct(&self, args: Vec<PhpValue>) -> Result<Arc<dyn HostObject>, Error>;
}

/// A plain host function reachable from PHP via `CALL` / `CLASSSTATIC_CALL`.
#[async_trait]
pub trait HostFunction: Send + Sync {
    async fn call(&self, args: Vec<PhpValue>) -> Result<PhpValue, Error>;
}

/// Maps symbol names PHP asks about (`GET_CLASS`, `CALL`) to host-side
/// factories and functions. One registry per `Controller`.
#[derive(Default)]
pub struct HostRegistry {
    classes: HashMap<String, Arc<dyn HostClass>>,
    functions: HashMap<String, Arc<dyn HostFunction>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        HostRegistry { classes: HashMap::new(), functions: HashMap::new() }
    }

    pub fn register_class(&mut self, name: impl Into<String>, class: Arc<dyn HostClass>) {
        self.classes.insert(name.into(), class);
    }

    pub fn register_function(&mut self, name: impl Into<String>, function: Arc<dyn HostFunction>) {
        self.functions.insert(name.into(), function);
    }

    pub fn resolve_class(&self, name: &str) -> Option<Arc<dyn HostClass>> {
        self.classes.get(name).cloned()
    }

    pub fn resolve_function(&self, name: &str) -> Option<Arc<dyn HostFunction>> {
        self.functions.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: std::sync::atomic::AtomicI64,
    }

    #[async_trait]
    impl HostObject for Counter {
        async fn get(&self, property: &str) -> Result<PhpValue, Error> {
            if property == "value" {
                Ok(PhpValue::Int(self.value.load(std::sync::atomic::Ordering::Relaxed)))
            } else {
                Err(Error::Unsupported("get"))
            }
        }

        async fn call(&self, method: &str, _args: Vec<PhpValue>) -> Result<PhpValue, Error> {
            if method == "increment" {
                self.value.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(PhpValue::Null)
            } else {
                Err(Error::Unsupported("call"))
            }
        }
    }

    struct CounterClass;

    #[async_trait]
    impl HostClass for CounterClass {
        async fn construct(&self, _args: Vec<PhpValue>) -> Result<Arc<dyn HostObject>, Error> {
            Ok(Arc::new(Counter { value: std::sync::atomic::AtomicI64::new(0) }))
        }
    }

    #[tokio::test]
    async fn unsupported_default_surfaces_as_error() {
        let counter = Counter { value: std::sync::atomic::AtomicI64::new(0) };
        let err = counter.set("value", PhpValue::Int(1)).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported("set")));
    }

    #[tokio::test]
    async fn registry_resolves_registered_class() {
        let mut registry = HostRegistry::new();
        registry.register_class("Counter", Arc::new(CounterClass));
        let class = registry.resolve_class("Counter").expect("registered");
        let obj = class.construct(vec![]).await.unwrap();
        obj.call("increment", vec![]).await.unwrap();
        assert_eq!(obj.get("value").await.unwrap(), PhpValue::Int(1));
    }

    #[tokio::test]
    async fn registry_miss_returns_none() {
        let registry = HostRegistry::new();
        assert!(registry.resolve_class("Nope").is_none());
    }
}
