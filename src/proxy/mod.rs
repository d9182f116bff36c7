//! Chainable host-side proxies over PHP's namespace (§4.4).
//!
//! A [`PhpProxy`] accumulates a [`PathShape`] as property/index access
//! chains onto it; nothing crosses the wire until a terminal operation
//! (`get`, `set`, `call`, `construct`, `delete`, `iter`) is invoked, at
//! which point the accumulated shape is turned into a protocol command and
//! enqueued on the owning interpreter's [`crate::scheduler::Scheduler`].
//!
//! `std::ops::Index` is deliberately not implemented: there is no
//! synchronous, infallible way to round-trip to PHP and back, so chaining
//! goes through the inherent `get`/`index` methods instead.

mod path;

pub use path::{validate_class_segment, validate_no_spaces, InstanceMember, PathComponent, PathKey, PathShape};

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::{Error, ValidationError};
use crate::value::PhpValue;

/// What the owning controller does with a fully-accumulated path.
///
/// Implemented by `crate::controller::Controller`; kept as a trait here so
/// `proxy` and `controller` can reference each other without either module
/// owning the other's concrete type.
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    async fn read(&self, shape: &PathShape) -> Result<PhpValue, Error>;
    async fn write(&self, shape: &PathShape, value: PhpValue) -> Result<(), Error>;
    async fn invoke(&self, shape: &PathShape, args: Vec<PhpValue>) -> Result<PhpValue, Error>;
    async fn construct(&self, class: &[String], args: Vec<PhpValue>) -> Result<PhpProxy, Error>;
    async fn delete(&self, shape: &PathShape) -> Result<(), Error>;
    /// Steps an iterator handle, returning `(value, done)`.
    async fn iter_next(&self, handle: u32) -> Result<(PhpValue, bool), Error>;
}

/// A single polymorphic handle into PHP's namespace.
#[derive(Clone)]
pub struct PhpProxy {
    shape: PathShape,
    transport: Weak<dyn ProxyTransport>,
}

impl std::fmt::Debug for PhpProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhpProxy").field("shape", &self.shape).finish()
    }
}

impl PhpProxy {
    pub fn new(shape: PathShape, transport: &Arc<dyn ProxyTransport>) -> Self {
        PhpProxy { shape, transport: Arc::downgrade(transport) }
    }

    pub fn shape(&self) -> &PathShape {
        &self.shape
    }

    fn with_shape(&self, shape: PathShape) -> PhpProxy {
        PhpProxy { shape, transport: self.transport.clone() }
    }

    fn transport(&self) -> Result<Arc<dyn ProxyTransport>, Error> {
        self.transport.upgrade().ok_or(Error::Exit(crate::error::ExitError {
            code: None,
            cause: "interpreter controller dropped".into(),
        }))
    }

    /// A root constant (`FOO`) or global variable (`$foo`).
    pub fn root(name: &str, transport: &Arc<dyn ProxyTransport>) -> Result<PhpProxy, ValidationError> {
        let leaf = PathComponent::from_name(name)?;
        Ok(PhpProxy { shape: PathShape::Global { leaf }, transport: Arc::downgrade(transport) })
    }

    /// A root class-namespace path segment (`A`, to be chained with
    /// `.prop("B")` etc. down to `A\B::CONST` or `A\B::$staticVar`).
    pub fn root_class(segment: &str, transport: &Arc<dyn ProxyTransport>) -> Result<PhpProxy, ValidationError> {
        validate_class_segment(segment)?;
        Ok(PhpProxy {
            shape: PathShape::ClassMember { class: vec![segment.to_string()], member: String::new() },
            transport: Arc::downgrade(transport),
        })
    }

    /// Chains a bare name segment: extends a dotted constant path, a
    /// class-namespace path, or names a property on an instance proxy.
    pub fn prop(&self, name: &str) -> Result<PhpProxy, ValidationError> {
        validate_no_spaces(name)?;
        let shape = match &self.shape {
            PathShape::Global { leaf: PathComponent::Constant(first) } => {
                PathShape::GlobalChain(vec![first.clone(), name.to_string()])
            }
            PathShape::GlobalChain(parts) => {
                let mut parts = parts.clone();
                parts.push(name.to_string());
                PathShape::GlobalChain(parts)
            }
            PathShape::ClassMember { class, member } if member.is_empty() => {
                validate_class_segment(name)?;
                let mut class = class.clone();
                class.push(name.to_string());
                PathShape::ClassMember { class, member: String::new() }
            }
            PathShape::ClassMember { class, .. } => {
                PathShape::ClassMember { class: class.clone(), member: name.to_string() }
            }
            PathShape::Instance { handle, .. } => {
                PathShape::Instance { handle: *handle, member: Some(InstanceMember::Property(name.to_string())) }
            }
            other => return Err(ValidationError::UnsupportedOperation(format!(
                "cannot append property {name:?} to path shape {other:?}"
            ))),
        };
        Ok(self.with_shape(shape))
    }

    /// A static-variable marker: `$name` following a class-namespace chain.
    pub fn static_var(&self, name: &str) -> Result<PhpProxy, ValidationError> {
        let var = name.strip_prefix('$').unwrap_or(name).to_string();
        validate_no_spaces(&var)?;
        match &self.shape {
            PathShape::ClassMember { class, member } if member.is_empty() && !class.is_empty() => {
                Ok(self.with_shape(PathShape::ClassStatic { class: class.clone(), var, keys: vec![] }))
            }
            PathShape::ClassMember { class, .. } if class.is_empty() => {
                Err(ValidationError::NoRootingClass)
            }
            _ => Err(ValidationError::UnsupportedOperation(
                "static variable marker only valid directly after a class path".into(),
            )),
        }
    }

    /// Chains a subscript key: `$v[k]`, `A\B::$c[k]`, or an instance
    /// property's index.
    pub fn index(&self, key: impl Into<PathKey>) -> Result<PhpProxy, ValidationError> {
        let key = key.into();
        let shape = match &self.shape {
            PathShape::Global { leaf: PathComponent::Variable(var) } => {
                PathShape::GlobalSubscript { var: var.clone(), keys: vec![key] }
            }
            PathShape::GlobalSubscript { var, keys } => {
                let mut keys = keys.clone();
                keys.push(key);
                PathShape::GlobalSubscript { var: var.clone(), keys }
            }
            PathShape::ClassStatic { class, var, keys } => {
                let mut keys = keys.clone();
                keys.push(key);
                PathShape::ClassStatic { class: class.clone(), var: var.clone(), keys }
            }
            PathShape::Instance { handle, member: Some(InstanceMember::Property(_)) }
            | PathShape::Instance { handle, member: None } => {
                PathShape::Instance { handle: *handle, member: Some(InstanceMember::Subscript(vec![key])) }
            }
            PathShape::Instance { handle, member: Some(InstanceMember::Subscript(keys)) } => {
                let mut keys = keys.clone();
                keys.push(key);
                PathShape::Instance { handle: *handle, member: Some(InstanceMember::Subscript(keys)) }
            }
            other => {
                return Err(ValidationError::UnsupportedOperation(format!(
                    "cannot subscript path shape {other:?}"
                )))
            }
        };
        Ok(self.with_shape(shape))
    }

    /// Wraps the current shape as a pending function/method call, not yet
    /// dispatched — call `.await_call()` to send it.
    pub fn as_call(&self, args: Vec<PhpValue>) -> PhpProxy {
        match &self.shape {
            PathShape::Instance { handle, member: Some(InstanceMember::Property(method)) } => {
                self.with_shape(PathShape::Instance {
                    handle: *handle,
                    member: Some(InstanceMember::Call { method: method.clone(), args }),
                })
            }
            _ => self.with_shape(PathShape::Call { target: Box::new(self.shape.clone()), args }),
        }
    }

    /// Materializes `this`: the terminal handle-allocating read for a
    /// pending variable/subscript/static chain.
    pub fn this(&self) -> PhpProxy {
        self.with_shape(PathShape::Call {
            target: Box::new(self.shape.clone()),
            args: vec![],
        })
    }

    // --- Terminal operations -------------------------------------------------

    pub async fn get(&self) -> Result<PhpValue, Error> {
        self.transport()?.read(&self.shape).await
    }

    pub async fn set(&self, value: PhpValue) -> Result<(), Error> {
        self.transport()?.write(&self.shape, value).await
    }

    pub async fn call(&self, args: Vec<PhpValue>) -> Result<PhpValue, Error> {
        self.transport()?.invoke(&self.shape, args).await
    }

    pub async fn construct(&self, args: Vec<PhpValue>) -> Result<PhpProxy, Error> {
        let class = match &self.shape {
            PathShape::ClassMember { class, .. } => class.clone(),
            PathShape::GlobalChain(parts) => parts.clone(),
            PathShape::Global { leaf: PathComponent::Constant(name) } => vec![name.clone()],
            other => {
                return Err(Error::Validation(ValidationError::UnsupportedOperation(format!(
                    "cannot construct from path shape {other:?}"
                ))))
            }
        };
        self.transport()?.construct(&class, args).await
    }

    pub async fn delete(&self) -> Result<(), Error> {
        self.transport()?.delete(&self.shape).await
    }

    /// Steps an iterator instance proxy, returning `(value, done)`.
    pub async fn iter_next(&self) -> Result<(PhpValue, bool), Error> {
        match &self.shape {
            PathShape::Instance { handle, .. } => self.transport()?.iter_next(*handle).await,
            other => Err(Error::Validation(ValidationError::UnsupportedOperation(format!(
                "cannot iterate path shape {other:?}"
            )))),
        }
    }
}
