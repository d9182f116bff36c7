//! The accumulated-path data model a [`super::PhpProxy`] builds up before a
//! terminal operation materializes a protocol command (§4.4).

use crate::error::ValidationError;
use crate::value::PhpValue;

/// One subscript key: `$v[k]` where `k` is either a string or an integer.
#[derive(Debug, Clone, PartialEq)]
pub enum PathKey {
    Name(String),
    Index(i64),
}

impl From<&str> for PathKey {
    fn from(s: &str) -> Self {
        PathKey::Name(s.to_string())
    }
}

impl From<String> for PathKey {
    fn from(s: String) -> Self {
        PathKey::Name(s)
    }
}

impl From<i64> for PathKey {
    fn from(i: i64) -> Self {
        PathKey::Index(i)
    }
}

impl From<i32> for PathKey {
    fn from(i: i32) -> Self {
        PathKey::Index(i as i64)
    }
}

/// The leaf of a root-global, no-subscript access: a bare name is a
/// constant, a `$`-prefixed name is a global variable.
#[derive(Debug, Clone, PartialEq)]
pub enum PathComponent {
    Constant(String),
    Variable(String),
}

impl PathComponent {
    pub fn from_name(name: &str) -> Result<Self, ValidationError> {
        validate_no_spaces(name)?;
        if let Some(var) = name.strip_prefix('$') {
            Ok(PathComponent::Variable(var.to_string()))
        } else {
            Ok(PathComponent::Constant(name.to_string()))
        }
    }
}

/// A pending member access on an already-materialized instance proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceMember {
    Property(String),
    Subscript(Vec<PathKey>),
    Call { method: String, args: Vec<PhpValue> },
    Invoke(Vec<PhpValue>),
}

/// The accumulated shape of a proxy's path. See §4.4 for the grammar each
/// variant corresponds to.
#[derive(Debug, Clone, PartialEq)]
pub enum PathShape {
    /// `X` (constant) or `$v` (global variable), no further chaining yet.
    Global { leaf: PathComponent },
    /// `a\b\c` — a dotted constant path with no `$` anywhere.
    GlobalChain(Vec<String>),
    /// `$v[k1][k2]...` — subscript read/write of a global variable.
    GlobalSubscript { var: String, keys: Vec<PathKey> },
    /// `A\B::X` — a class constant, or a bare class name.
    ClassMember { class: Vec<String>, member: String },
    /// `A\B::$c[k1][...]` — a static property, optionally subscripted.
    ClassStatic { class: Vec<String>, var: String, keys: Vec<PathKey> },
    /// A function-call terminal layered over any callable shape.
    Call { target: Box<PathShape>, args: Vec<PhpValue> },
    /// `new A\B(...)`.
    Construct { class: Vec<String>, args: Vec<PhpValue> },
    /// A proxy materialized from a prior terminal op (construct, `this`,
    /// call-this, ...), identified by its host-side handle id.
    Instance { handle: u32, member: Option<InstanceMember> },
}

/// Class-name segments must match `[A-Za-z0-9_\\]+` (§4.4).
pub fn validate_class_segment(segment: &str) -> Result<(), ValidationError> {
    let ok = !segment.is_empty()
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '\\');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidClassName(segment.to_string()))
    }
}

/// Names used as property/variable/constant segments must not contain
/// spaces — the wire protocol uses space as an argument separator.
pub fn validate_no_spaces(name: &str) -> Result<(), ValidationError> {
    if name.contains(' ') {
        Err(ValidationError::SpaceInName(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_is_constant() {
        assert_eq!(
            PathComponent::from_name("FOO").unwrap(),
            PathComponent::Constant("FOO".into())
        );
    }

    #[test]
    fn dollar_name_is_variable() {
        assert_eq!(
            PathComponent::from_name("$foo").unwrap(),
            PathComponent::Variable("foo".into())
        );
    }

    #[test]
    fn space_in_name_rejected() {
        assert!(PathComponent::from_name("foo bar").is_err());
    }

    #[test]
    fn class_segment_rejects_bad_chars() {
        assert!(validate_class_segment("Foo-Bar").is_err());
        assert!(validate_class_segment("Foo\\Bar_1").is_ok());
    }
}
