//! Wire encoding for outbound commands, and dispatch of inbound callback
//! requests against host symbols (§4.6, §6.1).

use std::sync::Arc;

use crate::error::{Error, ValidationError};
use crate::framing::{CallbackKind, CallbackRequest, RecordType};
use crate::proxy::{InstanceMember, PathComponent, PathKey, PathShape};
use crate::value::PhpValue;

use super::ControllerInner;

fn join_class(class: &[String]) -> String {
    class.join("\\")
}

fn keys_to_json(keys: &[PathKey]) -> serde_json::Value {
    serde_json::Value::Array(
        keys.iter()
            .map(|k| match k {
                PathKey::Name(n) => serde_json::Value::String(n.clone()),
                PathKey::Index(i) => serde_json::Value::Number((*i).into()),
            })
            .collect(),
    )
}

fn args_to_json(args: &[PhpValue]) -> serde_json::Value {
    serde_json::Value::Array(args.iter().map(PhpValue::to_json).collect())
}

/// Encodes a terminal read into `(record_type, payload)` per §6.1.
pub fn encode_read(shape: &PathShape) -> Result<(RecordType, Vec<u8>), Error> {
    match shape {
        PathShape::Global { leaf: PathComponent::Constant(name) } => {
            Ok((RecordType::Const, name.clone().into_bytes()))
        }
        PathShape::Global { leaf: PathComponent::Variable(var) } => {
            Ok((RecordType::Get, var.clone().into_bytes()))
        }
        PathShape::GlobalChain(parts) => Ok((RecordType::Const, join_class(parts).into_bytes())),
        PathShape::GlobalSubscript { var, keys } => {
            let payload = format!("{var} {}", keys_to_json(keys));
            Ok((RecordType::Get, payload.into_bytes()))
        }
        PathShape::ClassMember { class, member } => {
            let payload = format!("{}::{member}", join_class(class));
            Ok((RecordType::ClassStaticConst, payload.into_bytes()))
        }
        PathShape::ClassStatic { class, var, keys } => {
            let payload = if keys.is_empty() {
                format!("{}::${var}", join_class(class))
            } else {
                format!("{}::${var} {}", join_class(class), keys_to_json(keys))
            };
            Ok((RecordType::ClassStaticGet, payload.into_bytes()))
        }
        PathShape::Instance { handle, member: Some(InstanceMember::Property(prop)) } => {
            Ok((RecordType::ClassGet, format!("{handle} {prop}").into_bytes()))
        }
        PathShape::Instance { handle, member: Some(InstanceMember::Subscript(keys)) } => {
            let payload = format!("{handle} {}", keys_to_json(keys));
            Ok((RecordType::ClassGet, payload.into_bytes()))
        }
        PathShape::Instance { handle, member: None } => {
            Ok((RecordType::ClassToString, handle.to_string().into_bytes()))
        }
        PathShape::Call { target, args } => encode_call(target, args.clone()),
        other => Err(Error::Validation(ValidationError::UnsupportedOperation(format!(
            "cannot read path shape {other:?}"
        )))),
    }
}

pub fn encode_write(shape: &PathShape, value: PhpValue) -> Result<(RecordType, Vec<u8>), Error> {
    match shape {
        PathShape::Global { leaf: PathComponent::Variable(var) } => {
            let payload = format!("{var} {}", value.to_json());
            Ok((RecordType::Set, payload.into_bytes()))
        }
        PathShape::GlobalSubscript { var, keys } => {
            let payload = format!("{var} [{},{}]", keys_to_json(keys), value.to_json());
            Ok((RecordType::SetPath, payload.into_bytes()))
        }
        PathShape::ClassStatic { class, var, keys } if keys.is_empty() => {
            let payload = format!("{}::${var} {}", join_class(class), value.to_json());
            Ok((RecordType::ClassStaticSet, payload.into_bytes()))
        }
        PathShape::ClassStatic { class, var, keys } => {
            let payload = format!(
                "{}::${var} [{},{}]",
                join_class(class),
                keys_to_json(keys),
                value.to_json()
            );
            Ok((RecordType::ClassStaticSetPath, payload.into_bytes()))
        }
        PathShape::Instance { handle, member: Some(InstanceMember::Property(prop)) } => {
            let payload = format!("{handle} {prop} {}", value.to_json());
            Ok((RecordType::ClassSet, payload.into_bytes()))
        }
        other => Err(Error::Validation(ValidationError::UnsupportedOperation(format!(
            "cannot assign through path shape {other:?}"
        )))),
    }
}

pub fn encode_call(shape: &PathShape, args: Vec<PhpValue>) -> Result<(RecordType, Vec<u8>), Error> {
    match shape {
        PathShape::Global { leaf: PathComponent::Constant(name) } => {
            dispatch_global_function(name, args)
        }
        PathShape::GlobalChain(parts) => {
            let payload = format!("{} {}", join_class(parts), args_to_json(&args));
            Ok((RecordType::Call, payload.into_bytes()))
        }
        PathShape::ClassMember { class, member } => {
            let payload = format!("{}::{member} {}", join_class(class), args_to_json(&args));
            Ok((RecordType::ClassStaticCall, payload.into_bytes()))
        }
        PathShape::Instance { handle, member: Some(InstanceMember::Call { method, args: bound_args }) } => {
            let all_args = if args.is_empty() { bound_args.clone() } else { args };
            let payload = format!("{handle} {method} {}", args_to_json(&all_args));
            Ok((RecordType::ClassCall, payload.into_bytes()))
        }
        PathShape::Instance { handle, member: None } => {
            let payload = format!("{handle} {}", args_to_json(&args));
            Ok((RecordType::ClassInvoke, payload.into_bytes()))
        }
        other => Err(Error::Validation(ValidationError::UnsupportedOperation(format!(
            "cannot call path shape {other:?}"
        )))),
    }
}

fn dispatch_global_function(name: &str, args: Vec<PhpValue>) -> Result<(RecordType, Vec<u8>), Error> {
    let expect_args = |n: usize| -> Result<(), Error> {
        if args.len() != n {
            Err(Error::Validation(ValidationError::WrongArgCount {
                function: "<global>",
                got: args.len(),
            }))
        } else {
            Ok(())
        }
    };
    match name {
        "echo" => Ok((RecordType::CallEcho, args_to_json(&args).to_string().into_bytes())),
        "eval" => {
            expect_args(1)?;
            Ok((RecordType::CallEval, args[0].to_json().to_string().into_bytes()))
        }
        "include" => {
            expect_args(1)?;
            Ok((RecordType::CallInclude, args[0].to_json().to_string().into_bytes()))
        }
        "include_once" => {
            expect_args(1)?;
            Ok((RecordType::CallIncludeOnce, args[0].to_json().to_string().into_bytes()))
        }
        "require" => {
            expect_args(1)?;
            Ok((RecordType::CallRequire, args[0].to_json().to_string().into_bytes()))
        }
        "require_once" => {
            expect_args(1)?;
            Ok((RecordType::CallRequireOnce, args[0].to_json().to_string().into_bytes()))
        }
        "exit" => Ok((RecordType::Exit, vec![])),
        other => {
            let payload = format!("{other} {}", args_to_json(&args));
            Ok((RecordType::Call, payload.into_bytes()))
        }
    }
}

pub fn encode_construct(class: &[String], args: Vec<PhpValue>) -> Vec<u8> {
    format!("{} {}", join_class(class), args_to_json(&args)).into_bytes()
}

pub fn encode_delete(shape: &PathShape) -> Result<(RecordType, Vec<u8>), Error> {
    match shape {
        PathShape::Global { leaf: PathComponent::Variable(var) } => {
            Ok((RecordType::Unset, var.clone().into_bytes()))
        }
        PathShape::GlobalSubscript { var, keys } => {
            let payload = format!("{var} {}", keys_to_json(keys));
            Ok((RecordType::UnsetPath, payload.into_bytes()))
        }
        PathShape::Instance { handle, member: Some(InstanceMember::Property(prop)) } => {
            Ok((RecordType::ClassUnset, format!("{handle} {prop}").into_bytes()))
        }
        PathShape::Instance { handle, member: None } => {
            Ok((RecordType::Destruct, handle.to_string().into_bytes()))
        }
        other => Err(Error::Validation(ValidationError::UnsupportedOperation(format!(
            "cannot delete path shape {other:?}"
        )))),
    }
}

fn body_array(body: &[u8]) -> Vec<PhpValue> {
    match PhpValue::parse(body) {
        Ok(PhpValue::Array(items)) => items,
        Ok(single) => vec![single],
        Err(_) => vec![],
    }
}

fn args_list(value: Option<&PhpValue>) -> Vec<PhpValue> {
    match value {
        Some(PhpValue::Array(items)) => items.clone(),
        _ => vec![],
    }
}

/// Dispatches one inbound callback request against host symbols/objects.
///
/// The object handle (when the request targets an existing host object)
/// travels in `req.host_handle`, not in the body; `req.body` carries only
/// the remaining operands as a JSON array, e.g. `CALL`'s body is
/// `[function_name, args_array]`.
///
/// Errors are caught here and turned into `IS_ERROR` DATA replies by the
/// caller; they are never propagated to the controller's own exchange.
pub async fn dispatch_callback(
    controller: &Arc<ControllerInner>,
    req: &CallbackRequest,
) -> Result<PhpValue, Error> {
    let parts = body_array(&req.body);
    let handle = req.host_handle;

    match req.kind {
        CallbackKind::GetClass => {
            let name = parts.first().and_then(PhpValue::as_str).unwrap_or_default();
            match controller.registry.resolve_class(name) {
                Some(_) => Ok(PhpValue::Int(0)),
                None => Ok(PhpValue::Null),
            }
        }
        CallbackKind::Construct => {
            let name = parts.first().and_then(PhpValue::as_str).unwrap_or_default().to_string();
            let ctor_args = args_list(parts.get(1));
            let class = controller
                .registry
                .resolve_class(&name)
                .ok_or_else(|| Error::HostCallback(format!("no host class registered: {name}")))?;
            let object = class.construct(ctor_args).await?;
            let id = controller.host_objects.lock().await.insert(object);
            Ok(PhpValue::Int(id as i64))
        }
        CallbackKind::Destruct => {
            if let Some(object) = controller.host_objects.lock().await.remove(handle) {
                let _ = object.dispose().await;
            }
            Ok(PhpValue::Null)
        }
        CallbackKind::ClassGet => {
            let prop = parts.first().and_then(PhpValue::as_str).unwrap_or_default();
            with_object(controller, handle).await?.get(prop).await
        }
        CallbackKind::ClassSet => {
            let prop = parts.first().and_then(PhpValue::as_str).unwrap_or_default().to_string();
            let value = parts.get(1).cloned().unwrap_or(PhpValue::Null);
            with_object(controller, handle).await?.set(&prop, value).await?;
            Ok(PhpValue::Null)
        }
        CallbackKind::ClassCall => {
            let method = parts.first().and_then(PhpValue::as_str).unwrap_or_default().to_string();
            let call_args = args_list(parts.get(1));
            with_object(controller, handle).await?.call(&method, call_args).await
        }
        CallbackKind::ClassInvoke => {
            let call_args = args_list(parts.first());
            with_object(controller, handle).await?.invoke(call_args).await
        }
        CallbackKind::ClassGetIterator => {
            with_object(controller, handle).await?; // presence check
            Ok(PhpValue::Int(handle as i64))
        }
        CallbackKind::ClassToString => {
            Ok(PhpValue::String(with_object(controller, handle).await?.to_string().await?))
        }
        CallbackKind::ClassIsset => {
            let prop = parts.first().and_then(PhpValue::as_str).unwrap_or_default();
            Ok(PhpValue::Bool(with_object(controller, handle).await?.isset(prop).await?))
        }
        CallbackKind::ClassUnset => {
            let prop = parts.first().and_then(PhpValue::as_str).unwrap_or_default().to_string();
            with_object(controller, handle).await?.unset(&prop).await?;
            Ok(PhpValue::Null)
        }
        CallbackKind::ClassProps => {
            let props = with_object(controller, handle).await?.props().await?;
            Ok(PhpValue::Array(props.into_iter().map(PhpValue::String).collect()))
        }
        CallbackKind::ClassStaticCall => {
            let class_name = parts.first().and_then(PhpValue::as_str).unwrap_or_default();
            let method = parts.get(1).and_then(PhpValue::as_str).unwrap_or_default();
            let call_args = args_list(parts.get(2));
            let function = controller.registry.resolve_function(&format!("{class_name}::{method}"));
            match function {
                Some(f) => f.call(call_args).await,
                None => Err(Error::HostCallback(format!("no static method registered: {class_name}::{method}"))),
            }
        }
        CallbackKind::Call => {
            let name = parts.first().and_then(PhpValue::as_str).unwrap_or_default();
            let call_args = args_list(parts.get(1));
            let function = controller
                .registry
                .resolve_function(name)
                .ok_or_else(|| Error::HostCallback(format!("no host function registered: {name}")))?;
            function.call(call_args).await
        }
        CallbackKind::JsonEncode => {
            let json = with_object(controller, handle).await?.json_encode().await?;
            Ok(PhpValue::String(json))
        }
    }
}

async fn with_object(
    controller: &Arc<ControllerInner>,
    handle: u32,
) -> Result<Arc<dyn crate::host::HostObject>, Error> {
    controller
        .host_objects
        .lock()
        .await
        .get(handle)
        .cloned()
        .ok_or_else(|| Error::HostCallback(format!("unknown host handle {handle}")))
}
