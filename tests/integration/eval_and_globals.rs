//! Global variables, constants, and `eval()` round-tripped through a real
//! interpreter.

use php_world::value::PhpValue;

use crate::helpers::{php_available, spawn_controller};

async fn eval(controller: &php_world::Controller, expr: &str) -> php_world::Result<PhpValue> {
    let body = format!("return {expr};");
    controller.global("eval")?.call(vec![PhpValue::String(body)]).await
}

#[tokio::test]
async fn eval_round_trips_scalars() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    assert_eq!(eval(&controller, "1 + 1").await.unwrap(), PhpValue::Int(2));
    assert_eq!(eval(&controller, "'hello' . ' ' . 'world'").await.unwrap(), PhpValue::String("hello world".into()));
    assert_eq!(eval(&controller, "true").await.unwrap(), PhpValue::Bool(true));
    assert_eq!(eval(&controller, "null").await.unwrap(), PhpValue::Null);

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn global_variable_get_and_set_round_trip() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    controller.global("$counter").unwrap().set(PhpValue::Int(41)).await.unwrap();
    let read_back = eval(&controller, "$counter + 1").await.unwrap();
    assert_eq!(read_back, PhpValue::Int(42));

    let direct = controller.global("$counter").unwrap().get().await.unwrap();
    assert_eq!(direct, PhpValue::Int(41));

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn global_array_subscript_round_trips() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    eval(&controller, "$GLOBALS['bag'] = ['a' => 1, 'b' => 2]").await.unwrap();
    let value = controller.global("$bag").unwrap().index("b").unwrap().get().await.unwrap();
    assert_eq!(value, PhpValue::Int(2));

    controller.global("$bag").unwrap().index("c").unwrap().set(PhpValue::Int(3)).await.unwrap();
    let updated = eval(&controller, "$bag['c']").await.unwrap();
    assert_eq!(updated, PhpValue::Int(3));

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn root_constant_resolves() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    eval(&controller, "define('PHP_WORLD_TEST_CONST', 99); null").await.unwrap();
    let value = controller.global("PHP_WORLD_TEST_CONST").unwrap().get().await.unwrap();
    assert_eq!(value, PhpValue::Int(99));

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn php_exception_surfaces_as_remote_error() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    let err = eval(&controller, "throw new RuntimeException('boom')").await.unwrap_err();
    match err {
        php_world::Error::Remote { message, .. } => assert!(message.contains("boom")),
        other => panic!("expected a Remote error, got {other:?}"),
    }

    controller.exit().await.unwrap();
}
