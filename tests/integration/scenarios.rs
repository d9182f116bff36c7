//! End-to-end scenarios drawn straight from the properties this bridge is
//! meant to satisfy: class constants/static members, property set/delete
//! down to `undefined`, and raw-byte string round-tripping.

use php_world::value::PhpValue;

use crate::helpers::{php_available, spawn_controller};

async fn eval(controller: &php_world::Controller, body: &str) -> php_world::Result<PhpValue> {
    controller.global("eval")?.call(vec![PhpValue::String(body.to_string())]).await
}

#[tokio::test]
async fn class_constant_and_static_member_and_static_method() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    eval(
        &controller,
        "class PhpWorldScenarioC { \
             public const TEN = 10; \
             public static $var = 'hello'; \
             public static function get_eleven() { return 11; } \
         } return null;",
    )
    .await
    .unwrap();

    let class = controller.class("PhpWorldScenarioC").unwrap();
    assert_eq!(class.prop("TEN").unwrap().get().await.unwrap(), PhpValue::Int(10));
    assert_eq!(
        class.static_var("var").unwrap().get().await.unwrap(),
        PhpValue::String("hello".into())
    );
    assert_eq!(
        class.prop("get_eleven").unwrap().call(vec![]).await.unwrap(),
        PhpValue::Int(11)
    );

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn property_set_read_delete_goes_to_null() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    eval(&controller, "$GLOBALS['var'] = new stdClass(); return null;").await.unwrap();
    let var = controller.global("$var").unwrap();
    var.index("a").unwrap().set(PhpValue::Int(10)).await.unwrap();
    assert_eq!(var.index("a").unwrap().get().await.unwrap(), PhpValue::Int(10));

    controller.global("$var").unwrap().delete().await.unwrap();
    let after = eval(&controller, "return isset($var) ? 'set' : 'gone';").await.unwrap();
    assert_eq!(after, PhpValue::String("gone".into()));
    assert_eq!(controller.global("$var").unwrap().get().await.unwrap(), PhpValue::Undefined);

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn binary_bytes_round_trip_through_php_substr() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    let raw: String = (0u8..=255u8).map(|b| b as char).collect();
    let result = controller
        .global("substr")
        .unwrap()
        .call(vec![PhpValue::String(raw.clone()), PhpValue::Int(0), PhpValue::Int(1000)])
        .await
        .unwrap();
    assert_eq!(result, PhpValue::String(raw));

    controller.exit().await.unwrap();
}
