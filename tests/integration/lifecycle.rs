//! Frame-scoped handle release, stdout demultiplexing, and process
//! teardown (§4.6).

use tokio::io::AsyncReadExt;

use php_world::value::PhpValue;

use crate::helpers::{php_available, spawn_controller};

async fn eval(controller: &php_world::Controller, expr: &str) -> php_world::Result<PhpValue> {
    controller.global("eval")?.call(vec![PhpValue::String(format!("return {expr};"))]).await
}

#[tokio::test]
async fn n_objects_reflects_live_php_handles() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    let before = controller.n_objects().await.unwrap();
    eval(&controller, "new stdClass()").await.unwrap();
    let after = controller.n_objects().await.unwrap();
    assert!(after > before, "expected n_objects to grow after allocating a PHP handle: {before} -> {after}");

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn pop_frame_releases_handles_allocated_since_push() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    let baseline = controller.n_objects().await.unwrap();
    controller.push_frame().await.unwrap();
    for _ in 0..5 {
        eval(&controller, "new stdClass()").await.unwrap();
    }
    let inflated = controller.n_objects().await.unwrap();
    assert!(inflated >= baseline + 5);

    controller.pop_frame().await.unwrap();
    let released = controller.n_objects().await.unwrap();
    assert!(released <= baseline, "pop_frame should release every handle allocated since push_frame");

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn pop_frame_without_push_frame_fails_locally() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    let err = controller.pop_frame().await.unwrap_err();
    assert!(matches!(err, php_world::Error::Validation(_)));

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn stdout_is_demultiplexed_from_protocol_traffic() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    let mut reader = controller.stdout_reader().await.expect("cli transport with PipedMux should expose a stdout reader");
    controller
        .global("eval")
        .unwrap()
        .call(vec![PhpValue::String("fwrite(STDOUT, 'hello-from-php'); return null;".into())])
        .await
        .unwrap();
    controller.end_stdout().await.unwrap();

    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "hello-from-php");

    controller.exit().await.unwrap();
}

#[tokio::test]
async fn exit_is_idempotent() {
    if !php_available() {
        eprintln!("skipping: no php binary on PATH");
        return;
    }
    let controller = spawn_controller().await;

    controller.exit().await.unwrap();
    controller.exit().await.unwrap();
}
