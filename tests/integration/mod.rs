//! Integration tests for php_world
//!
//! These tests spawn a real `php` CLI interpreter per test and drive it
//! through the public `Controller`/`PhpProxy` surface end to end — no
//! mocked transport. A test is skipped (logged, not failed) when no usable
//! `php` binary is found on `PATH`; override the binary with
//! `PHP_WORLD_TEST_PHP_BINARY`.
//!
//! Run with: cargo test --test integration

mod helpers;

mod eval_and_globals;
mod host_callbacks;
mod lifecycle;
mod scenarios;
