//! php_world — a bidirectional embedding bridge between a host Rust runtime
//! and an external PHP interpreter.
//!
//! Remote PHP globals, constants, classes, static members, instance members,
//! methods, iterators, and evaluated snippets surface in the host as
//! transparent, chainable [`proxy::PhpProxy`] objects. Symmetrically, PHP
//! code that references `DenoWorld\*` symbols triggers callbacks that run
//! host-side constructors, properties, methods, invocations, iterators,
//! string conversions, and JSON encoding against objects registered in a
//! [`host::HostRegistry`].
//!
//! Two transport backends reach the PHP side: spawning a long-lived `php`
//! CLI child ([`config::TransportConfig::Cli`]), or issuing a FastCGI
//! request against a PHP-FPM pool ([`config::TransportConfig::Fpm`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use php_world::config::Config;
//! use php_world::controller::Controller;
//! use php_world::host::HostRegistry;
//!
//! # async fn run() -> Result<(), php_world::error::Error> {
//! let config = Config::from_env()?;
//! let controller = Controller::new(config, HostRegistry::new());
//! let eleven = controller.global("DENO_WORLD_VERSION")?.get().await?;
//! controller.exit().await?;
//! # Ok(())
//! # }
//! ```

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (8 chars) with optional "-dirty" suffix.
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)" or "0.1.0 (abc12345-dirty)".
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod config;
pub mod controller;
pub mod error;
pub mod fcgi;
pub mod framing;
pub mod handles;
pub mod host;
pub mod logging;
pub mod php_runtime;
pub mod proxy;
pub mod scheduler;
pub mod stdout_mux;
pub mod value;

pub use config::Config;
pub use controller::Controller;
pub use error::{Error, Result};
pub use host::HostRegistry;
pub use proxy::PhpProxy;
pub use value::PhpValue;
