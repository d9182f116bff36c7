//! Packaging for the PHP-side half of the bridge (§4.7).
//!
//! The bootstrap script is versioned alongside the Rust source and embedded
//! as a build artifact rather than shelled out to with `php -f`, so the CLI
//! transport can hand it to `php -r` directly and the FPM transport can
//! write it to a known path for `SCRIPT_FILENAME` to point at.

use std::io::Write;
use std::path::Path;

/// The PHP-side runtime, embedded verbatim.
pub const BOOTSTRAP_PHP: &str = include_str!("bootstrap.php");

/// Writes [`BOOTSTRAP_PHP`] to `path`, creating parent directories as
/// needed. Used by the FPM transport, which needs the script to exist on
/// disk for `SCRIPT_FILENAME` (§4.7 "bootstrap packaging").
pub fn write_bootstrap_to(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(BOOTSTRAP_PHP.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_script_is_not_empty() {
        assert!(BOOTSTRAP_PHP.contains("<?php"));
    }

    #[test]
    fn write_bootstrap_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/bootstrap.php");
        write_bootstrap_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), BOOTSTRAP_PHP);
    }
}
