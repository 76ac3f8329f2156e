//! Exports install-path configuration, in the style of the teacher's own
//! `buildcfg.rs`: a handful of named constants plus a `configdir!`-style
//! helper macro rather than a config struct.

/// The default configuration directory.
pub const CONFIGDIR: &str = "/etc/ringstore";

#[macro_export]
macro_rules! RINGSTORE_RUN_DIR_M { () => ("/run/ringstore") }

#[macro_export]
macro_rules! RINGSTORE_STATE_DIR_M { () => ("/var/lib/ringstore") }

/// namespaced directory for in-memory (tmpfs) run state
pub const RINGSTORE_RUN_DIR: &str = RINGSTORE_RUN_DIR_M!();

/// namespaced directory for on-disk node stores and the catalog mirror
pub const RINGSTORE_STATE_DIR: &str = RINGSTORE_STATE_DIR_M!();

/// the PID filename for the server daemon
pub const RINGSTORE_SERVER_PID_FN: &str = concat!(RINGSTORE_RUN_DIR_M!(), "/server.pid");

/// Prepend the configuration directory to a file name.
///
/// #### Example:
/// ```
/// # #[macro_use] extern crate ringstore;
/// let cfg_path = configdir!("/config.toml");
/// ```
#[macro_export]
macro_rules! configdir {
    ($subdir:expr) => (concat!("/etc/ringstore", $subdir))
}

/// Prepend the state directory to a file name.
#[macro_export]
macro_rules! statedir {
    ($subdir:expr) => {
        concat!(RINGSTORE_STATE_DIR_M!(), $subdir)
    };
}
