// Daemon module
//
// Single-instance locking, stale-instance replacement and detached
// re-execution for running ginga in the background.

pub mod lifecycle;
pub mod lock;
pub mod spawn;

pub use lifecycle::{instance_status, replace_stale_instance, stop_instance, InstanceStatus};
pub use lock::{detect_holder, is_locked, process_exists, terminate, wait_for_release, LockGuard};
pub use spawn::{child_args, launch_daemon, spawn_detached, DAEMON_MODE};
