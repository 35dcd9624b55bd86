// Detached re-execution
//
// `daemon` mode re-runs the current executable without the mode token, in a
// process group of its own so that signals the shell sends to the foreground
// group (SIGINT, SIGHUP) never reach the background instance.
//
// This is fire-and-forget: the child inherits the parent's stdout/stderr,
// and the parent exits right after spawning. Whatever the child logs after
// that lands wherever those descriptors point; set `logging.file` to keep a
// durable record.

use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

use super::lifecycle::replace_stale_instance;
use crate::errors::LaunchError;

/// Mode token that selects background launch
pub const DAEMON_MODE: &str = "daemon";

/// Flags whose next argument is their value, in single- and double-dash form
const VALUE_FLAGS: &[&str] = &["-ip", "--ip", "-config", "--config"];

/// Arguments for the detached child: `argv` minus the program name and the
/// positional mode token (matched case-insensitively)
///
/// The token is removed wherever it appears, so `ginga -ip host:port daemon`
/// does not hand `daemon` back to the child. Flag values are never treated as
/// the token, which keeps `-config daemon` intact.
pub fn child_args<I, S>(argv: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut args = Vec::new();
    let mut stripped = false;
    let mut expects_value = false;

    for arg in argv.into_iter().skip(1).map(Into::into) {
        if expects_value {
            expects_value = false;
        } else if is_value_flag(&arg) {
            expects_value = true;
        } else if !stripped && is_daemon_token(&arg) {
            stripped = true;
            continue;
        }
        args.push(arg);
    }
    args
}

fn is_value_flag(arg: &OsStr) -> bool {
    arg.to_str().map_or(false, |s| VALUE_FLAGS.contains(&s))
}

fn is_daemon_token(arg: &OsStr) -> bool {
    arg.to_str()
        .map_or(false, |s| s.eq_ignore_ascii_case(DAEMON_MODE))
}

/// Spawn `exe` with `args` in a new process group
///
/// stdin is closed; stdout and stderr are shared with the caller.
pub fn spawn_detached(exe: &Path, args: &[OsString]) -> Result<Child, LaunchError> {
    let mut command = Command::new(exe);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().map_err(|source| LaunchError::Spawn {
        exe: exe.to_path_buf(),
        source,
    })?;

    debug!(exe = %exe.display(), pid = child.id(), "Detached child spawned");
    Ok(child)
}

/// Replace any stale instance, then start a detached copy of `exe`
///
/// Prints the child's PID for the operator and returns the child handle.
/// The caller is expected to exit immediately afterwards.
pub async fn launch_daemon(
    exe: &Path,
    args: &[OsString],
    lock_path: &Path,
    stale_wait: Duration,
) -> Result<Child, LaunchError> {
    if let Some(pid) = replace_stale_instance(lock_path, stale_wait).await? {
        info!(pid = pid, "Replaced previous instance");
    }

    info!(exe = %exe.display(), args = ?args, "Spawning daemon subprocess");
    let child = spawn_detached(exe, args)?;
    println!("{} [PID] {} running...", exe.display(), child.id());

    Ok(child)
}
