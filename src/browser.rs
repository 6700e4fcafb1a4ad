//! External browser launch.

use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::error::{AccessError, Result};

/// Opens a URL outside the console. Completion of whatever happens there is
/// reported back through a deep link, never through this call.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Launches the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        let mut command = platform_command(url);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        spawn_reaped(command).map(|_| ())
    }
}

/// Spawn `command` and wait for it on a detached thread so the exited
/// launcher never lingers as a zombie. Returns the child's pid and the
/// waiting thread.
fn spawn_reaped(mut command: Command) -> Result<(u32, JoinHandle<()>)> {
    let mut child = command
        .spawn()
        .map_err(|e| AccessError::Launch(e.to_string()))?;
    let pid = child.id();
    let waiter = thread::spawn(move || match child.wait() {
        Ok(status) => debug!(pid, %status, "browser launcher exited"),
        Err(e) => debug!(pid, error = %e, "waiting on browser launcher failed"),
    });
    Ok((pid, waiter))
}

#[cfg(target_os = "macos")]
fn platform_command(url: &str) -> Command {
    let mut command = Command::new("open");
    command.arg(url);
    command
}

#[cfg(target_os = "windows")]
fn platform_command(url: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", url]);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_command(url: &str) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    command
}
