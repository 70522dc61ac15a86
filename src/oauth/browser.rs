//! Usage: "Open this URL" capability handed to the flow coordinator.

use std::process::Command;

/// Fire-and-forget: the flow does not wait for, or learn about, the outcome.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str);
}

impl<F> BrowserOpener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn open(&self, url: &str) {
        self(url)
    }
}

/// Launches the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) {
        match open_command(url).and_then(|mut cmd| cmd.spawn().map_err(|e| e.to_string())) {
            Ok(_) => tracing::debug!("browser launched for oauth authorization"),
            Err(err) => tracing::warn!("failed to open browser; open the authorization url manually: {err}"),
        }
    }
}

#[cfg(target_os = "windows")]
fn open_command(url: &str) -> Result<Command, String> {
    let mut cmd = Command::new("rundll32.exe");
    // `explorer <url>` may open File Explorer for some URL shapes.
    cmd.arg("url.dll,FileProtocolHandler").arg(url);
    Ok(cmd)
}

#[cfg(target_os = "macos")]
fn open_command(url: &str) -> Result<Command, String> {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    Ok(cmd)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn open_command(url: &str) -> Result<Command, String> {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    Ok(cmd)
}

#[cfg(not(any(unix, target_os = "windows")))]
fn open_command(_url: &str) -> Result<Command, String> {
    Err("browser open is unsupported on this platform".to_string())
}
