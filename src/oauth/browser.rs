//! Usage: Open the authorization URL in the user's browser.

use crate::shared::error::AppResult;
use std::process::Command;

/// Capability used by the flow to show the consent page. Failures are not fatal: the
/// URL is always printed so the user can open it by hand.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> AppResult<()>;
}

/// Platform default browser (`open`, `xdg-open`, or the Windows URL protocol handler).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> AppResult<()> {
        let mut cmd = open_browser_command(url)?;
        cmd.spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        Ok(())
    }
}

/// Never opens anything; the user follows the printed URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBrowser;

impl BrowserLauncher for NoBrowser {
    fn open(&self, _url: &str) -> AppResult<()> {
        Err("SYSTEM_ERROR: browser launch disabled".into())
    }
}

fn open_browser_command(url: &str) -> AppResult<Command> {
    #[cfg(target_os = "windows")]
    {
        let mut cmd = Command::new("rundll32.exe");
        // `explorer <url>` may open File Explorer for some URL shapes.
        cmd.arg("url.dll,FileProtocolHandler").arg(url);
        return Ok(cmd);
    }

    #[cfg(target_os = "macos")]
    {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        return Ok(cmd);
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        return Ok(cmd);
    }

    #[allow(unreachable_code)]
    Err("SYSTEM_ERROR: browser open is unsupported on this platform".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(all(unix, not(target_os = "macos")))]
    #[test]
    fn linux_browser_command_uses_xdg_open() {
        let cmd = open_browser_command("https://example.com/auth?x=1&y=2").unwrap();
        assert_eq!(cmd.get_program(), std::ffi::OsStr::new("xdg-open"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["https://example.com/auth?x=1&y=2"]);
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn windows_browser_command_uses_protocol_handler() {
        let cmd = open_browser_command("https://example.com/auth?x=1&y=2").unwrap();
        assert_eq!(cmd.get_program(), std::ffi::OsStr::new("rundll32.exe"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec!["url.dll,FileProtocolHandler", "https://example.com/auth?x=1&y=2"]
        );
    }

    #[test]
    fn no_browser_always_declines() {
        assert!(NoBrowser.open("https://example.com").is_err());
    }
}
