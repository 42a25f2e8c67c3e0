use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::models::ContextSnapshot;

/// Source of foreground-context snapshots.
///
/// Implementations never fail: anything that goes wrong (permission denied,
/// unscriptable app, timeout) is reported as `ContextSnapshot::unknown()`.
#[async_trait]
pub trait ContextObserver: Send + Sync {
    async fn observe(&self) -> ContextSnapshot;
}

const FRONT_APP_SCRIPT: &str = r#"
tell application "System Events"
    set frontApp to name of first application process whose frontmost is true
    return frontApp
end tell
"#;

/// Queries the OS through its scripting tools (`osascript` on macOS,
/// `xdotool` on Linux). Every external call is bounded by `call_timeout`.
#[derive(Debug, Clone)]
pub struct SystemObserver {
    call_timeout: Duration,
}

impl SystemObserver {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.call_timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => {
                debug!("{program} exited with {}", output.status);
                None
            }
            Ok(Err(err)) => {
                debug!("failed to spawn {program}: {err}");
                None
            }
            Err(_) => {
                debug!("{program} timed out after {:?}", self.call_timeout);
                None
            }
        }
    }

    async fn osascript(&self, script: &str) -> Option<String> {
        self.run("osascript", &["-e", script]).await
    }

    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    async fn observe_macos(&self) -> Option<ContextSnapshot> {
        let application = self.osascript(FRONT_APP_SCRIPT).await?;
        if application.is_empty() {
            return None;
        }

        if let Some(script) = active_tab_script(&application) {
            if let Some(tab) = self.osascript(&script).await.filter(|tab| !tab.is_empty()) {
                return Some(ContextSnapshot::new(application, tab));
            }
        }

        let title = self
            .osascript(&front_window_script(&application))
            .await
            .unwrap_or_default();
        Some(ContextSnapshot::new(application, title))
    }

    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    async fn observe_linux(&self) -> Option<ContextSnapshot> {
        let title = self
            .run("xdotool", &["getactivewindow", "getwindowname"])
            .await?;
        let pid = self
            .run("xdotool", &["getactivewindow", "getwindowpid"])
            .await
            .and_then(|raw| raw.parse::<u32>().ok());

        let process_name = match pid {
            Some(pid) => tokio::task::spawn_blocking(move || process_name(pid))
                .await
                .ok()
                .flatten(),
            None => None,
        };

        let application = process_name.unwrap_or_else(|| application_from_title(&title));
        if application.is_empty() {
            return None;
        }
        Some(ContextSnapshot::new(application, title))
    }
}

#[async_trait]
impl ContextObserver for SystemObserver {
    async fn observe(&self) -> ContextSnapshot {
        #[cfg(target_os = "macos")]
        let snapshot = self.observe_macos().await;

        #[cfg(target_os = "linux")]
        let snapshot = self.observe_linux().await;

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        let snapshot: Option<ContextSnapshot> = None;

        snapshot.unwrap_or_else(ContextSnapshot::unknown)
    }
}

fn process_name(pid: u32) -> Option<String> {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system
        .process(pid)
        .map(|process| process.name().to_string_lossy().into_owned())
}

/// Window titles usually end with `- Application`.
fn application_from_title(title: &str) -> String {
    match title.rsplit_once('-') {
        Some((_, tail)) => tail.trim().to_string(),
        None => title.trim().to_string(),
    }
}

fn escape_applescript(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Script returning `URL - title` of the active tab, for browsers that expose it.
fn active_tab_script(application: &str) -> Option<String> {
    let app = escape_applescript(application);
    if application.contains("Chrome") || application.contains("Chromium") {
        Some(format!(
            r#"
tell application "{app}"
    if (count of windows) > 0 then
        set currentTab to active tab of front window
        return URL of currentTab & " - " & title of currentTab
    end if
end tell
"#
        ))
    } else if application.contains("Safari") {
        Some(format!(
            r#"
tell application "{app}"
    if (count of windows) > 0 then
        set currentTab to current tab of front window
        return URL of currentTab & " - " & name of currentTab
    end if
end tell
"#
        ))
    } else {
        None
    }
}

fn front_window_script(application: &str) -> String {
    let app = escape_applescript(application);
    format!(
        r#"
tell application "System Events"
    tell application process "{app}"
        if (count of windows) > 0 then
            return name of front window
        end if
    end tell
end tell
"#
    )
}
