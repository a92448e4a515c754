use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Display window before a notification auto-dismisses.
pub const DISPLAY_TIMEOUT_MS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    Default,
    Unsupported,
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub title: String,
    pub body: String,
    /// Stable identity for the logical notification (e.g. one per
    /// task id), for logging and de-duplication in tests.
    pub tag: String,
}

/// Seam between scheduling policy and the platform notification
/// backend; tests inject recording fakes.
pub trait Notifier {
    fn permission(&self) -> Permission;

    /// The only entry point allowed to prompt the user or probe the
    /// platform. Errors are soft: the scheduler stays inactive.
    fn request_permission(&mut self) -> anyhow::Result<Permission>;

    fn send(&self, note: &Note) -> anyhow::Result<()>;
}

/// Desktop backend. There is no interactive permission dialog here;
/// "requesting permission" probes that a notification server is
/// actually reachable.
#[derive(Debug)]
pub struct DesktopNotifier {
    permission: Permission,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            permission: Permission::Default,
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for DesktopNotifier {
    fn permission(&self) -> Permission {
        self.permission
    }

    fn request_permission(&mut self) -> anyhow::Result<Permission> {
        self.permission = match probe_backend() {
            Ok(()) => {
                info!("notification backend reachable");
                Permission::Granted
            }
            Err(err) => {
                warn!(error = %err, "notification backend unavailable");
                Permission::Unsupported
            }
        };
        Ok(self.permission)
    }

    fn send(&self, note: &Note) -> anyhow::Result<()> {
        debug!(tag = %note.tag, title = %note.title, "showing desktop notification");
        notify_rust::Notification::new()
            .summary(&note.title)
            .body(&note.body)
            .appname("twig")
            .timeout(notify_rust::Timeout::Milliseconds(DISPLAY_TIMEOUT_MS))
            .show()
            .map(|_| ())
            .map_err(|err| anyhow!("failed to show notification ({}): {err}", note.tag))
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn probe_backend() -> anyhow::Result<()> {
    notify_rust::get_server_information()
        .map(|_| ())
        .map_err(|err| anyhow!("no notification server: {err}"))
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn probe_backend() -> anyhow::Result<()> {
    Ok(())
}
