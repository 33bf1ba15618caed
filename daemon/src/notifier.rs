/// Desktop notifications.
///
/// The default [`DesktopNotifier`] hands the notification to a platform
/// helper process and does not wait for it:
///   - Windows: a PowerShell one-liner that shows a WinRT toast;
///   - elsewhere: `notify-send`.
///
/// The child is reaped in the background by tokio, so this must be called
/// from within a runtime.
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{MonitorError, Result};

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// AUMID registered by Windows PowerShell; toasts from unregistered apps are
/// silently dropped, so they are posted under this one.
#[cfg(windows)]
const POWERSHELL_APP_ID: &str =
    r"{1AC14E77-02E7-4E5D-B744-2EB1AE5198B7}\WindowsPowerShell\v1.0\powershell.exe";

#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    #[cfg(windows)]
    fn command(&self, title: &str, message: &str) -> Command {
        let mut cmd = Command::new("powershell.exe");
        cmd.args(["-NoProfile", "-NonInteractive", "-WindowStyle", "Hidden", "-Command"])
            .arg(toast_script(POWERSHELL_APP_ID, title, message));
        // CREATE_NO_WINDOW
        cmd.creation_flags(0x0800_0000);
        cmd
    }

    #[cfg(not(windows))]
    fn command(&self, title: &str, message: &str) -> Command {
        let mut cmd = Command::new("notify-send");
        cmd.arg(format!("--app-name={}", self.app_name))
            .arg(title)
            .arg(message);
        cmd
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        self.command(title, message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
            .map_err(|e| MonitorError::Notification(format!("{}: {e}", self.app_name)))
    }
}

/// Escapes text for inclusion in the toast XML.
fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// PowerShell script that shows a `ToastGeneric` toast. Every interpolated
/// value sits inside a single-quoted PowerShell string, where the only
/// special character is `'`; the XML escaping already removed it.
#[cfg_attr(not(windows), allow(dead_code))]
fn toast_script(app_id: &str, title: &str, message: &str) -> String {
    let xml = format!(
        r#"<toast><visual><binding template="ToastGeneric"><text>{}</text><text>{}</text></binding></visual></toast>"#,
        xml_escape(title),
        xml_escape(message)
    );
    format!(
        "[Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] | Out-Null; \
         [Windows.Data.Xml.Dom.XmlDocument, Windows.Data.Xml.Dom.XmlDocument, ContentType = WindowsRuntime] | Out-Null; \
         $xml = New-Object Windows.Data.Xml.Dom.XmlDocument; \
         $xml.LoadXml('{xml}'); \
         $toast = New-Object Windows.UI.Notifications.ToastNotification $xml; \
         [Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier('{}').Show($toast)",
        app_id.replace('\'', "''")
    )
}
