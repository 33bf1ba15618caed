/// Windows login registration via the `HKCU\...\Run` registry key.
///
/// `--register-startup` stores `"<exe>" --startup` so that a login launch
/// skips the startup announcement; `--unregister-startup` removes it.
///
/// On non-Windows platforms both functions compile and succeed as no-ops.
use std::path::Path;

use anyhow::{Context, Result};
#[cfg(windows)]
use tracing::info;

/// Flag passed to login launches.
pub const STARTUP_FLAG: &str = "--startup";

/// Command line stored in the registry for `exe`.
pub fn startup_command(exe: &Path) -> String {
    format!("\"{}\" {STARTUP_FLAG}", exe.display())
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "LogChime";

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Writes `command` to `HKCU\...\Run\LogChime`, replacing any previous value.
    pub fn register(command: &str) -> Result<()> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(VALUE_NAME);
        let data_w = to_wide(command);
        // SAFETY: reinterpreting an initialized u16 buffer as bytes.
        let data_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(data_w.as_ptr() as *const u8, data_w.len() * 2)
        };

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_SET_VALUE,
                None,
                &mut hkey,
                None,
            )
        };
        if err != ERROR_SUCCESS {
            bail!("RegCreateKeyExW failed: {err:?}");
        }

        let err = unsafe {
            RegSetValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), 0, REG_SZ, Some(data_bytes))
        };
        unsafe {
            let _ = RegCloseKey(hkey);
        }

        if err != ERROR_SUCCESS {
            bail!("RegSetValueExW failed: {err:?}");
        }
        Ok(())
    }

    /// Removes `HKCU\...\Run\LogChime`. A missing key or value is not an error.
    pub fn unregister() -> Result<()> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(VALUE_NAME);

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegOpenKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                KEY_SET_VALUE,
                &mut hkey,
            )
        };
        if err != ERROR_SUCCESS {
            return Ok(());
        }

        let err = unsafe { RegDeleteValueW(hkey, PCWSTR::from_raw(val_w.as_ptr())) };
        unsafe {
            let _ = RegCloseKey(hkey);
        }

        if err != ERROR_SUCCESS && err != ERROR_FILE_NOT_FOUND {
            bail!("RegDeleteValueW failed: {err:?}");
        }
        Ok(())
    }
}

// ── Public API ─────────────────────────────────────────────────────────────────

/// Registers the running binary to launch with [`STARTUP_FLAG`] at login.
pub fn register_startup() -> Result<()> {
    let exe = std::env::current_exe().context("failed to locate executable")?;
    let command = startup_command(&exe);
    #[cfg(windows)]
    {
        imp::register(&command)?;
        info!(%command, "registered for login startup");
    }
    #[cfg(not(windows))]
    {
        tracing::warn!(%command, "login startup registration is only supported on Windows");
    }
    Ok(())
}

/// Removes the login registration, if present.
pub fn unregister_startup() -> Result<()> {
    #[cfg(windows)]
    {
        imp::unregister()?;
        info!("removed from login startup");
    }
    #[cfg(not(windows))]
    {
        tracing::warn!("login startup registration is only supported on Windows");
    }
    Ok(())
}
