//! Windows hook installation and management.

use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, SetWindowsHookExW, UnhookWindowsHookEx, HHOOK, HOOKPROC, WH_KEYBOARD_LL,
    WH_MOUSE_LL, WINDOWS_HOOK_ID,
};

/// RAII guard for a low-level hook; unhooks on drop.
pub struct HookGuard {
    handle: HHOOK,
    hook_type: &'static str,
}

impl HookGuard {
    fn install(
        hook_id: WINDOWS_HOOK_ID,
        callback: HOOKPROC,
        hook_type: &'static str,
    ) -> windows::core::Result<Self> {
        let handle = unsafe { SetWindowsHookExW(hook_id, callback, None, 0)? };
        tracing::info!(hook_type, "Hook installed");
        Ok(Self { handle, hook_type })
    }

    /// Installs a `WH_KEYBOARD_LL` hook.
    ///
    /// The installing thread must pump messages or Windows drops the hook.
    pub fn install_keyboard_hook(callback: HOOKPROC) -> windows::core::Result<Self> {
        Self::install(WH_KEYBOARD_LL, callback, "keyboard_ll")
    }

    /// Installs a `WH_MOUSE_LL` hook.
    pub fn install_mouse_hook(callback: HOOKPROC) -> windows::core::Result<Self> {
        Self::install(WH_MOUSE_LL, callback, "mouse_ll")
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        match unsafe { UnhookWindowsHookEx(self.handle) } {
            Ok(_) => tracing::info!(hook_type = self.hook_type, "Hook uninstalled"),
            Err(e) => tracing::error!(
                hook_type = self.hook_type,
                error = ?e,
                "Failed to unhook"
            ),
        }
    }
}

/// Passes the event to the next hook in the chain.
#[inline(always)]
pub fn call_next_hook(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    unsafe { CallNextHookEx(None, code, wparam, lparam) }
}
