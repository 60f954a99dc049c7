//! Low-level Windows hook callbacks.
//!
//! The hook procs execute synchronously in the Windows input pipeline and
//! receive no user context, so they reach the [`EventSink`] through a
//! process-wide cell set once at startup. The sink only takes a short lock;
//! nothing here allocates or performs I/O.

use super::{EventSink, SourceHealth};
use crate::error::SourceError;
use crate::winapi_utils::{call_next_hook, HookGuard};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    HC_ACTION, MSLLHOOKSTRUCT, WM_KEYDOWN, WM_LBUTTONDOWN, WM_MBUTTONDOWN, WM_MOUSEMOVE,
    WM_RBUTTONDOWN, WM_SYSKEYDOWN, WM_XBUTTONDOWN,
};

static SINK: OnceCell<Arc<EventSink>> = OnceCell::new();

/// Installs the sink the hook procs report to.
///
/// Returns false if a sink was already installed.
pub fn install_sink(sink: Arc<EventSink>) -> bool {
    SINK.set(sink).is_ok()
}

/// Holds both hooks; dropping it unhooks them.
pub struct WindowsHooks {
    _keyboard: HookGuard,
    _mouse: HookGuard,
}

/// Installs the keyboard and mouse hooks on the calling thread.
///
/// The calling thread must run a message loop afterwards.
pub fn start_windows_hooks(
    sink: Arc<EventSink>,
    health: &SourceHealth,
) -> Result<WindowsHooks, SourceError> {
    if !install_sink(sink) {
        tracing::debug!("Hook sink already installed");
    }

    let hooks = HookGuard::install_keyboard_hook(Some(keyboard_hook_proc))
        .and_then(|keyboard| {
            HookGuard::install_mouse_hook(Some(mouse_hook_proc)).map(|mouse| WindowsHooks {
                _keyboard: keyboard,
                _mouse: mouse,
            })
        })
        .map_err(|e| SourceError::Disconnected(format!("SetWindowsHookExW failed: {e}")));

    match &hooks {
        Ok(_) => health.set_connected("windows_hooks"),
        Err(e) => health.set_disconnected(e.to_string()),
    }
    hooks
}

/// Low-level keyboard hook callback.
///
/// Counts WM_KEYDOWN and WM_SYSKEYDOWN; key-up is ignored.
///
/// # Safety
/// Called by Windows on the thread that installed the hook.
pub unsafe extern "system" fn keyboard_hook_proc(
    code: i32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if code == HC_ACTION as i32 {
        let msg = wparam.0 as u32;
        if msg == WM_KEYDOWN || msg == WM_SYSKEYDOWN {
            if let Some(sink) = SINK.get() {
                sink.key_press();
            }
        }
    }

    // Always pass the event on
    call_next_hook(code, wparam, lparam)
}

/// Low-level mouse hook callback.
///
/// Counts button-down events as clicks and reports cursor positions for
/// distance tracking.
///
/// # Safety
/// Called by Windows on the thread that installed the hook. For
/// `HC_ACTION`, `lparam` points to a valid `MSLLHOOKSTRUCT`.
pub unsafe extern "system" fn mouse_hook_proc(
    code: i32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if code == HC_ACTION as i32 {
        if let Some(sink) = SINK.get() {
            match wparam.0 as u32 {
                WM_LBUTTONDOWN | WM_RBUTTONDOWN | WM_MBUTTONDOWN | WM_XBUTTONDOWN => {
                    sink.mouse_click();
                }
                WM_MOUSEMOVE => {
                    let info = &*(lparam.0 as *const MSLLHOOKSTRUCT);
                    sink.mouse_moved_to(info.pt.x as f64, info.pt.y as f64);
                }
                _ => {}
            }
        }
    }

    call_next_hook(code, wparam, lparam)
}
