//! Windows message pump.
//!
//! Low-level hooks only fire while the installing thread pumps messages.

use std::sync::atomic::{AtomicU32, Ordering};
use windows::Win32::Foundation::{LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, GetMessageW, PostThreadMessageW, TranslateMessage, MSG, WM_QUIT,
};

/// Thread running the message loop, 0 when none.
static LOOP_THREAD_ID: AtomicU32 = AtomicU32::new(0);

/// Outcome of one `GetMessageW` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pumped {
    Message,
    Quit,
    Failed,
}

impl Pumped {
    /// `GetMessageW` returns 0 on `WM_QUIT` and -1 on error.
    fn from_ret(ret: i32) -> Self {
        match ret {
            0 => Pumped::Quit,
            r if r > 0 => Pumped::Message,
            _ => Pumped::Failed,
        }
    }
}

/// Pumps messages on the calling thread until `WM_QUIT` arrives or
/// `GetMessageW` fails.
pub fn run_message_loop() {
    let thread_id = unsafe { GetCurrentThreadId() };
    LOOP_THREAD_ID.store(thread_id, Ordering::SeqCst);

    tracing::debug!(thread_id, "Message loop starting");

    let mut msg = MSG::default();
    loop {
        let ret = unsafe { GetMessageW(&mut msg, None, 0, 0) }.0;
        match Pumped::from_ret(ret) {
            Pumped::Message => unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            },
            Pumped::Quit => break,
            Pumped::Failed => {
                tracing::error!(
                    error = %std::io::Error::last_os_error(),
                    "GetMessageW failed, stopping message loop"
                );
                break;
            }
        }
    }

    LOOP_THREAD_ID.store(0, Ordering::SeqCst);
    tracing::debug!("Message loop exited");
}

/// Asks the message loop to exit. Safe to call from any thread.
pub fn post_quit_message(exit_code: i32) {
    let thread_id = LOOP_THREAD_ID.load(Ordering::SeqCst);
    if thread_id == 0 {
        tracing::warn!("Message loop not running, cannot post quit message");
        return;
    }

    let result = unsafe {
        PostThreadMessageW(thread_id, WM_QUIT, WPARAM(exit_code as usize), LPARAM(0))
    };
    match result {
        Ok(()) => tracing::debug!(exit_code, thread_id, "Posted quit message"),
        Err(e) => tracing::error!(?e, "Failed to post quit message"),
    }
}
