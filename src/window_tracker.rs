//! Locating the chart window and its screen origin.
//!
//! Window-manager access is a capability behind [`WindowLocator`]. The xcap
//! backend enumerates top-level windows; raising a window is only wired up on
//! Windows, where the charting application runs.

use crate::types::{WindowAnchor, WindowError};
use tracing::{debug, info, warn};

/// Opaque reference to a located window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    /// Platform window id
    pub id: u32,
    /// Full title at lookup time
    pub title: String,
}

/// Window-manager capability
pub trait WindowLocator: Send + Sync {
    /// First window whose title contains `needle`, case-insensitively
    fn find_window(&self, needle: &str) -> Result<WindowHandle, WindowError>;

    /// Current absolute screen origin of the window
    fn window_origin(&self, handle: &WindowHandle) -> Result<WindowAnchor, WindowError>;

    /// Restore and raise the window
    fn bring_to_front(&self, handle: &WindowHandle) -> Result<(), WindowError>;
}

/// Case-insensitive substring containment
pub fn title_matches(title: &str, needle: &str) -> bool {
    title.to_lowercase().contains(&needle.to_lowercase())
}

/// Find the window, optionally raise it, and read its origin.
///
/// A failed raise is logged and ignored; only a missing window is an error.
pub fn acquire_anchor(
    locator: &dyn WindowLocator,
    title: &str,
    raise: bool,
) -> Result<WindowAnchor, WindowError> {
    let handle = locator.find_window(title)?;
    debug!("Found window {} ({:?})", handle.id, handle.title);

    if raise {
        if let Err(e) = locator.bring_to_front(&handle) {
            warn!("Could not bring {:?} to front: {}", handle.title, e);
        }
    }

    let anchor = locator.window_origin(&handle)?;
    info!(
        "Anchored to {:?} at ({}, {})",
        handle.title, anchor.x, anchor.y
    );
    Ok(anchor)
}

/// xcap-backed window locator
pub struct XcapWindows;

impl XcapWindows {
    pub fn new() -> Self {
        Self
    }

    fn all() -> Result<Vec<xcap::Window>, WindowError> {
        xcap::Window::all().map_err(|e| WindowError::Backend(format!("window list: {e}")))
    }

    fn by_id(id: u32) -> Result<xcap::Window, WindowError> {
        Self::all()?
            .into_iter()
            .find(|w| w.id().map(|wid| wid == id).unwrap_or(false))
            .ok_or_else(|| WindowError::NotFound(format!("window id {id}")))
    }
}

impl Default for XcapWindows {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowLocator for XcapWindows {
    fn find_window(&self, needle: &str) -> Result<WindowHandle, WindowError> {
        for window in Self::all()? {
            let title = match window.title() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if !title_matches(&title, needle) {
                continue;
            }
            let id = window
                .id()
                .map_err(|e| WindowError::Backend(format!("window id: {e}")))?;
            return Ok(WindowHandle { id, title });
        }
        Err(WindowError::NotFound(needle.to_string()))
    }

    fn window_origin(&self, handle: &WindowHandle) -> Result<WindowAnchor, WindowError> {
        let window = Self::by_id(handle.id)?;
        let x = window
            .x()
            .map_err(|e| WindowError::Backend(format!("window x: {e}")))?;
        let y = window
            .y()
            .map_err(|e| WindowError::Backend(format!("window y: {e}")))?;
        Ok(WindowAnchor::new(x, y))
    }

    fn bring_to_front(&self, handle: &WindowHandle) -> Result<(), WindowError> {
        platform::raise(handle.id)
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use windows_sys::Win32::Foundation::HWND;
    use windows_sys::Win32::UI::WindowsAndMessaging::{SetForegroundWindow, ShowWindow, SW_RESTORE};

    pub fn raise(id: u32) -> Result<(), WindowError> {
        let hwnd = id as usize as HWND;
        unsafe {
            ShowWindow(hwnd, SW_RESTORE);
            if SetForegroundWindow(hwnd) == 0 {
                return Err(WindowError::Backend("SetForegroundWindow refused".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(not(target_os = "windows"))]
mod platform {
    use super::*;

    pub fn raise(_id: u32) -> Result<(), WindowError> {
        Err(WindowError::Unsupported("bring to front"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory window list
    pub(crate) struct FakeWindows {
        pub windows: Mutex<Vec<(WindowHandle, WindowAnchor)>>,
        pub raised: AtomicUsize,
        pub raise_fails: bool,
    }

    impl FakeWindows {
        pub(crate) fn with(title: &str, anchor: WindowAnchor) -> Self {
            Self {
                windows: Mutex::new(vec![(
                    WindowHandle {
                        id: 1,
                        title: title.to_string(),
                    },
                    anchor,
                )]),
                raised: AtomicUsize::new(0),
                raise_fails: false,
            }
        }

        pub(crate) fn move_to(&self, anchor: WindowAnchor) {
            for entry in self.windows.lock().unwrap().iter_mut() {
                entry.1 = anchor;
            }
        }
    }

    impl WindowLocator for FakeWindows {
        fn find_window(&self, needle: &str) -> Result<WindowHandle, WindowError> {
            self.windows
                .lock()
                .unwrap()
                .iter()
                .find(|(h, _)| title_matches(&h.title, needle))
                .map(|(h, _)| h.clone())
                .ok_or_else(|| WindowError::NotFound(needle.to_string()))
        }

        fn window_origin(&self, handle: &WindowHandle) -> Result<WindowAnchor, WindowError> {
            self.windows
                .lock()
                .unwrap()
                .iter()
                .find(|(h, _)| h.id == handle.id)
                .map(|(_, a)| *a)
                .ok_or_else(|| WindowError::NotFound(handle.title.clone()))
        }

        fn bring_to_front(&self, _handle: &WindowHandle) -> Result<(), WindowError> {
            self.raised.fetch_add(1, Ordering::SeqCst);
            if self.raise_fails {
                Err(WindowError::Unsupported("bring to front"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_title_matches_case_insensitive() {
        assert!(title_matches("BuJa Chart - Gold", "buja chart"));
        assert!(title_matches("BUJA CHART", "Buja"));
        assert!(!title_matches("Other App", "buja"));
    }

    #[test]
    fn test_acquire_anchor_raises_and_reads_origin() {
        let wm = FakeWindows::with("BuJa Chart v2", WindowAnchor::new(30, 40));
        let anchor = acquire_anchor(&wm, "buja chart", true).unwrap();
        assert_eq!(anchor, WindowAnchor::new(30, 40));
        assert_eq!(wm.raised.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_acquire_anchor_tolerates_raise_failure() {
        let mut wm = FakeWindows::with("BuJa Chart", WindowAnchor::new(1, 2));
        wm.raise_fails = true;
        assert_eq!(
            acquire_anchor(&wm, "BuJa", true).unwrap(),
            WindowAnchor::new(1, 2)
        );
    }

    #[test]
    fn test_acquire_anchor_missing_window() {
        let wm = FakeWindows::with("Notepad", WindowAnchor::default());
        let err = acquire_anchor(&wm, "BuJa Chart", false).unwrap_err();
        assert!(matches!(err, WindowError::NotFound(_)));
        assert_eq!(wm.raised.load(Ordering::SeqCst), 0);
    }
}
