//! Navigation service seam. The core only ever asks for a path and whether the
//! current history entry is replaced or a new one pushed.

use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    Push,
    /// Overwrite the current entry so "back" cannot return to it.
    Replace,
}

/// The two surfaces the core navigates to on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub login: String,
    /// Where an authenticated user lands after login or when a page refuses their role.
    pub landing: String,
}

impl Default for Routes {
    fn default() -> Self { Self { login: "/login".into(), landing: "/dashboard".into() } }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str, mode: NavigationMode);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRecord {
    pub path: String,
    pub mode: NavigationMode,
}

/// In-memory history for headless hosts. Keeps both the resulting stack and
/// the raw list of navigation requests.
#[derive(Default)]
pub struct HistoryNavigator {
    inner: Mutex<HistoryInner>,
}

#[derive(Default)]
struct HistoryInner {
    stack: Vec<String>,
    requests: Vec<NavigationRecord>,
}

impl HistoryNavigator {
    pub fn new() -> Self { Self::default() }

    pub fn starting_at(path: &str) -> Self {
        let nav = Self::default();
        nav.inner.lock().stack.push(path.to_string());
        nav
    }

    pub fn current(&self) -> Option<String> { self.inner.lock().stack.last().cloned() }

    pub fn stack(&self) -> Vec<String> { self.inner.lock().stack.clone() }

    pub fn requests(&self) -> Vec<NavigationRecord> { self.inner.lock().requests.clone() }

    /// Pop the current entry, as a browser "back" would.
    pub fn back(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.stack.len() > 1 {
            inner.stack.pop();
        }
        inner.stack.last().cloned()
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, path: &str, mode: NavigationMode) {
        debug!(target: "console::navigation", "navigate path='{}' mode={:?}", path, mode);
        let mut inner = self.inner.lock();
        match mode {
            NavigationMode::Push => inner.stack.push(path.to_string()),
            NavigationMode::Replace => match inner.stack.last_mut() {
                Some(top) => *top = path.to_string(),
                None => inner.stack.push(path.to_string()),
            },
        }
        inner.requests.push(NavigationRecord { path: path.to_string(), mode });
    }
}
