//! Capability interface onto a browser-automation session.
//!
//! Every method takes `&mut self`: one session serves one caller at a time,
//! and each call must finish before the next one is issued.

#[cfg(feature = "browser")]
pub mod chrome;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[async_trait]
pub trait Browser: Send {
    /// Load `url`, failing with a navigation or timeout error.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Evaluate a script in the current page and return its JSON value.
    async fn execute_script(&mut self, script: &str) -> Result<Value>;

    /// Full markup of the current page.
    async fn read_markup(&mut self) -> Result<String>;

    /// Explicit pacing pause.
    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Release the session.
    async fn close(&mut self) -> Result<()>;
}

/// Starts fresh automation sessions; used to recycle long-running ones.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Session: Browser;

    async fn launch(&self) -> Result<Self::Session>;
}

/// Operator interrupt shared between the signal handler and the harvest loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scroll the window vertically by `px` pixels.
pub fn scroll_by_script(px: i64) -> String {
    format!("window.scrollBy(0, {});", px)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_scroll_script() {
        assert_eq!(scroll_by_script(200), "window.scrollBy(0, 200);");
        assert_eq!(scroll_by_script(-500), "window.scrollBy(0, -500);");
    }
}
