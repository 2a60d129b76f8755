//! The browser/OS automation backend, consumed only as a trait.
//!
//! Any implementation (a Playwright-style browser driver, a desktop input
//! layer, a mock) is pluggable. Every method is an async I/O boundary;
//! timeouts are owned by the implementation, not by this crate.

use async_trait::async_trait;
use std::path::Path;

use crate::errors::AatError;

/// The common contract all automation backends must implement.
#[async_trait]
pub trait TestEngine: Send + Sync {
    /// Launch the backend (browser, session, ...).
    async fn start(&self) -> Result<(), AatError>;

    /// Tear the backend down. Must be safe to call after a failed run.
    async fn stop(&self) -> Result<(), AatError>;

    async fn navigate(&self, url: &str) -> Result<(), AatError>;

    async fn go_back(&self) -> Result<(), AatError>;

    async fn refresh(&self) -> Result<(), AatError>;

    async fn click(&self, x: i32, y: i32) -> Result<(), AatError>;

    async fn double_click(&self, x: i32, y: i32) -> Result<(), AatError>;

    async fn right_click(&self, x: i32, y: i32) -> Result<(), AatError>;

    async fn move_mouse(&self, x: i32, y: i32) -> Result<(), AatError>;

    /// Last known pointer position.
    async fn mouse_position(&self) -> Result<(i32, i32), AatError>;

    async fn type_text(&self, text: &str) -> Result<(), AatError>;

    async fn press_key(&self, key: &str) -> Result<(), AatError>;

    async fn key_combo(&self, keys: &[&str]) -> Result<(), AatError>;

    async fn scroll(&self, x: i32, y: i32, delta: i32) -> Result<(), AatError>;

    /// Capture the current screen as encoded PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, AatError>;

    async fn save_screenshot(&self, path: &Path) -> Result<(), AatError>;

    async fn get_url(&self) -> Result<String, AatError>;

    async fn get_page_text(&self) -> Result<String, AatError>;

    /// Native text search bypassing image matching. Backends without one
    /// keep the default and the executor falls through to the matcher chain.
    async fn find_text_position(&self, text: &str) -> Result<Option<(i32, i32)>, AatError> {
        let _ = text;
        Ok(None)
    }
}
