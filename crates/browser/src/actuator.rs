//! The motor surface the agent drives. Every action settles the page and
//! returns a fresh [`Observation`]; the authentication probe runs on every
//! observation so an expired session surfaces as an error instead of a
//! screenshot of a login wall.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use trolley_core::types::Observation;
use trolley_core::{Error, Result};

use crate::cdp::CdpClient;
use crate::host::probe_authenticated;

/// Horizontal or vertical scroll direction as the model names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    fn deltas(self, magnitude: f64) -> (f64, f64) {
        match self {
            Self::Up => (0.0, -magnitude),
            Self::Down => (0.0, magnitude),
            Self::Left => (-magnitude, 0.0),
            Self::Right => (magnitude, 0.0),
        }
    }
}

#[async_trait]
pub trait Actuator: Send + Sync {
    fn screen_size(&self) -> (u32, u32);

    async fn current_state(&self) -> Result<Observation>;
    async fn open_web_browser(&self) -> Result<Observation>;
    async fn click_at(&self, x: f64, y: f64) -> Result<Observation>;
    async fn hover_at(&self, x: f64, y: f64) -> Result<Observation>;
    async fn type_text_at(
        &self,
        x: f64,
        y: f64,
        text: &str,
        press_enter: bool,
        clear_before_typing: bool,
    ) -> Result<Observation>;
    async fn scroll_document(
        &self,
        direction: ScrollDirection,
        magnitude: f64,
    ) -> Result<Observation>;
    async fn scroll_at(
        &self,
        x: f64,
        y: f64,
        direction: ScrollDirection,
        magnitude: f64,
    ) -> Result<Observation>;
    async fn wait_seconds(&self, seconds: f64) -> Result<Observation>;
    async fn go_back(&self) -> Result<Observation>;
    async fn go_forward(&self) -> Result<Observation>;
    async fn navigate(&self, url: &str) -> Result<Observation>;
    async fn key_combination(&self, keys: &[String]) -> Result<Observation>;
    async fn drag_and_drop(
        &self,
        x: f64,
        y: f64,
        destination_x: f64,
        destination_y: f64,
    ) -> Result<Observation>;

    async fn close(&self) -> Result<()>;
}

pub struct TabActuator {
    cdp: Arc<CdpClient>,
    browser_cdp: Arc<CdpClient>,
    target_id: String,
    width: u32,
    height: u32,
    probe_selector: String,
}

impl TabActuator {
    pub(crate) fn new(
        cdp: Arc<CdpClient>,
        browser_cdp: Arc<CdpClient>,
        target_id: String,
        width: u32,
        height: u32,
        probe_selector: String,
    ) -> Self {
        Self {
            cdp,
            browser_cdp,
            target_id,
            width,
            height,
            probe_selector,
        }
    }

    /// Polls document.readyState until the page settles.
    async fn wait_for_load(&self) {
        for _ in 0..40 {
            let ready = self
                .cdp
                .evaluate_js("document.readyState")
                .await
                .ok()
                .and_then(|v| {
                    v.pointer("/result/value")
                        .and_then(|s| s.as_str())
                        .map(|s| s == "complete")
                })
                .unwrap_or(false);
            if ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        debug!(target = %self.target_id, "page did not reach readyState complete");
    }

    async fn current_url(&self) -> String {
        self.cdp
            .evaluate_js("location.href")
            .await
            .ok()
            .and_then(|v| {
                v.pointer("/result/value")
                    .and_then(|s| s.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or_default()
    }

    async fn observe(&self) -> Result<Observation> {
        self.wait_for_load().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        if !probe_authenticated(&self.cdp, &self.probe_selector).await {
            return Err(Error::SessionExpired(
                "authentication expired or missing, login required".to_string(),
            ));
        }

        let encoded = self.cdp.screenshot().await?;
        let snapshot = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Browser(format!("bad screenshot payload: {}", e)))?;
        Ok(Observation {
            url: self.current_url().await,
            snapshot: Some(snapshot),
        })
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let (name, code) = key_spec(key);
        self.cdp.dispatch_key_event("keyDown", name, code, 0).await?;
        self.cdp.dispatch_key_event("keyUp", name, code, 0).await?;
        Ok(())
    }
}

#[async_trait]
impl Actuator for TabActuator {
    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn current_state(&self) -> Result<Observation> {
        self.observe().await
    }

    async fn open_web_browser(&self) -> Result<Observation> {
        self.observe().await
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<Observation> {
        self.cdp
            .dispatch_mouse_event("mouseMoved", x, y, "none", 0)
            .await?;
        self.cdp
            .dispatch_mouse_event("mousePressed", x, y, "left", 1)
            .await?;
        self.cdp
            .dispatch_mouse_event("mouseReleased", x, y, "left", 1)
            .await?;
        self.observe().await
    }

    async fn hover_at(&self, x: f64, y: f64) -> Result<Observation> {
        self.cdp
            .dispatch_mouse_event("mouseMoved", x, y, "none", 0)
            .await?;
        self.observe().await
    }

    async fn type_text_at(
        &self,
        x: f64,
        y: f64,
        text: &str,
        press_enter: bool,
        clear_before_typing: bool,
    ) -> Result<Observation> {
        self.cdp
            .dispatch_mouse_event("mousePressed", x, y, "left", 1)
            .await?;
        self.cdp
            .dispatch_mouse_event("mouseReleased", x, y, "left", 1)
            .await?;
        self.wait_for_load().await;
        if clear_before_typing {
            self.key_combination(&["Control".to_string(), "A".to_string()])
                .await?;
            self.press_key("Delete").await?;
        }
        self.cdp.insert_text(text).await?;
        if press_enter {
            self.press_key("Enter").await?;
        }
        self.observe().await
    }

    async fn scroll_document(
        &self,
        direction: ScrollDirection,
        magnitude: f64,
    ) -> Result<Observation> {
        let (dx, dy) = direction.deltas(magnitude);
        self.cdp
            .evaluate_js(&format!("window.scrollBy({dx}, {dy});"))
            .await?;
        self.observe().await
    }

    async fn scroll_at(
        &self,
        x: f64,
        y: f64,
        direction: ScrollDirection,
        magnitude: f64,
    ) -> Result<Observation> {
        let magnitude = magnitude.max(140.0);
        self.cdp
            .dispatch_mouse_event("mouseMoved", x, y, "none", 0)
            .await?;
        let (dx, dy) = direction.deltas(magnitude);
        self.cdp.dispatch_scroll_event(x, y, dx, dy).await?;
        self.observe().await
    }

    async fn wait_seconds(&self, seconds: f64) -> Result<Observation> {
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        self.observe().await
    }

    async fn go_back(&self) -> Result<Observation> {
        let history = self.cdp.get_history().await?;
        let index = history
            .get("currentIndex")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if index > 0 {
            if let Some(entry_id) = history
                .pointer(&format!("/entries/{}/id", index - 1))
                .and_then(|v| v.as_i64())
            {
                self.cdp.navigate_history(entry_id).await?;
            }
        }
        self.observe().await
    }

    async fn go_forward(&self) -> Result<Observation> {
        let history = self.cdp.get_history().await?;
        let index = history
            .get("currentIndex")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if let Some(entry_id) = history
            .pointer(&format!("/entries/{}/id", index + 1))
            .and_then(|v| v.as_i64())
        {
            self.cdp.navigate_history(entry_id).await?;
        }
        self.observe().await
    }

    async fn navigate(&self, url: &str) -> Result<Observation> {
        let normalized = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };
        self.cdp.navigate(&normalized).await?;
        self.observe().await
    }

    async fn key_combination(&self, keys: &[String]) -> Result<Observation> {
        let mut modifiers = 0;
        for key in keys {
            let (name, code) = key_spec(key);
            self.cdp
                .dispatch_key_event("keyDown", name, code, modifiers)
                .await?;
            modifiers |= modifier_bit(key);
        }
        for key in keys.iter().rev() {
            modifiers &= !modifier_bit(key);
            let (name, code) = key_spec(key);
            self.cdp
                .dispatch_key_event("keyUp", name, code, modifiers)
                .await?;
        }
        self.observe().await
    }

    async fn drag_and_drop(
        &self,
        x: f64,
        y: f64,
        destination_x: f64,
        destination_y: f64,
    ) -> Result<Observation> {
        self.cdp
            .dispatch_mouse_event("mouseMoved", x, y, "none", 0)
            .await?;
        self.cdp
            .dispatch_mouse_event("mousePressed", x, y, "left", 1)
            .await?;
        self.cdp
            .dispatch_mouse_event("mouseMoved", destination_x, destination_y, "left", 0)
            .await?;
        self.cdp
            .dispatch_mouse_event("mouseReleased", destination_x, destination_y, "left", 1)
            .await?;
        self.observe().await
    }

    async fn close(&self) -> Result<()> {
        self.browser_cdp.close_target(&self.target_id).await
    }
}

/// CDP key/code pair for a model-named key.
fn key_spec(key: &str) -> (&str, &'static str) {
    match key {
        "Enter" | "Return" => ("Enter", "Enter"),
        "Tab" => ("Tab", "Tab"),
        "Escape" | "Esc" => ("Escape", "Escape"),
        "Backspace" => ("Backspace", "Backspace"),
        "Delete" => ("Delete", "Delete"),
        "Control" | "Ctrl" => ("Control", "ControlLeft"),
        "Shift" => ("Shift", "ShiftLeft"),
        "Alt" => ("Alt", "AltLeft"),
        "Meta" | "Cmd" | "Command" => ("Meta", "MetaLeft"),
        "ArrowUp" | "Up" => ("ArrowUp", "ArrowUp"),
        "ArrowDown" | "Down" => ("ArrowDown", "ArrowDown"),
        "ArrowLeft" | "Left" => ("ArrowLeft", "ArrowLeft"),
        "ArrowRight" | "Right" => ("ArrowRight", "ArrowRight"),
        "Space" => (" ", "Space"),
        "PageUp" => ("PageUp", "PageUp"),
        "PageDown" => ("PageDown", "PageDown"),
        "Home" => ("Home", "Home"),
        "End" => ("End", "End"),
        other => (other, ""),
    }
}

/// Input domain modifier mask: Alt=1, Ctrl=2, Meta=4, Shift=8.
fn modifier_bit(key: &str) -> i32 {
    match key {
        "Alt" => 1,
        "Control" | "Ctrl" => 2,
        "Meta" | "Cmd" | "Command" => 4,
        "Shift" => 8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_direction_parse() {
        assert_eq!(ScrollDirection::parse("down"), Some(ScrollDirection::Down));
        assert_eq!(ScrollDirection::parse("sideways"), None);
    }

    #[test]
    fn test_scroll_deltas() {
        assert_eq!(ScrollDirection::Up.deltas(100.0), (0.0, -100.0));
        assert_eq!(ScrollDirection::Right.deltas(50.0), (50.0, 0.0));
    }

    #[test]
    fn test_modifier_bits_match_cdp_mask() {
        assert_eq!(modifier_bit("Control"), 2);
        assert_eq!(modifier_bit("Shift"), 8);
        assert_eq!(modifier_bit("a"), 0);
    }
}
