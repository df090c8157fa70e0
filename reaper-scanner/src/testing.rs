//! Scripted in-memory browser for exercising the harvester without Chrome.
//!
//! Pages are a list of markup frames. The frame served by `read_markup`
//! depends on how far the page has been scrolled, so content "loads" as the
//! harvester scrolls. Sleeps advance a virtual clock instead of waiting.

use crate::browser::{Browser, BrowserLauncher, CancelFlag};
use crate::error::{Result, ScanError};
use crate::pacing::PacingPolicy;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String),
    Script(String),
    ReadMarkup,
    Sleep(Duration),
    Close,
}

#[derive(Debug, Clone)]
pub struct ScriptedPage {
    frames: Vec<String>,
    px_per_frame: i64,
}

impl ScriptedPage {
    /// One frame per full scroll cycle of the default pacing policy.
    pub fn new(frames: Vec<String>) -> Self {
        Self {
            frames,
            px_per_frame: PacingPolicy::default().cycle_distance_px() as i64,
        }
    }

    pub fn with_px_per_frame(mut self, px: i64) -> Self {
        self.px_per_frame = px.max(1);
        self
    }

    /// Frame `i` holds the first `counts[i]` assets.
    pub fn growing(counts: &[usize]) -> Self {
        Self::new(counts.iter().map(|n| assets_markup(0..*n)).collect())
    }

    fn frame_at(&self, scrolled_px: i64) -> String {
        if self.frames.is_empty() {
            return String::new();
        }
        let idx = (scrolled_px / self.px_per_frame).max(0) as usize;
        self.frames[idx.min(self.frames.len() - 1)].clone()
    }
}

/// 32-hex content hash for asset number `n`.
pub fn hash_for(n: usize) -> String {
    format!("{:032x}", n + 1)
}

/// Markup for one entity anchor wrapping its asset.
pub fn asset_markup(n: usize) -> String {
    format!(
        r#"<div class="item"><a href="/pin/{}/"><img src="https://i.pinimg.com/236x/aa/bb/{}.jpg"></a></div>"#,
        1000 + n,
        hash_for(n)
    )
}

pub fn assets_markup(range: std::ops::Range<usize>) -> String {
    let mut markup = String::from("<html><body>");
    for n in range {
        markup.push_str(&asset_markup(n));
    }
    markup.push_str("</body></html>");
    markup
}

#[derive(Default)]
struct ScriptState {
    pages: HashMap<String, ScriptedPage>,
    navigation_failures: HashMap<String, u32>,
    cancel_on_navigate: HashMap<String, CancelFlag>,
    script_responses: HashMap<String, Value>,
    markup_failures: u32,
    calls: Vec<Call>,
    slept: Duration,
    launches: usize,
    closes: usize,
}

/// Shared script for every session spawned from it.
#[derive(Clone, Default)]
pub struct ScriptBook {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_page(&self, url: &str, page: ScriptedPage) {
        self.state().pages.insert(url.to_string(), page);
    }

    /// The next `times` navigations to `url` fail.
    pub fn fail_navigation(&self, url: &str, times: u32) {
        self.state()
            .navigation_failures
            .insert(url.to_string(), times);
    }

    /// Trip `flag` when `url` is navigated to.
    pub fn cancel_on_navigate(&self, url: &str, flag: CancelFlag) {
        self.state()
            .cancel_on_navigate
            .insert(url.to_string(), flag);
    }

    /// Value returned for an exact script; other scripts return null.
    pub fn respond_to(&self, script: &str, value: Value) {
        self.state()
            .script_responses
            .insert(script.to_string(), value);
    }

    pub fn fail_markup_reads(&self, times: u32) {
        self.state().markup_failures = times;
    }

    pub fn browser(&self) -> ScriptedBrowser {
        ScriptedBrowser {
            book: self.clone(),
            current: None,
            scrolled_px: 0,
        }
    }

    pub fn launcher(&self) -> ScriptedLauncher {
        ScriptedLauncher { book: self.clone() }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Navigate(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn slept(&self) -> Duration {
        self.state().slept
    }

    pub fn launches(&self) -> usize {
        self.state().launches
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

pub struct ScriptedBrowser {
    book: ScriptBook,
    current: Option<String>,
    scrolled_px: i64,
}

fn parse_scroll(script: &str) -> Option<i64> {
    script
        .strip_prefix("window.scrollBy(0, ")?
        .strip_suffix(");")?
        .parse()
        .ok()
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let mut state = self.book.state();
        state.calls.push(Call::Navigate(url.to_string()));

        if let Some(flag) = state.cancel_on_navigate.get(url) {
            flag.cancel();
        }

        if let Some(remaining) = state.navigation_failures.get_mut(url)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ScanError::Timeout {
                url: url.to_string(),
                timeout,
            });
        }

        self.current = Some(url.to_string());
        self.scrolled_px = 0;
        Ok(())
    }

    async fn execute_script(&mut self, script: &str) -> Result<Value> {
        let mut state = self.book.state();
        state.calls.push(Call::Script(script.to_string()));

        if let Some(px) = parse_scroll(script) {
            self.scrolled_px = (self.scrolled_px + px).max(0);
            return Ok(Value::Null);
        }
        Ok(state
            .script_responses
            .get(script)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn read_markup(&mut self) -> Result<String> {
        let mut state = self.book.state();
        state.calls.push(Call::ReadMarkup);

        if state.markup_failures > 0 {
            state.markup_failures -= 1;
            return Err(ScanError::Markup("scripted read failure".to_string()));
        }

        Ok(self
            .current
            .as_ref()
            .and_then(|url| state.pages.get(url))
            .map(|page| page.frame_at(self.scrolled_px))
            .unwrap_or_default())
    }

    async fn sleep(&mut self, duration: Duration) {
        {
            let mut state = self.book.state();
            state.calls.push(Call::Sleep(duration));
            state.slept += duration;
        }
        tokio::task::yield_now().await;
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.book.state();
        state.calls.push(Call::Close);
        state.closes += 1;
        Ok(())
    }
}

pub struct ScriptedLauncher {
    book: ScriptBook,
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    type Session = ScriptedBrowser;

    async fn launch(&self) -> Result<ScriptedBrowser> {
        self.book.state().launches += 1;
        Ok(self.book.browser())
    }
}
