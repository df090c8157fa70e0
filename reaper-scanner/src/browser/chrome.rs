//! Chrome/Chromium session driven over the DevTools protocol.

use super::{Browser, BrowserLauncher};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub headless: bool,
    /// Browser binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub window_size: (u32, u32),
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout: Duration,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            window_size: (1920, 1080),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ChromeLauncher {
    config: ChromeConfig,
}

impl ChromeLauncher {
    pub fn new(config: ChromeConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let (width, height) = self.config.window_size;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .request_timeout(self.config.request_timeout)
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(format!("--window-size={},{}", width, height));

        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref path) = self.config.executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(ScanError::Browser)
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    type Session = ChromeBrowser;

    async fn launch(&self) -> Result<ChromeBrowser> {
        info!("Launching browser (headless={})", self.config.headless);

        let (browser, mut handler) = CdpBrowser::launch(self.browser_config()?)
            .await
            .map_err(|e| ScanError::Browser(format!("launch failed: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScanError::Browser(format!("could not open page: {}", e)))?;

        page.execute(SetUserAgentOverrideParams::new(self.config.user_agent.clone()))
            .await
            .map_err(|e| ScanError::Browser(e.to_string()))?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::json!({ "Accept-Language": self.config.accept_language }),
        )))
        .await
        .map_err(|e| ScanError::Browser(e.to_string()))?;

        Ok(ChromeBrowser {
            browser,
            page,
            handler,
        })
    }
}

pub struct ChromeBrowser {
    browser: CdpBrowser,
    page: Page,
    handler: JoinHandle<()>,
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        debug!("Navigating to {}", url);
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ScanError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ScanError::Timeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }

    async fn execute_script(&mut self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ScanError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn read_markup(&mut self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| ScanError::Markup(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.browser.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        let exit = self.browser.wait().await;
        debug!("{}", exit_summary(&exit));
        self.handler.abort();
        Ok(())
    }
}

fn exit_summary(exit: &std::io::Result<Option<ExitStatus>>) -> String {
    match exit {
        Ok(Some(status)) => format!("Browser process exited: {}", status),
        Ok(None) => "Browser process already reaped".to_string(),
        Err(e) => format!("Could not wait for browser exit: {}", e),
    }
}
