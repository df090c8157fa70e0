// Browser session lifecycle: launch, login, periodic recycling

use crate::error::{BatchError, Result};
use reaper_scanner::{Browser, BrowserLauncher, RetryPolicy};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Scripted form login against a site's login page.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    pub login_url: String,
    pub email_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    /// Wait after the login page loads, before filling the form.
    pub settle: Duration,
    /// Wait after submitting, before checking the result.
    pub after_submit: Duration,
    pub timeout: Duration,
}

impl LoginFlow {
    pub fn new(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            email_selector: "#email".to_string(),
            password_selector: "#password".to_string(),
            submit_selector: r#"button[type="submit"]"#.to_string(),
            settle: Duration::from_secs(2),
            after_submit: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }

    /// Fills both fields; evaluates to false when the form is missing.
    pub fn fill_script(&self, credentials: &Credentials) -> String {
        format!(
            "(() => {{ \
                const email = document.querySelector({}); \
                const password = document.querySelector({}); \
                if (!email || !password) return false; \
                const set = (el, v) => {{ el.focus(); el.value = v; el.dispatchEvent(new Event('input', {{ bubbles: true }})); }}; \
                set(email, {}); \
                set(password, {}); \
                return true; \
            }})()",
            js_string(&self.email_selector),
            js_string(&self.password_selector),
            js_string(&credentials.email),
            js_string(&credentials.password),
        )
    }

    pub fn submit_script(&self) -> String {
        format!(
            "(() => {{ const button = document.querySelector({}); if (!button) return false; button.click(); return true; }})()",
            js_string(&self.submit_selector)
        )
    }

    /// True once the login form has gone away.
    pub fn verify_script(&self) -> String {
        format!(
            "document.querySelector({}) === null",
            js_string(&self.email_selector)
        )
    }
}

/// Quote `s` as a JavaScript string literal.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

async fn expect_true<B>(browser: &mut B, script: &str, failure: &str) -> std::result::Result<(), String>
where
    B: Browser + ?Sized,
{
    match browser.execute_script(script).await {
        Ok(Value::Bool(true)) => Ok(()),
        Ok(_) => Err(failure.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Run the login flow once.
async fn attempt_login<B>(
    browser: &mut B,
    flow: &LoginFlow,
    credentials: &Credentials,
) -> std::result::Result<(), String>
where
    B: Browser + ?Sized,
{
    browser
        .navigate(&flow.login_url, flow.timeout)
        .await
        .map_err(|e| e.to_string())?;
    browser.sleep(flow.settle).await;

    expect_true(browser, &flow.fill_script(credentials), "login form not found").await?;
    browser.sleep(Duration::from_millis(300)).await;
    expect_true(browser, &flow.submit_script(), "submit button not found").await?;
    browser.sleep(flow.after_submit).await;

    expect_true(browser, &flow.verify_script(), "still on the login form after submit").await
}

/// Owns the automation session for a batch run.
///
/// The session is launched lazily and, when credentials are configured,
/// logged in before first use. After `restart_interval` completed pages it is
/// closed and replaced by a fresh, re-authenticated one.
pub struct SessionManager<L: BrowserLauncher> {
    launcher: L,
    login: Option<(LoginFlow, Credentials)>,
    retry: RetryPolicy,
    restart_interval: usize,
    session: Option<L::Session>,
    pages_since_launch: usize,
    launches: usize,
}

impl<L: BrowserLauncher> SessionManager<L> {
    pub fn new(launcher: L, retry: RetryPolicy) -> Self {
        Self {
            launcher,
            login: None,
            retry,
            restart_interval: 0,
            session: None,
            pages_since_launch: 0,
            launches: 0,
        }
    }

    pub fn with_login(mut self, flow: LoginFlow, credentials: Credentials) -> Self {
        self.login = Some((flow, credentials));
        self
    }

    /// Recycle after this many pages; 0 keeps one session for the whole run.
    pub fn with_restart_interval(mut self, pages: usize) -> Self {
        self.restart_interval = pages;
        self
    }

    pub fn launches(&self) -> usize {
        self.launches
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// The live session, launching and authenticating one if needed.
    pub async fn browser(&mut self) -> Result<&mut L::Session> {
        if self.session.is_none() {
            let session = self.open().await?;
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| BatchError::Input("browser session unavailable".to_string()))
    }

    async fn open(&mut self) -> Result<L::Session> {
        let mut session = self.launcher.launch().await?;
        self.launches += 1;
        self.pages_since_launch = 0;

        if let Some((ref flow, ref credentials)) = self.login {
            if let Err(e) = self.authenticate(&mut session, flow, credentials).await {
                if let Err(close_err) = session.close().await {
                    debug!("Closing session after failed login: {}", close_err);
                }
                return Err(e);
            }
        }
        Ok(session)
    }

    async fn authenticate(
        &self,
        session: &mut L::Session,
        flow: &LoginFlow,
        credentials: &Credentials,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            info!("Logging in (attempt {}/{})", attempt, self.retry.attempts);
            match attempt_login(session, flow, credentials).await {
                Ok(()) => {
                    info!("Login successful");
                    return Ok(());
                }
                Err(message) if self.retry.has_more(attempt) => {
                    warn!(
                        "Login attempt {}/{} failed: {}",
                        attempt, self.retry.attempts, message
                    );
                    session.sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(message) => {
                    return Err(BatchError::Authentication {
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }

    /// Count a finished page and recycle the session when it is due.
    pub async fn page_done(&mut self) -> Result<()> {
        self.pages_since_launch += 1;
        if self.restart_interval > 0 && self.pages_since_launch >= self.restart_interval {
            info!(
                "Restarting browser after {} pages",
                self.pages_since_launch
            );
            self.recycle().await?;
        }
        Ok(())
    }

    /// Close the current session and open a fresh one.
    pub async fn recycle(&mut self) -> Result<()> {
        self.shutdown().await;
        let session = self.open().await?;
        self.session = Some(session);
        Ok(())
    }

    /// Close the session if one is open. Close failures are only logged.
    pub async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("Browser did not close cleanly: {}", e);
            }
        }
    }
}
