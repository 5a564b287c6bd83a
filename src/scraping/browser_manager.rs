//! Native browser management using `chromiumoxide`.
//!
//! This module owns:
//! * Finding a usable browser executable (Brave → Chrome → Chromium, cross-platform).
//! * Building a launch config from an [`Identity`] (UA, locale, viewport).
//! * [`BrowserSession`]: one isolated browser per fetch attempt, closed on every path.
//! * [`PageHandle`]: the narrow page surface the interaction and CAPTCHA code drive.
//!
//! Sessions are never pooled or shared: a retry always launches a fresh browser
//! with a fresh identity.

use crate::features::antibot::Identity;
use crate::scraping::stealth;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan – finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var(crate::core::config::ENV_CHROME_EXECUTABLE) {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "brave-browser",
            "brave",
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Headless browser config builder ──────────────────────────────────────────

/// Build a headless `BrowserConfig` that presents the given identity.
///
/// `--disable-blink-features=AutomationControlled` hides the `navigator.webdriver`
/// flag; `--lang` drives both `navigator.language` and the Accept-Language header.
pub fn build_headless_config(exe: &str, identity: &Identity) -> Result<BrowserConfig> {
    let (w, h) = (identity.viewport_width, identity.viewport_height);
    BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: w,
            height: h,
            device_scale_factor: Some(if identity.mobile { 3.0 } else { 1.0 }),
            emulating_mobile: identity.mobile,
            is_landscape: !identity.mobile,
            has_touch: identity.mobile,
        })
        .window_size(w, h)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--lang={}", identity.locale))
        .arg(format!("--user-agent={}", identity.user_agent))
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

// ── Page surface ─────────────────────────────────────────────────────────────

/// Operations the evasion and CAPTCHA layers need from a live page.
///
/// Every method is best-effort: "element not found" is `Ok(false)` / `Ok(None)`,
/// only transport failures are errors.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn content(&self) -> Result<String>;
    /// First selector in `selectors` that matches an element.
    async fn first_present(&self, selectors: &[&str]) -> Result<Option<String>>;
    /// Tags the first visible element under `candidates` whose text contains one of
    /// `phrases` (case-insensitive) and returns a selector addressing it.
    async fn mark_by_text(&self, candidates: &str, phrases: &[&str]) -> Result<Option<String>>;
    async fn hover(&self, selector: &str) -> Result<bool>;
    async fn click(&self, selector: &str) -> Result<bool>;
    async fn fill(&self, selector: &str, text: &str) -> Result<bool>;
    /// PNG bytes of the first element matching `selector`.
    async fn capture_element(&self, selector: &str) -> Result<Vec<u8>>;
    async fn move_pointer(&self, x: i32, y: i32) -> Result<()>;
    async fn scroll_by(&self, dy: i32) -> Result<()>;
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// [`PageHandle`] over a chromiumoxide page. DOM work goes through `evaluate`.
pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn inner(&self) -> &Page {
        &self.page
    }

    async fn eval(&self, script: String) -> Result<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| anyhow!("evaluate failed: {}", e))?
            .into_value::<serde_json::Value>()
            .map_err(|e| anyhow!("evaluate returned no value: {}", e))
    }

    async fn eval_bool(&self, script: String) -> Result<bool> {
        Ok(self.eval(script).await?.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| anyhow!("Failed to get page content: {}", e))
    }

    async fn first_present(&self, selectors: &[&str]) -> Result<Option<String>> {
        let list = serde_json::to_string(selectors)?;
        let found = self
            .eval(format!(
                "(() => {{ for (const s of {list}) {{ try {{ if (document.querySelector(s)) return s; }} catch (e) {{}} }} return null; }})()"
            ))
            .await?;
        Ok(found.as_str().map(str::to_string))
    }

    async fn mark_by_text(&self, candidates: &str, phrases: &[&str]) -> Result<Option<String>> {
        let lowered: Vec<String> = phrases.iter().map(|p| p.to_lowercase()).collect();
        let phrases = serde_json::to_string(&lowered)?;
        let token = uuid::Uuid::new_v4().simple().to_string();
        let script = format!(
            r#"(() => {{
                const phrases = {phrases};
                const nodes = Array.from(document.querySelectorAll({candidates}));
                for (const el of nodes) {{
                    const r = el.getBoundingClientRect();
                    if (r.width === 0 || r.height === 0) continue;
                    const text = (el.innerText || el.value || el.getAttribute('aria-label') || '').trim().toLowerCase();
                    if (!text) continue;
                    if (phrases.some(p => text === p || text.includes(p))) {{
                        el.setAttribute('data-scout-target', '{token}');
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            candidates = js_str(candidates),
        );
        if self.eval_bool(script).await? {
            Ok(Some(format!("[data-scout-target=\"{}\"]", token)))
        } else {
            Ok(None)
        }
    }

    async fn hover(&self, selector: &str) -> Result<bool> {
        self.eval_bool(format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.scrollIntoView({{block: 'center'}});
                for (const t of ['mouseover', 'mouseenter', 'mousemove']) {{
                    el.dispatchEvent(new MouseEvent(t, {{bubbles: true}}));
                }}
                return true;
            }})()"#,
            sel = js_str(selector)
        ))
        .await
    }

    async fn click(&self, selector: &str) -> Result<bool> {
        self.eval_bool(format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; el.click(); return true; }})()",
            sel = js_str(selector)
        ))
        .await
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<bool> {
        self.eval_bool(format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                el.value = {text};
                el.dispatchEvent(new Event('input', {{bubbles: true}}));
                el.dispatchEvent(new Event('change', {{bubbles: true}}));
                return true;
            }})()"#,
            sel = js_str(selector),
            text = js_str(text)
        ))
        .await
    }

    async fn capture_element(&self, selector: &str) -> Result<Vec<u8>> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| anyhow!("element '{}' not found: {}", selector, e))?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| anyhow!("element screenshot failed: {}", e))
    }

    async fn move_pointer(&self, x: i32, y: i32) -> Result<()> {
        self.eval(format!(
            r#"(() => {{
                const el = document.elementFromPoint({x}, {y});
                if (el) el.dispatchEvent(new MouseEvent('mousemove', {{clientX: {x}, clientY: {y}, bubbles: true}}));
                return true;
            }})()"#
        ))
        .await?;
        Ok(())
    }

    async fn scroll_by(&self, dy: i32) -> Result<()> {
        self.eval(format!(
            "(() => {{ window.scrollBy({{top: {dy}, behavior: 'smooth'}}); return true; }})()"
        ))
        .await?;
        Ok(())
    }
}

// ── Smart wait ───────────────────────────────────────────────────────────────

/// Wait until `document.readyState` is complete and the resource count stops
/// growing for `quiet_ms`, or until `timeout_ms` elapses.
pub async fn wait_until_stable(page: &Page, quiet_ms: u64, timeout_ms: u64) {
    let poll_ms = 250u64;
    let start = std::time::Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = std::time::Instant::now();

    loop {
        if start.elapsed().as_millis() as u64 >= timeout_ms {
            debug!("wait_until_stable: timeout after {}ms", timeout_ms);
            break;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        let ready_complete: bool = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_str().map(|s| s == "complete"))
            .unwrap_or(false);

        if !ready_complete || count != last_count {
            last_count = count;
            stable_since = std::time::Instant::now();
        } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
            debug!(
                "wait_until_stable: idle after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            break;
        }

        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
}

// ── Browser session ──────────────────────────────────────────────────────────

/// One isolated browser owned by exactly one fetch attempt.
///
/// Call [`BrowserSession::close`] on every path. If the owning future is dropped
/// instead (deadline, panic), `Drop` still tears the browser down.
pub struct BrowserSession {
    browser: Option<Browser>,
    page: ChromePage,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    /// Launch a fresh headless browser presenting `identity`, with the stealth
    /// init script and timezone override applied to its page.
    pub async fn launch(exe: &str, identity: &Identity) -> Result<Self> {
        let config = build_headless_config(exe, identity)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser ({}): {}", exe, e))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        let page: Result<Page> = async {
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| anyhow!("Failed to create page: {}", e))?;
            page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
                stealth::init_script(identity),
            ))
            .await
            .map_err(|e| anyhow!("Failed to inject stealth script: {}", e))?;
            if let Err(e) = page
                .execute(SetTimezoneOverrideParams::new(identity.timezone.clone()))
                .await
            {
                warn!("timezone override rejected (non-fatal): {}", e);
            }
            Ok(page)
        }
        .await;

        match page {
            Ok(page) => {
                info!(
                    "🌐 Browser session up ({}x{}, {}, mobile={})",
                    identity.viewport_width, identity.viewport_height, identity.locale, identity.mobile
                );
                Ok(Self {
                    browser: Some(browser),
                    page: ChromePage::new(page),
                    handler,
                })
            }
            Err(e) => {
                browser.close().await.ok();
                handler.abort();
                Err(e)
            }
        }
    }

    /// Navigate and wait for the page to settle.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .inner()
            .goto(url)
            .await
            .map_err(|e| anyhow!("Failed to navigate: {}", e))?;
        wait_until_stable(self.page.inner(), 1500, 10_000).await;
        Ok(())
    }

    /// Let the page settle again, e.g. after a challenge form was submitted.
    pub async fn settle(&self) {
        wait_until_stable(self.page.inner(), 1000, 8000).await;
    }

    pub fn page(&self) -> &ChromePage {
        &self.page
    }

    pub async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Browser close error (non-fatal): {}", e);
            }
            browser.wait().await.ok();
        }
        self.handler.abort();
        debug!("browser session closed");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        // Drop cannot await; close on the runtime instead.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = browser.close().await;
                    let _ = browser.wait().await;
                });
            }
            Err(_) => warn!("browser session dropped outside a runtime; process may linger"),
        }
    }
}
