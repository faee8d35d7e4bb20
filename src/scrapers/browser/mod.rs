//! Rendered-page fetcher for script-built pages.
//!
//! Drives Chrome over CDP via chromiumoxide: navigate, wait for the document
//! to be ready and the network to go quiet, then serialize the DOM.

mod config;
mod types;

pub use config::BrowserEngineConfig;
pub use types::RenderedPage;

#[cfg(feature = "browser")]
use std::sync::Arc;
#[cfg(feature = "browser")]
use std::time::Duration;

#[cfg(feature = "browser")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;

/// JavaScript to wait for page ready state.
#[cfg(feature = "browser")]
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete') {
            resolve(document.readyState);
        } else {
            window.addEventListener('load', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Number of network requests the page has issued so far.
#[cfg(feature = "browser")]
const RESOURCE_COUNT_SCRIPT: &str = "performance.getEntriesByType('resource').length";

#[cfg(feature = "browser")]
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Headless browser, launched lazily on first use.
#[cfg(feature = "browser")]
pub struct BrowserFetcher {
    pub(crate) config: BrowserEngineConfig,
    pub(crate) browser: Option<Arc<Mutex<Browser>>>,
}

#[cfg(feature = "browser")]
impl BrowserFetcher {
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            browser: None,
        }
    }

    /// Whether a Chrome executable can be found.
    pub fn is_available(&self) -> bool {
        self.find_chrome().is_ok()
    }

    fn find_chrome(&self) -> Result<std::path::PathBuf> {
        if let Some(ref path) = self.config.chrome_path {
            return Ok(std::path::PathBuf::from(path));
        }

        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                return Ok(p.to_path_buf());
            }
        }

        for cmd in [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(path) = which::which(cmd) {
                return Ok(path);
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Install chromium or set a chrome_path"
        ))
    }

    /// Launch the browser if not already running.
    pub async fn ensure_browser(&mut self) -> Result<()> {
        if self.browser.is_some() {
            return Ok(());
        }

        let chrome_path = self.find_chrome()?;
        info!(
            "Launching browser {} (headless={})",
            chrome_path.display(),
            self.config.headless
        );

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(Arc::new(Mutex::new(browser)));
        Ok(())
    }

    /// Render `url` and return the resulting DOM.
    pub async fn fetch(&mut self, url: &str) -> Result<RenderedPage> {
        self.ensure_browser().await?;

        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("browser not initialized after ensure_browser"))?
            .lock()
            .await;
        let page = browser.new_page("about:blank").await?;

        let result = self.fetch_inner(&page, url).await;
        let _ = page.close().await;
        result
    }

    async fn fetch_inner(&self, page: &Page, url: &str) -> Result<RenderedPage> {
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid URL: {}", e))?;

        let nav_timeout = Duration::from_secs(self.config.timeout);
        tokio::time::timeout(nav_timeout, page.execute(nav_params))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Navigation timed out after {}s for {}",
                    self.config.timeout,
                    url
                )
            })?
            .map_err(|e| anyhow::anyhow!("Navigation failed for {}: {}", url, e))?;

        self.wait_for_ready(page).await;
        self.wait_for_network_idle(page).await;

        let final_url = page
            .url()
            .await?
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string());
        let html = page.content().await?;

        Ok(RenderedPage {
            url: url.to_string(),
            final_url,
            html,
        })
    }

    async fn wait_for_ready(&self, page: &Page) {
        let timeout = Duration::from_secs(self.config.timeout);
        match tokio::time::timeout(timeout, page.evaluate(WAIT_FOR_READY_SCRIPT.to_string())).await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }

    /// Poll the resource count until it stops changing for the idle window.
    async fn wait_for_network_idle(&self, page: &Page) {
        let idle_window = Duration::from_millis(self.config.network_idle_ms);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.timeout);

        let mut last_count: Option<u64> = None;
        let mut quiet_since = tokio::time::Instant::now();

        while tokio::time::Instant::now() < deadline {
            let count = match page.evaluate(RESOURCE_COUNT_SCRIPT.to_string()).await {
                Ok(v) => v.into_value::<u64>().unwrap_or(0),
                Err(e) => {
                    debug!("Could not read resource count: {}", e);
                    return;
                }
            };

            if last_count != Some(count) {
                last_count = Some(count);
                quiet_since = tokio::time::Instant::now();
            } else if quiet_since.elapsed() >= idle_window {
                debug!("Network idle after {} requests", count);
                return;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
        warn!("Timeout waiting for network idle");
    }

    pub async fn close(&mut self) {
        self.browser = None;
    }
}

/// Stub used when the `browser` feature is disabled.
#[cfg(not(feature = "browser"))]
pub struct BrowserFetcher {
    #[allow(dead_code)]
    config: BrowserEngineConfig,
}

#[cfg(not(feature = "browser"))]
impl BrowserFetcher {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { config }
    }

    pub fn is_available(&self) -> bool {
        false
    }

    pub async fn fetch(&mut self, _url: &str) -> Result<RenderedPage> {
        Err(anyhow::anyhow!(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
        ))
    }

    pub async fn close(&mut self) {}
}
