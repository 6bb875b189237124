//! Page acquisition: turn a provider's URLs into page snapshots.
//!
//! Each URL goes through the cheapest path that yields real content. A plain
//! fetch comes first; the browser is the fallback for client-rendered pages
//! (or the only path when the provider says so). A failing URL produces a
//! failed [`PageSnapshot`], never an error: one bad page must not sink the
//! rest of the provider.

pub mod http_client;
pub mod text;

use crate::registry::{AcquisitionMode, ProviderDescriptor, RenderHint};
use crate::renderer::{RenderContext, Renderer};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use http_client::HttpClient;
use pricewatch::{AcquisitionError, AcquisitionMethod, PageSnapshot, PageType};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fetched text shorter than this is treated as an unrendered shell.
pub const MIN_CONTENT_CHARS: usize = 500;

const MARKER_POLL: Duration = Duration::from_millis(250);
const SCROLL_PAUSE: Duration = Duration::from_millis(300);
const MAX_SCROLL_STEPS: usize = 12;
/// Closing a page gets its own small budget outside the render budget.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Matches when the page shows something that reads like a price.
const PRICE_PROBE: &str = r#"(() => {
    const t = document.body ? document.body.innerText : "";
    return /[$€£¥]\s?\d|\d+\s?(usd|eur|gbp)\b|per month|\/mo\b/i.test(t);
})()"#;

const SCROLL_STEP: &str = r#"(() => {
    window.scrollBy(0, window.innerHeight);
    return window.scrollY + window.innerHeight >= document.documentElement.scrollHeight;
})()"#;

/// Produces page snapshots for a provider.
#[async_trait]
pub trait ContentAcquirer: Send + Sync {
    /// Acquire every URL of `provider`, in descriptor order.
    ///
    /// Individual page failures are recorded on the returned snapshots; an
    /// `Err` means acquisition could not be attempted at all.
    async fn acquire(
        &self,
        provider: &ProviderDescriptor,
    ) -> Result<Vec<PageSnapshot>, AcquisitionError>;

    /// Release long-lived resources such as a browser process.
    async fn shutdown(&self) {}
}

#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Pages of one provider acquired at the same time.
    pub concurrency: usize,
    pub nav_timeout_ms: u64,
    /// How long to wait for content markers before capturing anyway.
    pub marker_timeout_ms: u64,
    pub min_content_chars: usize,
    /// Budget for reading the rendered page (HTML, title, screenshot).
    pub capture_timeout_ms: u64,
    /// Capture a full-page screenshot on the browser path.
    pub screenshots: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            nav_timeout_ms: 30_000,
            marker_timeout_ms: 5_000,
            min_content_chars: MIN_CONTENT_CHARS,
            capture_timeout_ms: 15_000,
            screenshots: true,
        }
    }
}

/// The production acquirer: HTTP first, browser when needed.
pub struct PageAcquirer {
    http: HttpClient,
    renderer: Arc<dyn Renderer>,
    settings: AcquisitionSettings,
}

impl PageAcquirer {
    pub fn new(http: HttpClient, renderer: Arc<dyn Renderer>, settings: AcquisitionSettings) -> Self {
        Self {
            http,
            renderer,
            settings,
        }
    }

    async fn acquire_page(&self, url: &str, hint: &RenderHint) -> PageSnapshot {
        if hint.mode == AcquisitionMode::Browser {
            return self.render(url, hint).await;
        }

        let page = self.fetch(url).await;
        if hint.mode == AcquisitionMode::Static || self.is_sufficient(&page) {
            return page;
        }
        if !self.renderer.is_available() {
            tracing::debug!(url, chars = page.text.len(), "content insufficient, no browser to fall back to");
            return page;
        }

        tracing::info!(url, chars = page.text.len(), "content insufficient, rendering in browser");
        let rendered = self.render(url, hint).await;
        if rendered.is_usable() || !page.is_usable() {
            rendered
        } else {
            page
        }
    }

    fn is_sufficient(&self, page: &PageSnapshot) -> bool {
        page.is_usable() && page.text.chars().count() >= self.settings.min_content_chars
    }

    async fn fetch(&self, url: &str) -> PageSnapshot {
        match self.http.get(url).await {
            Ok(resp) if !resp.is_success() => {
                PageSnapshot::failed(url, AcquisitionMethod::Http, format!("HTTP {}", resp.status))
            }
            Ok(resp) if !resp.is_html() => PageSnapshot::failed(
                url,
                AcquisitionMethod::Http,
                format!(
                    "unsupported content type {}",
                    resp.content_type.as_deref().unwrap_or("unknown")
                ),
            ),
            Ok(resp) => {
                let text = text::extract_text(&resp.body);
                PageSnapshot {
                    url: url.to_string(),
                    title: text::extract_title(&resp.body),
                    page_type: PageType::infer(url, &text),
                    html: resp.body,
                    text,
                    screenshot: None,
                    captured_at: Utc::now(),
                    acquired_via: AcquisitionMethod::Http,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(url, "fetch failed: {e:#}");
                PageSnapshot::failed(url, AcquisitionMethod::Http, format!("{e:#}"))
            }
        }
    }

    /// Upper bound on one page's browser work, from opening the context to
    /// the last capture call.
    fn render_budget(&self, hint: &RenderHint) -> Duration {
        Duration::from_millis(
            self.settings.nav_timeout_ms
                + self.settings.marker_timeout_ms
                + hint.settle_ms
                + self.settings.capture_timeout_ms,
        ) + SCROLL_PAUSE * MAX_SCROLL_STEPS as u32
    }

    async fn render(&self, url: &str, hint: &RenderHint) -> PageSnapshot {
        let budget = self.render_budget(hint);
        match tokio::time::timeout(budget + CLOSE_TIMEOUT, self.render_inner(url, hint, budget)).await
        {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                tracing::warn!(url, "render failed: {e:#}");
                PageSnapshot::failed(url, AcquisitionMethod::Browser, format!("{e:#}"))
            }
            Err(_) => {
                tracing::warn!(url, budget_ms = budget.as_millis() as u64, "render timed out");
                PageSnapshot::failed(
                    url,
                    AcquisitionMethod::Browser,
                    format!("render timed out after {}ms", budget.as_millis()),
                )
            }
        }
    }

    async fn render_inner(
        &self,
        url: &str,
        hint: &RenderHint,
        budget: Duration,
    ) -> anyhow::Result<PageSnapshot> {
        let started = Instant::now();
        let mut ctx = self.renderer.new_context().await?;
        let remaining = budget.saturating_sub(started.elapsed());
        let result = match tokio::time::timeout(remaining, self.capture(ctx.as_mut(), url, hint)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "render timed out after {}ms",
                budget.as_millis()
            )),
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, ctx.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(url, "closing render context failed: {e:#}"),
            Err(_) => tracing::debug!(url, "closing render context timed out"),
        }
        result
    }

    async fn capture(
        &self,
        ctx: &mut dyn RenderContext,
        url: &str,
        hint: &RenderHint,
    ) -> anyhow::Result<PageSnapshot> {
        let nav = ctx.navigate(url, self.settings.nav_timeout_ms).await?;
        tracing::debug!(url, final_url = %nav.final_url, load_ms = nav.load_time_ms, "navigated");

        if !self.wait_for_markers(&*ctx, &hint.wait_for).await {
            tracing::debug!(url, "content markers not seen, capturing anyway");
        }
        scroll_through(&*ctx).await;
        if hint.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(hint.settle_ms)).await;
        }

        let html = ctx.get_html().await?;
        let title = ctx
            .execute_js("document.title")
            .await
            .ok()
            .and_then(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty());
        let screenshot = if self.settings.screenshots {
            match ctx.screenshot().await {
                Ok(png) => Some(png),
                Err(e) => {
                    tracing::debug!(url, "screenshot skipped: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let text = text::extract_text(&html);
        Ok(PageSnapshot {
            url: url.to_string(),
            title,
            page_type: PageType::infer(url, &text),
            html,
            text,
            screenshot,
            captured_at: Utc::now(),
            acquired_via: AcquisitionMethod::Browser,
            error: None,
        })
    }

    /// Poll until a configured selector (or any price-looking text) appears.
    async fn wait_for_markers(&self, ctx: &dyn RenderContext, selectors: &[String]) -> bool {
        let probe = marker_probe(selectors);
        let deadline = Instant::now() + Duration::from_millis(self.settings.marker_timeout_ms);
        loop {
            let seen = ctx
                .execute_js(&probe)
                .await
                .ok()
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if seen {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(MARKER_POLL).await;
        }
    }
}

#[async_trait]
impl ContentAcquirer for PageAcquirer {
    async fn acquire(
        &self,
        provider: &ProviderDescriptor,
    ) -> Result<Vec<PageSnapshot>, AcquisitionError> {
        if provider.render.mode == AcquisitionMode::Browser && !self.renderer.is_available() {
            return Err(AcquisitionError::RendererUnavailable(format!(
                "provider {} requires a browser",
                provider.id
            )));
        }

        let work: Vec<_> = provider
            .urls
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, url)| {
                let hint = provider.render.clone();
                async move {
                    let page = self.acquire_page(&url, &hint).await;
                    (i, page)
                }
            })
            .collect();
        let mut pages: Vec<(usize, PageSnapshot)> = stream::iter(work)
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        pages.sort_by_key(|(i, _)| *i);

        let pages: Vec<PageSnapshot> = pages.into_iter().map(|(_, p)| p).collect();
        tracing::info!(
            provider = %provider.id,
            pages = pages.len(),
            usable = pages.iter().filter(|p| p.is_usable()).count(),
            "acquisition finished"
        );
        Ok(pages)
    }

    async fn shutdown(&self) {
        if let Err(e) = self.renderer.shutdown().await {
            tracing::warn!("renderer shutdown failed: {e:#}");
        }
    }
}

fn marker_probe(selectors: &[String]) -> String {
    if selectors.is_empty() {
        return PRICE_PROBE.to_string();
    }
    let list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{list}.some(s => {{ try {{ return document.querySelector(s) !== null; }} catch (e) {{ return false; }} }})"
    )
}

/// Scroll to the bottom in viewport steps to trigger lazy content, then back up.
async fn scroll_through(ctx: &dyn RenderContext) {
    for _ in 0..MAX_SCROLL_STEPS {
        let at_bottom = ctx
            .execute_js(SCROLL_STEP)
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        tokio::time::sleep(SCROLL_PAUSE).await;
        if at_bottom {
            break;
        }
    }
    let _ = ctx.execute_js("window.scrollTo(0, 0)").await;
}
