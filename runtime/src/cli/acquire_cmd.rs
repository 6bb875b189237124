//! `pricewatch acquire`: run acquisition alone, for debugging provider config.

use crate::acquisition::ContentAcquirer;
use crate::cli::context::Runtime;
use crate::cli::output::{self, Styled};
use anyhow::{Context, Result};
use std::path::Path;

pub async fn run(rt: &Runtime, provider: &str, screenshots: Option<&Path>, show_text: bool) -> Result<()> {
    let descriptor = rt.provider(provider)?;
    let acquirer = rt.acquirer().await;
    let pages = acquirer.acquire(descriptor).await;
    acquirer.shutdown().await;
    let pages = pages?;

    if let Some(dir) = screenshots {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
        for (i, page) in pages.iter().enumerate() {
            if let Some(png) = &page.screenshot {
                let path = dir.join(format!("{}-{}.png", descriptor.id, i + 1));
                std::fs::write(&path, png)
                    .with_context(|| format!("cannot write {}", path.display()))?;
                tracing::info!(path = %path.display(), "screenshot written");
            }
        }
    }

    if output::is_json() {
        output::print_json(&pages);
        return Ok(());
    }
    if output::is_quiet() {
        return Ok(());
    }

    let s = Styled::new();
    for page in &pages {
        match &page.error {
            Some(err) => println!("  {} {} ({:?}): {err}", s.err_sym(), page.url, page.acquired_via),
            None => println!(
                "  {} {} ({:?}, {}, {} chars{})",
                s.ok_sym(),
                page.url,
                page.acquired_via,
                page.page_type.as_str(),
                page.text.chars().count(),
                page.title
                    .as_deref()
                    .map(|t| format!(", \"{t}\""))
                    .unwrap_or_default()
            ),
        }
        if show_text && page.is_usable() {
            println!("{}\n", s.dim(&page.text));
        }
    }
    Ok(())
}
