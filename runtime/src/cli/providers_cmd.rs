//! `pricewatch providers`: list tracked providers with snapshot status.

use crate::cli::context::Runtime;
use crate::cli::output::{self, format_age, Styled};
use anyhow::Result;
use chrono::Utc;
use pricewatch::{FailureRecord, Lease, PricingSnapshot};
use serde_json::json;

pub async fn run(rt: &Runtime) -> Result<()> {
    let now = Utc::now();
    let freshness = chrono::Duration::from_std(rt.config.freshness_window)
        .unwrap_or_else(|_| chrono::Duration::hours(1));

    let mut status: Vec<(Option<PricingSnapshot>, Option<Lease>, Option<FailureRecord>)> =
        Vec::with_capacity(rt.registry.len());
    for p in rt.registry.iter() {
        status.push((
            rt.store.current(&p.id).await?,
            rt.store.lease(&p.id).await?,
            rt.store.last_failure(&p.id).await?,
        ));
    }

    if output::is_json() {
        let rows: Vec<_> = rt
            .registry
            .iter()
            .zip(&status)
            .map(|(p, (current, lease, failure))| {
                json!({
                    "id": p.id,
                    "name": p.name,
                    "category": p.category,
                    "mode": p.render.mode,
                    "urls": p.urls.len(),
                    "scrapedAt": current.as_ref().map(|s| s.scraped_at),
                    "confidence": current.as_ref().map(|s| s.metadata.confidence),
                    "fresh": current.as_ref().map(|s| s.age(now) < freshness).unwrap_or(false),
                    "refreshingJob": lease.as_ref().map(|l| l.job_id.clone()),
                    "lastFailureAt": failure.as_ref().map(|f| f.recorded_at),
                })
            })
            .collect();
        output::print_json(&json!({ "providers": rows }));
        return Ok(());
    }
    if output::is_quiet() {
        return Ok(());
    }

    let s = Styled::new();
    println!(
        "  {:<16} {:<9} {:<8} {:>4}  {:<6} {}",
        "PROVIDER", "CATEGORY", "MODE", "URLS", "AGE", "STATUS"
    );
    for (p, (current, lease, failure)) in rt.registry.iter().zip(&status) {
        let age = current
            .as_ref()
            .map(|c| format_age(c.age(now)))
            .unwrap_or_else(|| "-".to_string());
        let state = match (current, lease) {
            (_, Some(_)) => format!("{} refreshing", s.warn_sym()),
            (None, None) => s.dim("no snapshot"),
            (Some(c), None) if c.age(now) < freshness => format!("{} fresh", s.ok_sym()),
            (Some(_), None) => s.dim("stale"),
        };
        let rejected = if failure.is_some() {
            format!("  {} last attempt rejected", s.err_sym())
        } else {
            String::new()
        };
        println!(
            "  {:<16} {:<9} {:<8} {:>4}  {:<6} {state}{rejected}",
            p.id,
            format!("{:?}", p.category).to_lowercase(),
            format!("{:?}", p.render.mode).to_lowercase(),
            p.urls.len(),
            age,
        );
    }
    Ok(())
}
