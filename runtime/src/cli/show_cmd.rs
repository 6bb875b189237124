//! Read-only views: `show`, `archive`, and `failure`.

use crate::cli::context::Runtime;
use crate::cli::output::{self, format_age, Styled};
use crate::store::{read_best_effort, BestEffort};
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use pricewatch::PricingSnapshot;
use serde_json::json;

/// Print the current snapshot, or walk the fallback chain with `best_effort`.
pub async fn show(rt: &Runtime, provider: &str, best_effort: bool) -> Result<()> {
    let descriptor = rt.provider(provider)?;

    if best_effort {
        let found = read_best_effort(
            rt.store.as_ref(),
            &descriptor.id,
            descriptor.default_data.as_ref(),
            Utc::now().date_naive(),
        )
        .await;
        if output::is_json() {
            output::print_json(&found);
            return Ok(());
        }
        let s = Styled::new();
        match &found {
            BestEffort::Current { snapshot } => print_snapshot(&s, "current", snapshot),
            BestEffort::Archived { date, snapshot } => {
                print_snapshot(&s, &format!("archived {date}"), snapshot)
            }
            BestEffort::Default { data } => {
                println!("  {} {provider}: serving bundled default data", s.warn_sym());
                output::print_json(data);
            }
            BestEffort::NoData => println!("  {} {provider}: no data available", s.err_sym()),
        }
        return Ok(());
    }

    let Some(snapshot) = rt.store.current(&descriptor.id).await? else {
        bail!("no snapshot for '{provider}' yet. Run `pricewatch refresh {provider}` first.");
    };
    if output::is_json() {
        output::print_json(&snapshot);
    } else {
        print_snapshot(&Styled::new(), "current", &snapshot);
    }
    Ok(())
}

/// List archive days, or print the snapshot archived for `date`.
pub async fn archive(rt: &Runtime, provider: &str, date: Option<&str>) -> Result<()> {
    let descriptor = rt.provider(provider)?;

    let Some(raw) = date else {
        let dates = rt.store.archived_dates(&descriptor.id).await?;
        if output::is_json() {
            output::print_json(&json!({"provider": provider, "dates": dates}));
        } else if dates.is_empty() {
            println!("  No archived snapshots for {provider}.");
        } else {
            for d in dates {
                println!("  {d}");
            }
        }
        return Ok(());
    };

    let day: NaiveDate = raw
        .parse()
        .with_context(|| format!("invalid date '{raw}', expected YYYY-MM-DD"))?;
    let Some(snapshot) = rt.store.archived(&descriptor.id, day).await? else {
        bail!("no snapshot archived for '{provider}' on {day}");
    };
    if output::is_json() {
        output::print_json(&snapshot);
    } else {
        print_snapshot(&Styled::new(), &format!("archived {day}"), &snapshot);
    }
    Ok(())
}

/// Print the last rejected attempt, if it is still retained.
pub async fn failure(rt: &Runtime, provider: &str) -> Result<()> {
    let descriptor = rt.provider(provider)?;
    let record = rt.store.last_failure(&descriptor.id).await?;

    if output::is_json() {
        output::print_json(&json!({"provider": provider, "failure": record}));
        return Ok(());
    }
    let s = Styled::new();
    let Some(record) = record else {
        println!("  {} {provider}: no rejected attempts on record", s.ok_sym());
        return Ok(());
    };
    println!(
        "  {} {provider}: rejected {} ago (job {}, model {}, confidence {:.2})",
        s.warn_sym(),
        format_age(Utc::now() - record.recorded_at),
        record.job_id,
        record.extraction_model,
        record.validation.confidence
    );
    for e in &record.validation.errors {
        println!("      {} {e}", s.err_sym());
    }
    for w in &record.validation.warnings {
        println!("      {} {w}", s.dim("-"));
    }
    if output::is_quiet() {
        return Ok(());
    }
    println!("\n  {}", s.bold("Rejected candidate:"));
    output::print_json(&record.candidate);
    Ok(())
}

fn print_snapshot(s: &Styled, label: &str, snapshot: &PricingSnapshot) {
    if !output::is_quiet() {
        println!(
            "  {} {} ({label}, {} old, confidence {:.2}, model {})",
            s.ok_sym(),
            s.bold(&snapshot.provider),
            format_age(snapshot.age(Utc::now())),
            snapshot.metadata.confidence,
            snapshot.metadata.extraction_model
        );
        for src in &snapshot.sources {
            println!("      {} {} [{}]", s.dim("·"), src.url, src.page_type.as_str());
        }
        println!();
    }
    output::print_json(&snapshot.data);
}
