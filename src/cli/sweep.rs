//! CLI `sweep` command: one retention pass, run in the foreground.

use anyhow::Result;

use mnemos::config::MnemosConfig;

use super::{open_service, operator};

pub async fn sweep(config: &MnemosConfig, dry_run: bool) -> Result<()> {
    let service = open_service(config)?;
    let report = service.sweep_expired(&operator(), dry_run).await?;

    if report.dry_run {
        println!("Dry run at {} (nothing deleted)", report.swept_at);
    } else {
        println!("Sweep at {}", report.swept_at);
    }
    for tier in &report.tiers {
        match tier.error {
            Some(ref e) => println!("  {:<12} FAILED: {e}", tier.tier.as_str()),
            None if report.dry_run => {
                println!("  {:<12} {} expired", tier.tier.as_str(), tier.eligible)
            }
            None => println!("  {:<12} {} deleted", tier.tier.as_str(), tier.deleted),
        }
    }
    if !report.dry_run {
        println!("Total deleted: {}", report.total_deleted);
    }

    anyhow::ensure!(!report.has_failures(), "sweep failed for at least one tier");
    Ok(())
}
