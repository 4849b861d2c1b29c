use anyhow::Result;

use mnemos::config::MnemosConfig;
use mnemos::memory::types::Tier;

use super::{open_service, operator};

/// Display memory statistics in the terminal.
pub async fn stats(config: &MnemosConfig, owner: Option<String>, tiers: Vec<Tier>) -> Result<()> {
    let service = open_service(config)?;
    let response = service.get_stats(&operator(), owner.clone(), tiers).await?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    if let Some(ref owner) = owner {
        println!("  Owner:               {owner}");
    }
    println!("  Total memories:      {}", response.total);
    println!("  Unique owners:       {}", response.unique_owners);
    match response.average_importance {
        Some(avg) => println!("  Average importance:  {avg:.3}"),
        None => println!("  Average importance:  -"),
    }
    println!();

    println!("By Tier:");
    println!("  {:<12} {}", "short_term", response.short_term_count);
    println!("  {:<12} {}", "medium_term", response.medium_term_count);
    println!("  {:<12} {}", "long_term", response.long_term_count);
    println!();

    println!("Awaiting sweep:        {}", response.pending_sweep);
    if let Some(size) = response.db_size_bytes {
        println!("Database size:         {size} bytes");
    }

    Ok(())
}
