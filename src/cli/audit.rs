use anyhow::Result;

use mnemos::config::MnemosConfig;
use mnemos::memory::audit::AuditFilter;

use super::{open_service, operator};

/// Print audit log entries, newest first.
pub async fn audit(config: &MnemosConfig, filter: AuditFilter) -> Result<()> {
    let service = open_service(config)?;
    let entries = service.audit_history(&operator(), filter).await?;

    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{:>6}  {}  {:<17} {:<8} {:<12} {}",
            entry.seq,
            entry.created_at,
            entry.operation,
            entry.outcome,
            entry.tier.as_deref().unwrap_or("-"),
            entry.record_id.as_deref().unwrap_or("-"),
        );
        if let Some(ref details) = entry.details {
            println!("        by {}: {details}", entry.owner_id);
        } else {
            println!("        by {}", entry.owner_id);
        }
    }

    Ok(())
}
