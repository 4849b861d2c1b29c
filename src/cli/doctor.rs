//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use mnemos::config::MnemosConfig;
use mnemos::db;
use mnemos::embedding;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &MnemosConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `mnemos serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let conn = db::open_database(&db_path)
        .context("failed to open database (may be corrupt)")?;

    let report = db::check_database_health(&conn)
        .context("failed to run health check")?;

    let configured = match embedding::create_provider(&config.embedding) {
        Ok(provider) => provider.model_name().to_string(),
        Err(e) => {
            println!("Embedding provider '{}' unavailable: {e:#}", config.embedding.provider);
            config.embedding.model.clone()
        }
    };

    println!("Mnemos Health Report");
    println!("====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {configured}");
    if let Some(ref stored) = report.embedding_model {
        if stored != &configured {
            println!("  WARNING: model mismatch! Stored vectors will not match new queries.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();
    println!("Row counts:");
    println!("  short_term:      {}", report.short_term_count);
    println!("  medium_term:     {}", report.medium_term_count);
    println!("  long_term:       {}", report.long_term_count);
    println!("  Audit log:       {}", report.audit_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: restore from a backup, e.g. cp backup.db {}", db_path.display());
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
