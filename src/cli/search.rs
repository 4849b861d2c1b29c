use anyhow::Result;

use mnemos::config::MnemosConfig;
use mnemos::memory::service::SearchRequest;
use mnemos::memory::types::Tier;

use super::{open_service, operator, preview};

/// Run a search from the terminal as the operator.
pub async fn search(
    config: &MnemosConfig,
    query: &str,
    top_k: Option<i64>,
    tiers: Vec<Tier>,
) -> Result<()> {
    let service = open_service(config)?;
    let response = service
        .search_memory(
            &operator(),
            SearchRequest {
                query: query.to_string(),
                tiers,
                top_k,
                ..Default::default()
            },
        )
        .await?;

    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", response.total);

    for (i, hit) in response.results.iter().enumerate() {
        let record = &hit.record;
        println!(
            "  {}. [{}/{}] {} (owner: {}, importance: {:.2}, similarity: {:.4})",
            i + 1,
            record.tier,
            record.kind,
            record.id,
            record.owner_id,
            record.importance,
            hit.similarity,
        );
        println!("     {}", preview(&record.content, 120));
        println!();
    }

    Ok(())
}
