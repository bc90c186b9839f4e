//! Budget command implementation

use crate::budget::{BudgetGuardrail, BudgetLedger, BudgetSnapshot, SqliteLedger};
use crate::config::Config;
use crate::db::FeatureDb;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Today's usage against the configured caps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub enabled: bool,
    pub usage: BudgetSnapshot,
    pub usd_day_cap: f64,
    pub max_llm_calls: u32,
    pub max_emb_calls: u32,
}

/// Read today's budget counters for a campaign
pub async fn cmd_budget(config: &Config, campaign_id: &str) -> Result<BudgetStatus> {
    let db = FeatureDb::connect(config).await?;
    db.init_schema().await?;
    let ledger: Arc<dyn BudgetLedger> = Arc::new(SqliteLedger::new(db));
    let guardrail = BudgetGuardrail::new(ledger, config.budget.clone());

    Ok(BudgetStatus {
        enabled: config.budget.enabled,
        usage: guardrail.snapshot(campaign_id).await?,
        usd_day_cap: config.budget.usd_day_cap,
        max_llm_calls: config.budget.max_llm_calls,
        max_emb_calls: config.budget.max_emb_calls,
    })
}

pub fn print_budget(status: &BudgetStatus) {
    println!(
        "\n💰 Budget for {} ({} UTC)\n",
        status.usage.campaign_id, status.usage.day_bucket
    );
    if !status.enabled {
        println!("  Guardrail disabled");
    }
    println!(
        "  USD: {:.2} / {:.2}",
        status.usage.usd_spent, status.usd_day_cap
    );
    println!(
        "  LLM calls: {} / {}",
        status.usage.llm_calls, status.max_llm_calls
    );
    println!(
        "  Embedding calls: {} / {}",
        status.usage.embedding_calls, status.max_emb_calls
    );
}
