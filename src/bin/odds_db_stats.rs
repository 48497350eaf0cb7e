use anyhow::{Context, Result};
use odds_store::OddsStore;
use std::path::Path;

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let db_path = std::env::var("HARVEST_DB_PATH").unwrap_or_else(|_| "data/odds.db".to_string());
    let store = OddsStore::open(Path::new(&db_path)).with_context(|| format!("open db at {db_path}"))?;
    let stats = store.stats().context("read store stats")?;

    println!("db_path={db_path}");
    println!("odds_history: {}", stats.records);
    println!("matches: {}", stats.matches);
    println!("fixtures: {}", stats.fixtures);
    println!("completed_targets: {}", stats.completed_targets);
    println!("runs: {}", stats.runs);

    if let Some(run) = stats.last_run {
        println!(
            "last_run: id={} started={} finished={} outcome={}",
            run.run_id,
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-"),
            run.outcome
        );
    } else {
        println!("last_run: <none>");
    }

    Ok(())
}
