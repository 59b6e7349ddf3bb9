use std::path::PathBuf;

use anyhow::Result;

use statline::config::IngestConfig;
use statline::ingest;
use statline::logging::init_tracing;
use statline::sources::SourceCatalog;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing("info")?;

    let mut cfg = IngestConfig::from_env();
    if let Some(path) = arg_value("--db") {
        cfg.db_path = PathBuf::from(path);
    }
    if let Some(season) = arg_value("--season").and_then(|v| v.parse::<i32>().ok()) {
        cfg.season = season;
    }

    let aliases = cfg.load_aliases()?;
    let catalog = SourceCatalog::mlb(cfg.season);
    let summary = ingest::run_ingest(&cfg, &catalog, &aliases)?;

    if std::env::args().any(|arg| arg == "--json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Stat ingest complete");
    println!("DB: {}", summary.db_path.display());
    println!("Season: {}", summary.season);
    println!("Units: {}/{}", summary.units_succeeded, summary.units_total);
    println!("Values upserted: {}", summary.values_upserted);
    println!(
        "Derived totals: {} (pending {}, backfilled {})",
        summary.derived, summary.underived, summary.backfilled
    );
    println!("Players upserted: {}", summary.players_upserted);
    println!(
        "Fielding rows: matched={} skipped={}",
        summary.fielding_matched, summary.fielding_skipped
    );
    if summary.unresolved > 0 {
        println!("Unresolved names: {}", summary.unresolved);
    }
    if !summary.errors.is_empty() {
        println!("errors: {}", summary.errors.len());
        for err in summary.errors.iter().take(8) {
            println!(" - {err}");
        }
    }
    Ok(())
}

/// Accepts both `--flag value` and `--flag=value`.
fn arg_value(flag: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
