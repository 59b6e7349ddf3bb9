use anyhow::{Context, Result, anyhow};

use statline::config::IngestConfig;
use statline::http_client::{RequestHeaders, fetch_text, http_client};
use statline::logging::init_tracing;
use statline::sources::SourceCatalog;
use statline::table_locator::locate_table;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing("warn")?;

    let cfg = IngestConfig::from_env();
    let catalog = SourceCatalog::mlb(cfg.season);
    let slug = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "runs-per-game".to_string());
    let limit = std::env::var("PROBE_ROW_LIMIT")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(10)
        .clamp(1, 60);

    let (url, query) = if slug == "fielding" {
        (cfg.fielding_url.clone(), &catalog.fielding_query)
    } else {
        let page = catalog
            .page(&slug)
            .ok_or_else(|| anyhow!("unknown page slug {slug}"))?;
        (catalog.page_url(&cfg, page), &catalog.per_unit_query)
    };

    let client = http_client()?;
    let headers = RequestHeaders {
        user_agent: &cfg.user_agent,
        referer: &cfg.referer,
    };
    let html = fetch_text(client, &url, headers).with_context(|| format!("fetch {url}"))?;

    let Some(table) = locate_table(&html, query) else {
        eprintln!("No matching table found at {url}");
        return Ok(());
    };

    println!("URL: {url}");
    println!("Score: {}  Rows: {}", table.score, table.rows.len());
    println!("Columns: {:?}", table.columns);
    for row in table.rows.iter().take(limit) {
        let cells = row
            .cells
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match row.link.as_deref() {
            Some(link) => println!("{} <{link}> {cells}", row.identity),
            None => println!("{} {cells}", row.identity),
        }
    }
    Ok(())
}
