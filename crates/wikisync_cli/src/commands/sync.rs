//! The `sync` command: publish the icon dataset to the wiki.

use std::collections::HashSet;
use std::sync::Arc;

use console::{Term, style};

use wikisync::retry::RetryConfig;
use wikisync::source::IconRecord;
use wikisync::sync::SyncReport;
use wikisync::{
    ApiError, Carrier, IconSource, ItemNaming, RequestScheduler, Shutdown, SyncDriver, SyncOptions,
    WikiClient,
};

use crate::config::Config;
use crate::progress::LoggingReporter;

/// Options of a sync run.
#[derive(Debug, Clone, clap::Args)]
pub(crate) struct SyncArgs {
    /// Ledger mutations between checkpoints (default from config or 100)
    #[arg(short = 'c', long)]
    checkpoint_every: Option<usize>,

    /// Only process the first N items (after --ids filtering)
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Only process these item ids
    #[arg(long, num_args = 1..)]
    ids: Vec<u32>,

    /// Do not sync the index and set modules
    #[arg(long)]
    no_aggregates: bool,

    /// Always load the ledger, even if its published checksum matches
    #[arg(long)]
    no_precheck: bool,
}

/// Keep the records selected by `--ids` and `--limit`, in dataset order.
fn select_records(mut records: Vec<IconRecord>, args: &SyncArgs) -> Vec<IconRecord> {
    if !args.ids.is_empty() {
        let wanted: HashSet<u32> = args.ids.iter().copied().collect();
        records.retain(|record| wanted.contains(&record.id));
    }
    if let Some(limit) = args.limit {
        records.truncate(limit);
    }
    records
}

fn naming(config: &Config) -> ItemNaming {
    ItemNaming {
        document_title: config.sync.document_title.clone(),
        asset_name: config.sync.asset_name.clone(),
        asset_description: config.sync.asset_description.clone(),
        aggregate_root: config.sync.aggregate_root.clone(),
    }
}

/// Log in when credentials are configured. The client logs the session user.
async fn authenticate(
    client: &WikiClient,
    credentials: Option<(&str, &str)>,
) -> Result<(), ApiError> {
    match credentials {
        Some((username, password)) => client.login(username, password).await,
        None => {
            tracing::warn!("No wiki credentials configured, writing anonymously");
            Ok(())
        }
    }
}

/// Handle the sync command.
pub(crate) async fn handle_sync(
    args: SyncArgs,
    config: &Config,
    shutdown: Shutdown,
) -> Result<SyncReport, Box<dyn std::error::Error>> {
    let api_url = config.wiki.api_url.as_deref().ok_or(
        "no wiki API URL configured (set [wiki] api_url or WIKISYNC_WIKI__API_URL)",
    )?;
    let user_agent = &config.wiki.user_agent;

    let scheduler = RequestScheduler::per_minute(config.wiki.requests_per_minute);
    let client = WikiClient::new(api_url, user_agent, scheduler)?;
    authenticate(&client, config.credentials()).await?;

    let source = IconSource::new(
        &config.source.base_url,
        user_agent,
        config.source.requests_per_second,
        naming(config),
    )?
    .with_prefetch(config.source.prefetch);
    let catalog = source.catalog().await?;
    let records = select_records(catalog.records.clone(), &args);
    tracing::info!(
        total = catalog.records.len(),
        without_image = catalog.without_image,
        selected = records.len(),
        "Fetched icon catalog"
    );

    let aggregates = if args.no_aggregates {
        Vec::new()
    } else {
        source.aggregate_items(&catalog)
    };

    let options = SyncOptions {
        checkpoint_every: args
            .checkpoint_every
            .unwrap_or(config.sync.checkpoint_every),
        ledger_file: config.sync.ledger_file.clone(),
        retry: RetryConfig::default(),
        precheck: config.sync.precheck && !args.no_precheck,
    };

    let mut driver = SyncDriver::new(client, options).with_shutdown(shutdown);
    if let Some(path) = &config.sync.carrier_template {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("could not read carrier template {}: {e}", path.display()))?;
        driver = driver.with_carrier_template(Carrier::load(&bytes)?);
    }

    let reporter = Arc::new(LoggingReporter::new());
    let callback = reporter.as_callback();
    let feed = source.feed(records).with_items(aggregates);
    let report = driver.run(feed, Some(&callback)).await?;

    display_summary(&report);
    Ok(report)
}

fn display_summary(report: &SyncReport) {
    if !Term::stdout().is_term() {
        return;
    }

    let headline = if report.interrupted {
        style("Sync interrupted").yellow().bold()
    } else if report.up_to_date {
        style("Already up to date").green().bold()
    } else {
        style("Sync complete").green().bold()
    };
    println!("\n{headline}: {} items processed", report.processed);

    for (label, counts) in [("Assets", &report.assets), ("Documents", &report.documents)] {
        println!(
            "  {label:<10} {} new, {} changed, {} unchanged",
            style(counts.new).cyan(),
            style(counts.changed).cyan(),
            counts.unchanged
        );
    }
    if report.fetch_failed > 0 {
        println!("  {:<10} {} images unavailable", "Skipped", report.fetch_failed);
    }
    println!("  {:<10} {} saves", "Ledger", report.checkpoints);
}
