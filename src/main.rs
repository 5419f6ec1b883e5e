use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use invsnap::types::DEFAULT_BASE_URL;
use invsnap::{
    InventoryApi, Listing, ListingFilters, PageRequest, SnapshotRegistry, SnapshotService,
    SnapshotStatus, StartSnapshotRequest, UpstreamConfig,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "invsnap")]
#[command(about = "Snapshot and page through Cin7 Core inventory listings", long_about = None)]
#[command(version)]
struct Cli {
    /// API root URL
    #[arg(long, env = "CIN7_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Account id sent as api-auth-accountid
    #[arg(long, env = "CIN7_ACCOUNT_ID")]
    account_id: String,

    /// Application key sent as api-auth-applicationkey
    #[arg(long, env = "CIN7_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify credentials and connectivity
    Check,
    /// Fetch a single projected page
    List(ListingArgs),
    /// Build a snapshot and stream its items as JSON Lines
    Snapshot(SnapshotArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ListingKind {
    Products,
    Stock,
}

impl From<ListingKind> for Listing {
    fn from(kind: ListingKind) -> Self {
        match kind {
            ListingKind::Products => Listing::Products,
            ListingKind::Stock => Listing::StockAvailability,
        }
    }
}

#[derive(Args, Debug)]
struct ListingArgs {
    /// Which listing to read
    #[arg(long, value_enum, default_value = "products")]
    listing: ListingKind,

    /// Page to start from (1-based)
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Upstream page size (max 1000)
    #[arg(long, default_value_t = 100)]
    limit: u32,

    /// Filter by product name
    #[arg(long)]
    name: Option<String>,

    /// Filter by SKU
    #[arg(long)]
    sku: Option<String>,

    /// Filter by location (stock listing)
    #[arg(long)]
    location: Option<String>,

    /// Extra fields to keep, comma-separated; "*" keeps everything
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,
}

impl ListingArgs {
    fn filters(&self) -> ListingFilters {
        ListingFilters {
            name: self.name.clone(),
            sku: self.sku.clone(),
            location: self.location.clone(),
        }
    }

    fn fields(&self) -> Option<Vec<String>> {
        if self.fields.is_empty() {
            None
        } else {
            Some(self.fields.clone())
        }
    }
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    #[command(flatten)]
    listing: ListingArgs,

    /// Items requested per chunk read
    #[arg(long, default_value_t = 500)]
    chunk_size: usize,

    /// Wait between reads while the snapshot is still building
    #[arg(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    poll_interval: Duration,

    /// Write items here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for JSON output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("invsnap={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = UpstreamConfig {
        base_url: cli.base_url,
        account_id: cli.account_id,
        application_key: cli.api_key,
        ..UpstreamConfig::default()
    };
    let api = InventoryApi::from_config(&config).context("failed to set up upstream client")?;

    match cli.command {
        Command::Check => {
            let report = api.health_check().await.context("health check failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::List(args) => {
            let request = PageRequest {
                listing: args.listing.into(),
                page: args.page.max(1),
                limit: args.limit.clamp(1, 1000),
                filters: args.filters(),
            };
            let fields = args.fields();
            let page = api
                .list(&request, fields.as_deref())
                .await
                .with_context(|| format!("failed to list {}", request.listing))?;
            let body = json!({
                "page": request.page,
                "count": page.items.len(),
                "hasMore": page.has_more,
                "items": page.items,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Snapshot(args) => run_snapshot(api, args).await?,
    }
    Ok(())
}

async fn run_snapshot(api: InventoryApi, args: SnapshotArgs) -> Result<()> {
    if args.chunk_size == 0 {
        bail!("--chunk-size must be greater than zero");
    }

    let registry = Arc::new(SnapshotRegistry::new(Arc::new(api)));
    let service = SnapshotService::new(Arc::clone(&registry));

    let sink: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let mut writer = BufWriter::new(sink);

    let started = service.start(StartSnapshotRequest {
        listing: args.listing.listing.into(),
        page: args.listing.page,
        limit: args.listing.limit,
        filters: args.listing.filters(),
        fields: args.listing.fields(),
    });
    let id = started.snapshot_id;
    info!("🚀 Snapshot {} started", id);

    let pb = if atty::is(atty::Stream::Stderr) {
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} | {elapsed_precise} elapsed")
                .context("invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let streamed = tokio::select! {
        streamed = stream_items(&service, &id, &args, &mut writer, pb.as_ref()) => streamed,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing snapshot {}", id);
            registry.shutdown().await;
            bail!("interrupted");
        }
    };
    let written = streamed?;
    writer.flush().await?;

    let status = service.status(&id).await?;
    service.close(&id).await;

    match status.status {
        SnapshotStatus::Failed => {
            if let Some(pb) = &pb {
                pb.finish_with_message("❌ Snapshot build failed!");
            }
            bail!(
                "snapshot build failed after {} items: {}",
                status.fetched_count,
                status.error.unwrap_or_default()
            );
        }
        _ => {
            if status.truncated {
                warn!(
                    "Snapshot stopped at the {} item cap; the listing has more items",
                    registry.settings().max_items
                );
            }
            let message = format!("✅ Wrote {} items", written);
            match &pb {
                Some(pb) => pb.finish_with_message(message),
                None => info!("{}", message),
            }
        }
    }
    Ok(())
}

/// Copies the snapshot to `writer` chunk by chunk, following the cursor
/// while the build is still running. Returns the number of items written.
async fn stream_items(
    service: &SnapshotService,
    id: &str,
    args: &SnapshotArgs,
    writer: &mut BufWriter<Box<dyn AsyncWrite + Unpin + Send>>,
    pb: Option<&indicatif::ProgressBar>,
) -> Result<usize> {
    let mut written = 0usize;
    let mut offset = Some(0);

    while let Some(at) = offset {
        let chunk = service.chunk(id, at, args.chunk_size).await?;
        for item in &chunk.items {
            let line = serde_json::to_string(item)?;
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        written += chunk.items.len();

        if let Some(pb) = pb {
            pb.set_message(format!(
                "📦 {} fetched, {} written ({})",
                chunk.fetched_count, written, chunk.status
            ));
        }
        if chunk.items.is_empty() && chunk.next_offset.is_some() {
            tokio::time::sleep(args.poll_interval).await;
        }
        offset = chunk.next_offset;
    }
    Ok(written)
}
