use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::future::join_all;
use litreview::config::{default_config_path, find_config_file, load_config, Config};
use litreview::models::{CandidateRecord, CanonicalRecord, SearchQuery};
use litreview::sources::SourceRegistry;
use litreview::store::RecordStore;
use litreview::ui::{self, Status};
use litreview::utils::{rerank_by_similarity, CorpusStats, HttpClient};
use litreview::{print_status, ReconciliationEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// litreview - reconcile and enrich literature-review bibliographies
#[derive(Parser, Debug)]
#[command(name = "litreview")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reconcile, deduplicate and enrich bibliographic records", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short)]
    quiet: bool,

    /// Output format
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    output: OutputFormat,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run without the record store
    #[arg(long, global = true, default_value_t = false)]
    cache_free: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Table if stdout is a terminal, JSON otherwise
    Auto,
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile a JSON array of records against the store
    #[command(alias = "i")]
    Import {
        /// JSON file holding `[{"bib": {...}, "aux": {...}}, ...]`
        file: PathBuf,
    },

    /// Fill in missing metadata from the metadata sources
    #[command(alias = "e")]
    Enrich {
        /// Records to import and enrich (default: every stored record)
        file: Option<PathBuf>,

        /// Retry sources that previously found no confident match
        #[arg(long)]
        force: bool,

        /// Write the enriched records to this JSON file
        #[arg(long = "out")]
        out: Option<PathBuf>,
    },

    /// Search metadata sources for a title
    #[command(alias = "s")]
    Search {
        title: String,

        /// Source id (crossref, pubmed, arxiv, semantic, google_scholar); all searchable sources by default
        #[arg(long, short)]
        source: Option<String>,

        /// Maximum results per source
        #[arg(long, short, default_value_t = 5)]
        max: usize,

        /// Publication year
        #[arg(long)]
        year: Option<String>,

        /// Import the results into the store
        #[arg(long)]
        save: bool,
    },

    /// Show metadata coverage statistics
    Stats {
        /// Records file (default: the store)
        file: Option<PathBuf>,
    },

    /// Write every stored record to a JSON file
    Export { file: PathBuf },

    /// Write a configuration file with the default settings
    InitConfig {
        /// Destination (default: user config directory)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration from file if specified or found in default locations
    let config_path = cli.config.clone().or_else(find_config_file);
    let mut config = load_config(config_path.as_deref()).context("Failed to load configuration")?;
    if cli.cache_free {
        config.store.cache_free = true;
    }

    init_tracing(&cli, &config);
    if let Some(path) = &config_path {
        tracing::debug!("Using config file: {}", path.display());
    }

    let output = match cli.output {
        OutputFormat::Auto if ui::is_terminal() => OutputFormat::Table,
        OutputFormat::Auto => OutputFormat::Json,
        other => other,
    };

    match cli.command {
        Commands::Import { file } => {
            let engine = build_engine(&config, cli.quiet)?;
            let candidates = read_records(&file)?
                .into_iter()
                .enumerate()
                .map(|(index, record)| CandidateRecord::from_record(index, record))
                .collect();
            let report = engine.import(candidates)?;
            if !cli.quiet {
                print_status!(
                    Status::Success,
                    format!(
                        "Imported {}: {} added, {} updated, {} folded",
                        file.display(),
                        report.added,
                        report.updated,
                        report.folded
                    )
                );
                if report.conflicts > 0 {
                    print_status!(
                        Status::Warning,
                        format!(
                            "{} entries carried an identifier of another stored record; it was left out",
                            report.conflicts
                        )
                    );
                }
            }
        }

        Commands::Enrich { file, force, out } => {
            let engine = build_engine(&config, cli.quiet)?.retry_skipped(force);
            let mut records = match (&file, engine.store()) {
                (Some(file), _) => {
                    let candidates = read_records(file)?
                        .into_iter()
                        .enumerate()
                        .map(|(index, record)| CandidateRecord::from_record(index, record))
                        .collect();
                    engine.import(candidates)?.records
                }
                (None, Some(store)) => store.all()?,
                (None, None) => bail!("Cache-free enrichment needs a records file"),
            };

            let report = engine.enrich_batch(&mut records).await?;
            if !cli.quiet {
                print_status!(
                    Status::Success,
                    format!(
                        "Enriched {} records: {} merges, {} without a confident match, {} failed calls",
                        report.records, report.merged, report.rejected, report.failed
                    )
                );
                if report.folded > 0 {
                    print_status!(
                        Status::Success,
                        format!("{} records turned out to be stored duplicates and were folded", report.folded)
                    );
                }
                if report.conflicts > 0 {
                    print_status!(
                        Status::Warning,
                        format!("{} records share an identifier with another record and were not saved", report.conflicts)
                    );
                }
            }
            if let Some(out) = out {
                write_records(&out, &records)?;
            }
        }

        Commands::Search {
            title,
            source,
            max,
            year,
            save,
        } => {
            let registry = build_registry(&config)?;
            let sources = match &source {
                Some(id) => vec![registry.get_required(id)?],
                None => registry.searchable(),
            };

            let mut query = SearchQuery::new(&title)
                .identity(config.identity.email.clone())
                .max_results(max);
            if let Some(year) = year {
                query = query.year(year);
            }

            // Distinct sources are paced independently, so they can be searched together
            let results = join_all(sources.iter().map(|src| src.search(&query))).await;
            let mut candidates = Vec::new();
            for (src, result) in sources.iter().zip(results) {
                match result {
                    Ok(found) => {
                        if !cli.quiet {
                            eprintln!("{} Found {} results from {}", ui::source_icon(src.id()), found.len(), src.name());
                        }
                        candidates.extend(found);
                    }
                    Err(e) => {
                        if !cli.quiet {
                            eprintln!("Error searching {}: {}", src.name(), e);
                        }
                    }
                }
            }

            let ranked: Vec<CandidateRecord> = rerank_by_similarity(candidates, &title)
                .into_iter()
                .map(|r| r.item)
                .collect();
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ranked)?),
                _ => println!("{}", ui::records_table(&ranked)),
            }

            if save {
                let engine = ReconciliationEngine::new(Arc::new(registry), open_store(&config)?, config.matching.clone());
                let report = engine.import(ranked)?;
                if !cli.quiet {
                    print_status!(
                        Status::Success,
                        format!("Saved: {} added, {} updated", report.added, report.updated)
                    );
                }
            }
        }

        Commands::Stats { file } => {
            let records = match file {
                Some(file) => read_records(&file)?,
                None => match open_store(&config)? {
                    Some(store) => store.all()?,
                    None => bail!("Cache-free statistics need a records file"),
                },
            };
            let stats = CorpusStats::collect(&records);
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                _ => {
                    ui::print_section("Metadata coverage");
                    println!("{}", ui::stats_table(&stats));
                }
            }
        }

        Commands::Export { file } => {
            let Some(store) = open_store(&config)? else {
                bail!("Nothing to export in cache-free mode");
            };
            let records = store.all()?;
            write_records(&file, &records)?;
            if !cli.quiet {
                print_status!(
                    Status::Success,
                    format!("Exported {} records to {}", ui::format_number(records.len()), file.display())
                );
            }
        }

        Commands::InitConfig { path, force } => {
            let Some(path) = path.or_else(default_config_path) else {
                bail!("No config directory on this platform; pass --path");
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save(&path)?;
            print_status!(Status::Success, format!("Wrote {}", path.display()));
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise the level comes from -v/-q or the config file
fn init_tracing(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("litreview={}", level)),
    );

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.as_deref() == Some("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_registry(config: &Config) -> Result<SourceRegistry> {
    let governor = Arc::new(config.governor());
    let client = Arc::new(HttpClient::with_config(governor, &config.http)?);
    Ok(SourceRegistry::new(client, config))
}

fn open_store(config: &Config) -> Result<Option<Arc<RecordStore>>> {
    if config.store.cache_free {
        return Ok(None);
    }
    let store = RecordStore::open(&config.store.path)
        .with_context(|| format!("Failed to open record store {}", config.store.path.display()))?;
    Ok(Some(Arc::new(store)))
}

fn build_engine(config: &Config, quiet: bool) -> Result<ReconciliationEngine> {
    let registry = Arc::new(build_registry(config)?);
    Ok(
        ReconciliationEngine::new(registry, open_store(config)?, config.matching.clone())
            .with_identity(config.identity.email.clone())
            .show_progress(!quiet && ui::is_terminal()),
    )
}

fn read_records(path: &Path) -> Result<Vec<CanonicalRecord>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is not a JSON array of records", path.display()))
}

fn write_records(path: &Path, records: &[CanonicalRecord]) -> Result<()> {
    let content = serde_json::to_string_pretty(records)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
