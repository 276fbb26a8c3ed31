use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, EnvFilter};
use wikiprep_core::persist::TermPaths;
use wikiprep_core::resolve::LinkSources;
use wikiprep_core::{build_link_graph, build_term_frequencies, CancelToken, Outcome, PipelineConfig, RunSummary};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build term-frequency and link-graph inputs from Wikipedia dumps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the article dump into term-frequency and document-info files (resumable)
    Terms {
        /// pages-articles XML dump (.xml, .xml.bz2 or .xml.gz)
        #[arg(long, env = "WIKIPREP_DUMP")]
        dump: PathBuf,
        /// Term-frequency output (JSON lines, appended)
        #[arg(long, env = "WIKIPREP_TF_OUT", default_value = "tf_data.jsonl")]
        tf_out: PathBuf,
        /// Document-info output (JSON lines, appended); also the resume checkpoint
        #[arg(long, env = "WIKIPREP_DOC_OUT", default_value = "doc_info.jsonl")]
        doc_out: PathBuf,
        /// Worker threads
        #[arg(long, env = "WIKIPREP_WORKERS", default_value_t = 10)]
        workers: usize,
    },
    /// Resolve the page-link export into a `from,to` edge file.
    ///
    /// Progress is counted in edges written and reported every 100,000 edges,
    /// not every 1000 records as `terms` does.
    Links {
        /// pagelinks SQL export (.sql or .sql.gz)
        #[arg(long, env = "WIKIPREP_PAGELINKS")]
        pagelinks: PathBuf,
        /// linktarget SQL export (.sql or .sql.gz)
        #[arg(long, env = "WIKIPREP_LINKTARGET")]
        linktarget: PathBuf,
        /// Document-info file written by `terms`
        #[arg(long, env = "WIKIPREP_DOC_INFO", default_value = "doc_info.jsonl")]
        doc_info: PathBuf,
        /// Edge output (truncated at start)
        #[arg(long, env = "WIKIPREP_LINKS_OUT", default_value = "pagelinks.csv")]
        out: PathBuf,
        /// Worker threads; each one holds a full resolution map. Throughput is
        /// reported every 100,000 edges
        #[arg(long, env = "WIKIPREP_LINK_WORKERS", default_value_t = 4)]
        workers: usize,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let interrupt = install_interrupt_handler()?;
    let started = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| "".into());
    tracing::info!(%started, "run started");

    let summary = match cli.command {
        Commands::Terms { dump, tf_out, doc_out, workers } => {
            let paths = TermPaths::new(tf_out, doc_out);
            let config = PipelineConfig::default().with_workers(workers);
            build_term_frequencies(&dump, &paths, &config, interrupt)?
        }
        Commands::Links { pagelinks, linktarget, doc_info, out, workers } => {
            let sources = LinkSources { doc_info, linktarget };
            let config = PipelineConfig::links().with_workers(workers);
            build_link_graph(&pagelinks, sources, &out, &config, interrupt)?
        }
    };
    finish(summary)
}

/// Cancels the returned token on the first Ctrl+C.
fn install_interrupt_handler() -> Result<CancelToken> {
    let token = CancelToken::new();
    let trigger = token.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    std::thread::Builder::new().name("ctrl-c".into()).spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C detected, shutting down pool");
                trigger.cancel();
            }
        });
    })?;
    Ok(token)
}

fn finish(summary: RunSummary) -> Result<()> {
    match summary.outcome {
        Outcome::Completed => {
            tracing::info!(processed = summary.processed, total = summary.total, "done");
            Ok(())
        }
        Outcome::Interrupted => {
            tracing::warn!(processed = summary.processed, "workers terminated by user, rerun to resume");
            Ok(())
        }
        Outcome::Failed(e) => Err(e).context("run failed"),
    }
}
