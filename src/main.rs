use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;
use inquire::error::InquireResult;

mod cli;
mod config;
mod dataset;
mod history;
mod results;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod translate;
mod web;

use cli::{CacheAction, Command};
use config::Config;
use history::SearchHistory;
use semantic::{FastEmbedLoader, SearchPipeline, VectorStorage};
use storage::{BackendLocal, StorageManager};

const CACHE_DIR: &str = "cache";

fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("SIFT_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/sift"))
}

fn history_storage(base_path: &Path) -> anyhow::Result<Arc<dyn StorageManager>> {
    let backend = BackendLocal::new(base_path).context("failed to open data directory")?;
    Ok(Arc::new(backend))
}

/// Build an uninitialized pipeline from config.
fn build_pipeline(config: &Config, base_path: &Path) -> anyhow::Result<SearchPipeline> {
    let cache = BackendLocal::new(base_path.join(CACHE_DIR))
        .context("failed to open embedding cache directory")?;

    let loader = FastEmbedLoader {
        model_name: config.semantic.model.clone(),
        cache_dir: base_path.to_path_buf(),
    };

    Ok(SearchPipeline::new(
        Box::new(loader),
        config.dataset_source()?,
        VectorStorage::new(Arc::new(cache)),
    )
    .with_progress(config.semantic.show_progress))
}

fn confirm(message: &str) -> anyhow::Result<bool> {
    match inquire::prompt_confirmation(message) {
        InquireResult::Ok(answer) => Ok(answer),
        InquireResult::Err(err) => bail!("An error occurred: {}", err),
    }
}

fn print_page(page: &results::ResultPage) {
    if page.results.is_empty() {
        println!("No results found for \"{}\"", page.query);
        return;
    }

    println!("Search results for \"{}\"", page.query);
    println!();
    for view in &page.results {
        println!("{}. {} ({:.4})", view.rank, view.title, view.similarity);
        println!("   {}", view.author);
        println!("   {}", view.link);
        for (name, value) in &view.details {
            println!("   {name}: {value}");
        }
        println!();
    }
    println!("Page {} of {} ({} results)", page.page, page.total_pages, page.total);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let base_path = base_path()?;
    let mut config = Config::load_with(&base_path)?;
    if let Some(dataset) = args.dataset {
        config.dataset = dataset;
        config.validate()?;
    }

    match args.command {
        Command::Search { query, page, json } => {
            let mut pipeline = build_pipeline(&config, &base_path)?;
            pipeline.init()?;

            let ranked = pipeline.search(&query)?;
            let page = results::paginate(
                query.trim(),
                &ranked,
                pipeline.documents(),
                config.results.layout(),
                page,
            );

            let mut history = SearchHistory::load(history_storage(&base_path)?, config.history.limit)?;
            if let Err(err) = history.record(&query) {
                log::warn!("failed to record search history: {err}");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                print_page(&page);
            }

            pipeline.shutdown();
            Ok(())
        }

        Command::Serve {} => {
            let pipeline = build_pipeline(&config, &base_path)?;
            let history = SearchHistory::load(history_storage(&base_path)?, config.history.limit)?;
            web::start_daemon(config, pipeline, history)
        }

        Command::Reindex {} => {
            let mut pipeline = build_pipeline(&config, &base_path)?;
            pipeline.clear_cache()?;
            pipeline.init()?;
            println!("{} documents indexed", pipeline.documents().len());
            pipeline.shutdown();
            Ok(())
        }

        Command::Cache {
            action: CacheAction::Clear { yes },
        } => {
            if !yes && !confirm("Delete the embedding cache? The next search re-encodes the whole dataset.")? {
                return Ok(());
            }

            let pipeline = build_pipeline(&config, &base_path)?;
            pipeline.clear_cache()?;
            println!("Embedding cache cleared");
            Ok(())
        }

        Command::History { clear } => {
            let mut history = SearchHistory::load(history_storage(&base_path)?, config.history.limit)?;

            if clear {
                history.clear()?;
                println!("Search history cleared");
                return Ok(());
            }

            for query in history.entries() {
                println!("{query}");
            }
            Ok(())
        }

        Command::Translate { texts } => {
            let relay = translate::TranslationRelay::new(&config.translate)?;

            let translated = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(relay.translate_all(&texts))?;

            for text in translated {
                println!("{text}");
            }
            Ok(())
        }
    }
}
