//! CLI command implementations.

use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use console::style;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{Agent, OpenAiChatClient, TurnKind};
use crate::config::{get_config_dir, Config, EmbeddingConfig};
use crate::corpus::{Corpus, PriceTier, TimeOfDay, Zone};
use crate::index::{Embedder, HashingEmbedder, InMemoryIndex, OllamaEmbedder};
use crate::search::{DishFilters, RestaurantFilters, RetrievalService};
use crate::{GuideError, Result};

/// Restaurant filter flags shared by the `search` command.
#[derive(Debug, Default, Clone)]
pub struct RestaurantSearchOpts {
    pub n_results: Option<usize>,
    pub zone: Option<String>,
    pub price: Option<String>,
    pub vegetarian: bool,
    pub vegan: bool,
    pub gluten_free: bool,
    pub open_at: Option<String>,
}

/// Dish filter flags shared by the `dishes` command.
#[derive(Debug, Default, Clone)]
pub struct DishSearchOpts {
    pub n_results: Option<usize>,
    pub zone: Option<String>,
    pub price: Option<String>,
    pub restaurant: Option<String>,
    pub category: Option<String>,
    pub vegetarian: bool,
    pub vegan: bool,
    pub gluten_free: bool,
    pub halal: bool,
    pub lactose_free: bool,
}

fn build_embedder(config: &EmbeddingConfig, offline: bool) -> Result<Arc<dyn Embedder>> {
    if offline {
        info!("Using offline hashing embedder");
        return Ok(Arc::new(HashingEmbedder::default()));
    }

    let ollama = OllamaEmbedder::new(config)?;
    match ollama.health_check() {
        Ok(()) => {
            info!(model = %config.model, "Using Ollama embedding server");
            Ok(Arc::new(ollama))
        }
        Err(e) => {
            warn!(
                "Embedding server unavailable ({}), falling back to offline embedder",
                e
            );
            Ok(Arc::new(HashingEmbedder::default()))
        }
    }
}

async fn build_service(
    config: &Config,
    corpus_path: Option<&Path>,
    offline: bool,
) -> Result<Arc<RetrievalService>> {
    let corpus = match corpus_path {
        Some(path) => Corpus::from_json_file(path)?,
        None => Corpus::sample(),
    };

    let embedding = config.embedding.clone();
    let embedder =
        tokio::task::spawn_blocking(move || build_embedder(&embedding, offline))
            .await
            .map_err(|e| GuideError::Embedding(format!("embedder setup failed: {}", e)))??;

    let service = Arc::new(RetrievalService::new(
        Arc::new(InMemoryIndex::new()),
        embedder,
        config.search.clone(),
    ));
    let stats = service.load_and_index(corpus).await?;
    println!(
        "Indexed {} restaurants and {} dishes.",
        stats.restaurants, stats.dishes
    );
    Ok(service)
}

/// Index a corpus and report counts. Mostly useful as a validation pass over
/// a corpus file before using it with `chat`.
#[inline]
pub async fn index_corpus(
    config: &Config,
    corpus_path: Option<&Path>,
    offline: bool,
) -> Result<()> {
    build_service(config, corpus_path, offline).await?;
    Ok(())
}

/// One-shot restaurant search from the command line.
#[inline]
pub async fn search_restaurants(
    config: &Config,
    corpus_path: Option<&Path>,
    offline: bool,
    query: &str,
    opts: &RestaurantSearchOpts,
) -> Result<()> {
    let service = build_service(config, corpus_path, offline).await?;

    let filters = RestaurantFilters {
        price: opts.price.as_deref().map(PriceTier::from_str).transpose()?,
        zone: opts.zone.as_deref().map(Zone::from_str).transpose()?,
        has_vegetarian: opts.vegetarian.then_some(true),
        has_vegan: opts.vegan.then_some(true),
        has_gluten_free: opts.gluten_free.then_some(true),
        open_at: opts.open_at.as_deref().map(TimeOfDay::from_str).transpose()?,
        ..RestaurantFilters::default()
    };

    let hits = service
        .search_restaurants(query, opts.n_results, &filters)
        .await?;

    if hits.is_empty() {
        println!("No restaurants matched.");
        return Ok(());
    }

    for hit in &hits {
        println!();
        println!(
            "{} {}",
            style(&hit.restaurant.name).bold(),
            style(format!("(score {:.3})", hit.score)).dim()
        );
        println!("{}", hit.document);
    }
    Ok(())
}

/// One-shot dish search from the command line.
#[inline]
pub async fn search_dishes(
    config: &Config,
    corpus_path: Option<&Path>,
    offline: bool,
    query: &str,
    opts: &DishSearchOpts,
) -> Result<()> {
    let service = build_service(config, corpus_path, offline).await?;

    let filters = DishFilters {
        vegetarian: opts.vegetarian.then_some(true),
        vegan: opts.vegan.then_some(true),
        gluten_free: opts.gluten_free.then_some(true),
        halal: opts.halal.then_some(true),
        lactose_free: opts.lactose_free.then_some(true),
        zone: opts.zone.as_deref().map(Zone::from_str).transpose()?,
        price: opts.price.as_deref().map(PriceTier::from_str).transpose()?,
        restaurant_name: opts.restaurant.clone(),
        category: opts.category.clone(),
    };

    let hits = service.search_dishes(query, opts.n_results, &filters).await?;

    if hits.is_empty() {
        println!("No dishes matched.");
        return Ok(());
    }

    for hit in &hits {
        println!();
        println!(
            "{} {} {}",
            style(&hit.dish.name).bold(),
            style(format!("at {}", hit.restaurant.name)).cyan(),
            style(format!("(score {:.3})", hit.score)).dim()
        );
        println!("{}", hit.document);
    }
    Ok(())
}

/// Interactive chat loop. Streams replies as they arrive; Ctrl-C cancels the
/// in-flight turn without ending the session.
#[inline]
pub async fn chat(config: &Config, corpus_path: Option<&Path>, offline: bool) -> Result<()> {
    let service = build_service(config, corpus_path, offline).await?;
    let backend = Arc::new(OpenAiChatClient::new(&config.model)?);
    let mut agent = Agent::new(backend, service, config)?;

    if config.model.api_key().is_none() {
        warn!(
            "Environment variable {} is not set, backend requests may be rejected",
            config.model.api_key_env
        );
    }

    // print the scripted greeting
    if let Some(turn) = agent.conversation().visible().first() {
        if let TurnKind::Assistant { text } = &turn.kind {
            println!("\n{}", text);
        }
    }
    println!("{}", style("Type a message, or \"exit\" to quit.").dim());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        let cancel = CancellationToken::new();
        let cancel_on_ctrlc = cancel.clone();
        let ctrlc = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel_on_ctrlc.cancel();
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let printer = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
        });

        let result = agent.respond_streaming(message, tx, &cancel).await;
        ctrlc.abort();
        let _ = printer.await;

        match result {
            Ok(_) => println!(),
            Err(GuideError::Cancelled) => {
                println!("\n{}", style("(cancelado)").dim());
            }
            Err(e) => {
                println!("\n{} {}", style("Error:").red().bold(), e);
            }
        }
    }

    println!("\u{a1}Hasta pronto!");
    Ok(())
}

/// Show configuration values and where they come from.
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config)
        .context("Failed to render configuration")?;
    println!("Configuration directory: {}", config.base_dir.display());
    println!();
    print!("{}", rendered);
    Ok(())
}

/// Report config location, embedding server reachability and model settings.
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("Configuration: {}", get_config_dir()?.display());
    println!("Model: {} via {}", config.model.model, config.model.base_url);
    println!(
        "API key ({}): {}",
        config.model.api_key_env,
        if config.model.api_key().is_some() {
            "set"
        } else {
            "not set"
        }
    );

    let embedding = config.embedding.clone();
    let health = tokio::task::spawn_blocking(move || {
        OllamaEmbedder::new(&embedding).and_then(|e| e.health_check())
    })
    .await
    .map_err(|e| GuideError::Embedding(format!("health check task failed: {}", e)))?;

    match health {
        Ok(()) => println!(
            "Embedding server: {} ({}) reachable",
            config.embedding.server_url().map_err(|e| GuideError::Config(e.to_string()))?,
            config.embedding.model
        ),
        Err(e) => println!("Embedding server: unavailable ({})", e),
    }

    let sample = Corpus::sample();
    println!(
        "Sample corpus: {} restaurants, {} dishes",
        sample.restaurants.len(),
        sample.dishes.len()
    );
    Ok(())
}
