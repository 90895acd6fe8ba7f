use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use tracing_subscriber::EnvFilter;

mod config;
mod matcher;
mod routes;
mod store;
mod summarizer;
#[cfg(test)]
mod test_support;

use matcher::Matcher;
use routes::AppState;
use store::Store;
use summarizer::{LlmConfig, Summarizer};

#[derive(Parser)]
#[command(name = "recall-server", about = "Recall recognize/summary back end")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP endpoints (default)
    Serve,
    /// Add a person the patient knows
    AddPerson {
        name: String,
        /// How they are related, e.g. "Daughter"
        relationship: String,
        #[arg(long)]
        photo_url: Option<String>,
    },
    /// Record a memory note about a person
    AddMemory { person_id: String, text: String },
    /// Record a conversation transcript with a person
    AddConversation { person_id: String, transcript: String },
    /// List known people
    List,
}

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = config::Config::from_env();
    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, store).await?,
        Commands::AddPerson {
            name,
            relationship,
            photo_url,
        } => {
            let person = store
                .add_person(&name, &relationship, photo_url.as_deref())
                .await?;
            println!("{}", person.id);
        }
        Commands::AddMemory { person_id, text } => {
            store.add_memory(&person_id, &text).await?;
            println!("Memory added");
        }
        Commands::AddConversation {
            person_id,
            transcript,
        } => {
            store.add_conversation(&person_id, &transcript).await?;
            println!("Conversation added");
        }
        Commands::List => {
            let people = store.list_people().await?;
            if people.is_empty() {
                println!("No people recorded");
            }
            for p in people {
                println!("{}\t{}\t{}", p.id, p.name, p.relationship);
            }
        }
    }

    Ok(())
}

async fn serve(config: config::Config, store: Store) -> Result<()> {
    let http = Client::builder()
        .timeout(config.upstream_timeout)
        .build()
        .context("failed to create HTTP client")?;

    let llm = config.llm_url.map(|url| LlmConfig {
        url,
        api_key: config.llm_api_key,
        model: config.llm_model,
    });
    let state = web::Data::new(AppState {
        store,
        matcher: Matcher::new(http.clone(), config.matcher_url),
        summarizer: Summarizer::new(http, llm),
    });

    tracing::info!(bind = %config.bind, "recall-server listening");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(routes::cors_headers())
            .configure(routes::configure)
    })
    .bind(config.bind.as_str())
    .with_context(|| format!("failed to bind {}", config.bind))?
    .run()
    .await?;

    tracing::info!("recall-server stopped");
    Ok(())
}
