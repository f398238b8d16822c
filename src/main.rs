//! autoplan - plan and run a request from the command line.
//!
//! Usage: `autoplan <request text>`
//!
//! Progress events are written to stdout as JSON lines, the final summary
//! last. Configuration comes from the environment (see `Config::from_env`).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autoplan::events::{BroadcastSink, EventSink};
use autoplan::llm::{LlmClient, LlmRouter, OpenAiCompatibleClient};
use autoplan::store::{PlanStore, SqlitePlanStore};
use autoplan::tools::ToolRegistry;
use autoplan::{Config, ExecutionContext, Orchestrator, PlanRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autoplan=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let request = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if request.trim().is_empty() {
        anyhow::bail!("Usage: autoplan <request text>");
    }

    let config = Config::from_env()?;

    let mut router = LlmRouter::new();
    if let Some(key) = &config.openrouter_api_key {
        router = router.with_provider(
            "openrouter",
            Arc::new(OpenAiCompatibleClient::openrouter(key.clone())) as Arc<dyn LlmClient>,
        );
    }
    if let Some(key) = &config.openai_api_key {
        let client = match &config.openai_base_url {
            Some(base_url) => OpenAiCompatibleClient::new(base_url.clone(), key.clone()),
            None => OpenAiCompatibleClient::openai(key.clone()),
        };
        router = router.with_provider("openai", Arc::new(client) as Arc<dyn LlmClient>);
    }

    let models = &config.orchestrator.models;
    for spec in [
        &models.planner,
        &models.executor,
        &models.checker,
        &models.summarizer,
    ] {
        if !router.has_provider(&spec.provider) {
            anyhow::bail!(
                "No API key configured for provider '{}' (model {})",
                spec.provider,
                spec
            );
        }
    }

    let store: Arc<dyn PlanStore> = Arc::new(SqlitePlanStore::open(&config.database_path)?);
    tracing::info!("Plan database at {}", config.database_path.display());

    // Tool implementations are supplied by embedding applications; the CLI
    // runs everything through the LLM.
    let tools = Arc::new(ToolRegistry::new());
    tools.init(Vec::new).await;

    let events = Arc::new(BroadcastSink::new(256));
    let mut rx = events.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(line) = serde_json::to_string(&event) {
                        println!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event printer lagged, {} event(s) dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        store,
        Arc::new(router),
        tools,
        events.clone() as Arc<dyn EventSink>,
    );

    let report = orchestrator.recover_stalled_tasks().await?;
    if !report.recovered.is_empty() {
        tracing::warn!(
            "Recovered {} stalled task(s) from a previous run",
            report.recovered.len()
        );
    }

    let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    let ctx = ExecutionContext::new(format!("cli-{}", uuid::Uuid::new_v4()), user);
    let result = orchestrator
        .run_request(&ctx, &PlanRequest::new(request))
        .await;

    drop(orchestrator);
    drop(events);
    let _ = printer.await;

    let plan = result?;
    println!();
    println!("{}", plan.summary.unwrap_or_default());
    Ok(())
}
