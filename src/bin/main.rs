use finance_assistant_orchestrator::{
    data::postgres::{connect_lazy, PgBudgetDirectory, PgQueryExecutor},
    llm::{GeminiClient, LanguageModelClient},
    Conversation, ConversationContext, OrchestratorConfig, Workflow,
};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run one turn: `orchestrator <user_id> <message...>`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let user_id: i64 = match args.next().map(|a| a.parse()) {
        Some(Ok(id)) => id,
        _ => {
            eprintln!("usage: orchestrator <user_id> <message...>");
            std::process::exit(2);
        }
    };
    let message = args.collect::<Vec<_>>().join(" ");

    let api_key = env::var("GEMINI_API_KEY").unwrap_or_default();
    let database_url = env::var("DATABASE_URL")?;
    let user_name = env::var("ORCHESTRATOR_USER_NAME").unwrap_or_else(|_| "there".to_string());

    let config = OrchestratorConfig::from_env();
    info!(?config, "Finance assistant orchestrator starting");

    let llm: Arc<dyn LanguageModelClient> = Arc::new(GeminiClient::new(api_key));
    let pool = connect_lazy(&database_url)?;

    let workflow = Workflow::from_services(
        llm.clone(),
        Arc::new(PgQueryExecutor::new(pool.clone(), llm)),
        Arc::new(PgBudgetDirectory::new(pool)),
        config.clone(),
    );

    let mut context = ConversationContext::new(Conversation::new(user_id), user_name)
        .with_history_depth(config.history_depth);

    match workflow.handle(&message, &mut context).await {
        Ok(outcome) => {
            info!(lane = %outcome.lane, rationale = %outcome.rationale, "Turn complete");
            println!("{}", outcome.final_text);
            for warning in &outcome.warnings {
                println!("\nNote: {}", warning);
            }
            if let Some(data) = &outcome.data {
                println!("\n=== DATA ===\n{}", serde_json::to_string_pretty(data)?);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("I apologize, I couldn't process that right now: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
