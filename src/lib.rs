pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;

use agent::ChatAgent;
use cli::Args;
use config::persona::{ load_persona, Persona };
use history::{ create_state_store, ConversationStore };
use llm::chat::new_transport;
use log::info;
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Transport: {}", args.transport);
    info!("Base URL: {}", args.base_url);
    info!("Chat Route: {}", args.chat_route);
    info!("Tags Route: {}", args.tags_route);
    if let Some(relay_url) = &args.relay_url {
        info!("Relay URL: {}", relay_url);
        info!("Relay Action: {}", args.relay_action);
    }
    info!("Auth Token: {}", if args.auth_token.is_some() { "set" } else { "not set" });
    info!("Model: {}", args.model.as_deref().unwrap_or("saved or default"));
    info!("State Path: {}", args.state_path.as_deref().unwrap_or("memory"));
    info!("Persona Path: {}", args.persona_path.as_deref().unwrap_or("built-in"));
    info!("-------------------------");

    let transport = new_transport(&args.transport_config())?;
    let persona = match &args.persona_path {
        Some(path) => load_persona(path)?,
        None => Persona::default(),
    };
    let store = ConversationStore::with_persistence(create_state_store(args.state_path.as_deref()));

    let mut agent = ChatAgent::initialize(transport, store, &persona, args.model.clone()).await;
    let models = agent.refresh_models().await;
    info!("{} model(s) available", models.len());

    cli::console::run_console(agent).await
}
