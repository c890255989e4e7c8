// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use dotenv::dotenv;

use cadence_rs::agents::{
    AgentRegistry, ChatAgent, ReportAgent, SiteSeekAgent, StaticLandStore,
};
use cadence_rs::flow::StepChannel;
use cadence_rs::llm::OpenAiModel;
use cadence_rs::server;

use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the agent API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3300)]
        port: u16,
    },
    /// Run one agent from the command line, printing its envelopes
    Run {
        /// Agent name (chat, report, site-seek)
        #[arg(short, long)]
        agent: String,

        /// Input to the agent
        #[arg(short, long)]
        input: String,
    },
}

fn build_registry() -> Result<AgentRegistry, Box<dyn std::error::Error + Send + Sync>> {
    let model = Arc::new(OpenAiModel::from_env()?);
    let store = Arc::new(StaticLandStore::demo());
    let tables = store.table_names();

    let download_base =
        std::env::var("REPORT_DOWNLOAD_BASE").unwrap_or_else(|_| "http://localhost:3300/reports".to_string());

    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(ChatAgent::new(model.clone())?));
    registry.register(Arc::new(ReportAgent::new(model.clone(), download_base)?));
    registry.register(Arc::new(SiteSeekAgent::new(model, store, tables)?));
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Serve { port } => {
            let registry = Arc::new(build_registry()?);
            log::info!(
                "Serving {} agents",
                registry.list().len()
            );
            server::serve(registry, port).await?;
        }
        Commands::Run { agent, input } => {
            let registry = build_registry()?;
            let Some(agent) = registry.get(&agent) else {
                return Err(format!("Unknown agent: {}", agent).into());
            };

            let (channel, mut rx) = StepChannel::open();
            let printer = tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    match serde_json::to_string(&envelope) {
                        Ok(line) => println!("{}", line),
                        Err(e) => log::error!("could not serialize envelope: {}", e),
                    }
                }
            });

            println!("Running agent: {}", agent.name());
            agent.run(input, channel.clone()).await?;
            channel.close();
            drop(channel);
            let _ = printer.await;
        }
    }

    Ok(())
}
