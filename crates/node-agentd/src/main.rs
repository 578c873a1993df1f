// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use clap::Parser;
use std::{path::PathBuf, process};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use node_agent::{
    agent::AgentRegistry,
    config::{AgentSettings, TasksDefinition},
    http::serve_reports,
    plugins::BuiltinPlugins,
};

#[derive(Parser, Debug)]
#[command(name = "node-agentd")]
#[command(about = "Node telemetry agent with scheduled collection and retrying publishers")]
struct Args {
    /// Agent settings file (JSON). NODE_AGENT_* variables override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
pub async fn main() {
    let args = Args::parse();
    let settings = match AgentSettings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid agent settings: {e}");
            process::exit(1);
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", settings.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let definition = match TasksDefinition::from_file(&settings.task_config_path) {
        Ok(definition) => definition,
        Err(e) => {
            error!("Unable to load task configuration: {e}");
            process::exit(1);
        }
    };

    let registry = AgentRegistry::build(&definition, &settings, &BuiltinPlugins).await;
    let reports = registry.reports();
    let cancel = CancellationToken::new();
    let agent = registry.start(cancel.clone());

    let api_port = settings.api_port;
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = serve_reports(api_port, reports, server_cancel).await {
            error!("Report endpoint stopped: {e}");
        }
    });

    info!("Node agent started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }

    info!("Shutting down node agent");
    cancel.cancel();
    agent.join().await;
    if let Err(e) = server.await {
        error!("Report endpoint task failed: {e}");
    }
}
