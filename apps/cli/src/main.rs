use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{ControllerEvent, MemoryRemote, RemoteDataService, SyncController};
use graphql_api::{GraphQlEndpoint, GraphQlRemote};
use shared::domain::{Item, ItemId};
use tokio::sync::broadcast::error::RecvError;

mod config;

#[derive(Parser, Debug)]
#[command(name = "listmirror", about = "Mirror a remote item list from the command line")]
struct Args {
    /// Run against an in-process store instead of a GraphQL endpoint.
    #[arg(long)]
    memory: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current item list.
    List,
    /// Create a new item.
    Add { description: String },
    /// Mark an item completed.
    Done { id: String },
    /// Reopen a completed item.
    Reopen { id: String },
    /// Delete an item.
    Rm { id: String },
    /// Keep the mirror running and print every refreshed snapshot.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let remote: Arc<dyn RemoteDataService> = if args.memory {
        MemoryRemote::new()
    } else {
        let settings = config::load_settings();
        let mut endpoint = GraphQlEndpoint::new(settings.endpoint);
        if let Some(api_key) = settings.api_key {
            endpoint = endpoint.with_api_key(api_key);
        }
        if let Some(realtime) = settings.realtime_endpoint {
            endpoint = endpoint.with_realtime_url(realtime);
        }
        GraphQlRemote::new(endpoint)
    };

    let controller = SyncController::new(remote);

    match args.command {
        Command::List => {
            let items = controller.refresh().await?;
            print_items(&items);
        }
        Command::Add { description } => {
            controller.create(&description).await?;
            print_items(&controller.items().await);
        }
        Command::Done { id } => {
            controller.set_completed(&ItemId(id), true).await?;
            print_items(&controller.items().await);
        }
        Command::Reopen { id } => {
            controller.set_completed(&ItemId(id), false).await?;
            print_items(&controller.items().await);
        }
        Command::Rm { id } => {
            controller.delete(&ItemId(id)).await?;
            print_items(&controller.items().await);
        }
        Command::Watch => {
            let mut events = controller.subscribe_events();
            controller.start().await?;
            println!("Watching for remote changes; press Ctrl-C to stop.");
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(ControllerEvent::ItemsRefreshed(items)) => print_items(&items),
                        Ok(ControllerEvent::Error(message)) => eprintln!("sync error: {message}"),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            controller.stop().await;
        }
    }

    Ok(())
}

fn print_items(items: &[Item]) {
    if items.is_empty() {
        println!("(no items)");
        return;
    }
    for item in items {
        let marker = if item.completed { "x" } else { " " };
        println!("[{marker}] {}  {}", item.id, item.description);
    }
}
