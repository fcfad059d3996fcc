mod aggregator;
mod config;
mod db;
mod models;
mod tasks;
mod voting;

use aggregator::{Aggregator, DashboardState};
use config::Config;
use db::Database;
use log::{error, info, warn};
use std::sync::Arc;
use tasks::live_results::LiveResults;

fn print_state(state: &DashboardState, json: bool) {
    if let Some(err) = &state.error {
        warn!("Showing last known results: {}", err);
    }
    let Some(results) = &state.results else {
        return;
    };

    if json {
        match serde_json::to_string_pretty(results.as_ref()) {
            Ok(body) => println!("{}", body),
            Err(e) => error!("Failed to serialize results: {}", e),
        }
    } else {
        println!("{}\n", voting::summary::render(results));
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let database = match Database::new(
        &config.database_url,
        config.max_connections,
        &config.notify_channel,
    )
    .await
    {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    if config.init_schema {
        if let Err(e) = database.init_schema().await {
            error!("Failed to initialize schema: {}", e);
            return;
        }
    }

    let aggregator = Arc::new(Aggregator::new(Arc::new(database), config.poll_id));
    let mut live = LiveResults::start(Arc::clone(&aggregator), config.refresh);
    let mut state = live.state();

    loop {
        tokio::select! {
            biased;
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                print_state(&snapshot, config.json_output);
            }
            _ = live.finished() => {
                match aggregator.current_results() {
                    Some(results) => info!(
                        "Live results ended with {} votes counted for '{}'",
                        results.total_votes, results.poll.title
                    ),
                    None => info!("Live results ended"),
                }
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    live.stop();
}
