use apexlev::application::system::{Application, Settings};
use apexlev::config::Config;
use apexlev::domain::position::PositionDirection;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// Headless operator surface: one line per command on stdin, result on
/// stdout. No HTTP listener — this process only ever initiates outbound
/// calls (exchange, advisor, sentiment feed).
async fn run_command(app: &Arc<Application>, line: &str) {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("start_sentinel") => match app.start_sentinel().await {
            Ok(()) => info!("sentinel started"),
            Err(e) => error!("start_sentinel rejected: {:?}", e),
        },
        Some("start_institutional") => {
            app.start_institutional().await;
            info!("institutional started");
        }
        Some("stop") => {
            app.stop().await;
            info!("stopped to idle");
        }
        Some("status") => {
            let status = app.status().await;
            info!(?status, "status");
        }
        Some("settings") => {
            let settings = app.get_settings().await;
            info!(?settings, "settings");
        }
        Some("trigger") => {
            let Some(symbol) = parts.next() else {
                error!("usage: trigger <symbol>");
                return;
            };
            match app.trigger_analysis(symbol).await {
                Ok(decision) => info!(?decision, "analysis"),
                Err(e) => error!("trigger_analysis failed: {}", e),
            }
        }
        Some("manual") => {
            let (Some(symbol), Some(side)) = (parts.next(), parts.next()) else {
                error!("usage: manual <symbol> <buy|sell>");
                return;
            };
            let direction = match side.to_ascii_lowercase().as_str() {
                "buy" => PositionDirection::Long,
                "sell" => PositionDirection::Short,
                _ => {
                    error!("side must be buy or sell");
                    return;
                }
            };
            match app.place_manual_trade(symbol, direction).await {
                Ok(()) => info!(symbol, "manual trade placed"),
                Err(e) => error!("place_manual_trade failed: {}", e),
            }
        }
        Some("close") => {
            let Some(symbol) = parts.next() else {
                error!("usage: close <symbol>");
                return;
            };
            match app.close_position(symbol, "ManualClose").await {
                Ok(closed) => info!(?closed, "position closed"),
                Err(e) => error!("close_position failed: {}", e),
            }
        }
        Some("close_all") => {
            let closed = app.force_close_all().await;
            info!(count = closed.len(), "force_close_all complete");
        }
        Some("update_settings") => {
            let Some(symbol) = parts.next() else {
                error!("usage: update_settings <symbol> <auto_trading:bool> <risk_tolerance:f64> <leverage:u32>");
                return;
            };
            let auto_trading = parts.next().and_then(|s| s.parse().ok()).unwrap_or(false);
            let risk_tolerance = parts.next().and_then(|s| s.parse().ok()).unwrap_or(50.0);
            let leverage = parts.next().and_then(|s| s.parse().ok()).unwrap_or(10);
            match app
                .update_settings(Settings {
                    auto_trading,
                    risk_tolerance,
                    current_symbol: symbol.to_string(),
                    leverage,
                })
                .await
            {
                Ok(()) => info!("settings updated"),
                Err(e) => error!("update_settings failed: {}", e),
            }
        }
        Some(other) => error!("unrecognized command: {}", other),
        None => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = Config::from_env()?;
    info!(trading_enabled = config.trading_enabled(), symbols = ?config.symbols, "configuration loaded");

    let app = Arc::new(Application::build(config).await?);
    app.start().await?;
    info!("system running, awaiting commands on stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        run_command(&app, line.trim()).await;
    }

    Ok(())
}
