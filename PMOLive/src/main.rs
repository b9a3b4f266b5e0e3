mod logs;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use pmoconfig::{Config, get_config};
use pmolive::status::{action_label, status_label};
use pmolive::{PlaybackController, PlaybackState, StatusMessage};
use tokio::sync::mpsc;
use tracing::{info, warn};

const HELP: &str = "Commands: play | stop | toggle | status | level <LEVEL> | help | quit";

#[tokio::main]
async fn main() -> Result<()> {
    // ========== PHASE 1 : Configuration ==========
    let config = match std::env::args().nth(1) {
        Some(dir) => Arc::new(Config::load_config(&dir)?),
        None => get_config(),
    };
    let log_control = logs::init_logging(&config);
    info!(config_dir = %config.directory().display(), "Configuration loaded");

    info!("📻 Starting PMOLive...");
    let controller = PlaybackController::from_config(&config)?;
    info!(
        channel = %controller.player().settings().channel_url,
        "✅ Controller ready"
    );

    // ========== PHASE 2 : Affichage des états ==========
    let mut states = controller.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(state) = states.recv().await {
            print_state(state);
        }
    });

    // La lecture de stdin bloque : elle vit dans son propre thread
    let (tx, mut commands) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    // ========== PHASE 3 : Boucle de commandes ==========
    println!("{HELP}");
    print_state(controller.state());

    loop {
        tokio::select! {
            line = commands.recv() => {
                let Some(line) = line else { break };
                if !handle_command(line.trim(), &controller, &config, &log_control) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
        }
    }

    controller.destroy();
    let _ = printer.await;
    info!("✅ PMOLive stopped");
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_command(
    line: &str,
    controller: &PlaybackController,
    config: &Config,
    log_control: &logs::LogControl,
) -> bool {
    let mut words = line.split_whitespace();
    match words.next() {
        None => {}
        Some("play") => controller.play(),
        Some("stop") => controller.stop(),
        Some("toggle") => controller.toggle(),
        Some("status") => match serde_json::to_string_pretty(&controller.status()) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("Cannot serialize status: {e}"),
        },
        Some("level") => set_level(words.next(), config, log_control),
        Some("help") => println!("{HELP}"),
        Some("quit") | Some("exit") => return false,
        Some(other) => println!("Unknown command '{other}'. {HELP}"),
    }
    true
}

fn set_level(level: Option<&str>, config: &Config, log_control: &logs::LogControl) {
    let Some(level) = level.and_then(logs::string_to_level) else {
        println!("Usage: level ERROR|WARN|INFO|DEBUG|TRACE");
        return;
    };

    if let Err(e) = log_control.set_max_level(level) {
        warn!("Failed to reload log level filter: {e}");
        return;
    }
    if let Err(e) = config.set_log_min_level(&level.to_string()) {
        warn!("Failed to persist log level: {e}");
    }
    info!("Log level changed to: {level}");
}

fn print_state(state: PlaybackState) {
    let message = StatusMessage::for_state(state);
    println!(
        "{}  {}  [{}]",
        status_label(state),
        message.text,
        action_label(state)
    );
}
