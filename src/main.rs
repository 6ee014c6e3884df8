mod authority;
mod config;
mod game;
mod network;
mod protocol;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use authority::Authority;
use config::Config;
use game::risk::{HexRiskBoard, RiskCatalogue};
use network::http_api::{self, StatusSnapshot};
use network::{host, server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let catalogue = match &config.catalogue {
        Some(path) => match RiskCatalogue::load(path) {
            Ok(catalogue) => {
                info!(
                    "Loaded risk catalogue from {} ({} cards, {} disasters)",
                    path.display(),
                    catalogue.cards.len(),
                    catalogue.disasters.len()
                );
                catalogue
            }
            Err(e) => {
                error!("Failed to load risk catalogue: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("No CRISIS_CATALOGUE set, accepted cards will place no risks");
            RiskCatalogue::default()
        }
    };

    let risk_board = HexRiskBoard::new(
        config.board_radius,
        config.risks_per_card,
        catalogue,
        config.risk_seed,
    );
    info!("Risk board has {} cells", risk_board.cell_count());
    let authority = Authority::new(config.rules.clone(), Box::new(risk_board));

    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };
    info!("Crisis board host listening on ws://{}", config.bind_addr);
    info!("Board display connects on ws://{}{}", config.bind_addr, config.board_path);

    let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(StatusSnapshot::of(&authority));

    match TcpListener::bind(config.status_addr).await {
        Ok(status) => {
            tokio::spawn(http_api::start(status, state_rx));
        }
        Err(e) => error!("Failed to bind status API on {}: {}", config.status_addr, e),
    }

    tokio::spawn(server::serve(listener, config.board_path.clone(), ingress_tx));

    tokio::select! {
        _ = host::run(authority, ingress_rx, state_tx) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
}
