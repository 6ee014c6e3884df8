use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::authority::Authority;
use crate::protocol::{BoardState, RiskMarker};

/// What the host loop publishes after every action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub board: BoardState,
    pub risk_markers: Vec<RiskMarker>,
}

impl StatusSnapshot {
    pub fn of(authority: &Authority) -> Self {
        Self {
            board: authority.board(),
            risk_markers: authority.risk_markers(),
        }
    }
}

/// Lightweight HTTP status endpoint, separate from the WebSocket server.
///
/// `GET /state` returns the latest `BoardState` and `GET /board` the occupied
/// risk cells, both as JSON. Anything else gets a 404.
pub async fn start(listener: TcpListener, state: watch::Receiver<StatusSnapshot>) {
    if let Ok(addr) = listener.local_addr() {
        info!("Status API listening on http://{}", addr);
    }

    loop {
        let (mut stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Status API accept error: {}", e);
                continue;
            }
        };

        let snapshot = state.borrow().clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let n = match stream.read(&mut buf).await {
                Ok(n) => n,
                Err(_) => return,
            };
            let request = String::from_utf8_lossy(&buf[..n]);
            let response = respond(&request, &snapshot);
            let _ = stream.write_all(response.as_bytes()).await;
        });
    }
}

fn respond(request: &str, snapshot: &StatusSnapshot) -> String {
    // CORS preflight
    if request.starts_with("OPTIONS") {
        return "HTTP/1.1 204 No Content\r\n\
            Access-Control-Allow-Origin: *\r\n\
            Access-Control-Allow-Methods: GET, OPTIONS\r\n\
            Access-Control-Allow-Headers: Content-Type\r\n\
            \r\n"
            .to_string();
    }

    let target = request.split_whitespace().nth(1).unwrap_or("");
    let json = match (request.starts_with("GET "), target) {
        (true, "/state") => Some(serde_json::to_string(&snapshot.board)),
        (true, "/board") => Some(serde_json::to_string(&snapshot.risk_markers)),
        _ => None,
    };
    let (status, body) = match json {
        Some(Ok(json)) => ("200 OK", json),
        Some(Err(e)) => {
            error!("Failed to serialize status: {}", e);
            ("500 Internal Server Error", "{\"error\":\"serialization\"}".to_string())
        }
        None => ("404 Not Found", "{\"error\":\"not found\"}".to_string()),
    };

    format!(
        "HTTP/1.1 {}\r\n\
        Content-Type: application/json\r\n\
        Access-Control-Allow-Origin: *\r\n\
        Content-Length: {}\r\n\
        Connection: close\r\n\
        \r\n\
        {}",
        status,
        body.len(),
        body,
    )
}
