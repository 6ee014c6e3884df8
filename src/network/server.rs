use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::authority::ConnectionKind;
use crate::protocol::{ClientMessage, ObserverId};

use super::broadcast::FrameTx;

/// Everything a connection task reports to the host loop.
#[derive(Debug)]
pub enum Ingress {
    /// Handshake finished. `tx` feeds the connection's write task.
    Attach {
        observer: ObserverId,
        kind: ConnectionKind,
        tx: FrameTx,
    },
    Detach {
        observer: ObserverId,
    },
    Message {
        observer: ObserverId,
        message: ClientMessage,
    },
}

pub type IngressTx = mpsc::UnboundedSender<Ingress>;
pub type IngressRx = mpsc::UnboundedReceiver<Ingress>;

/// Accept loop. Every WebSocket connection gets a fresh observer id; a
/// connection whose request path equals `board_path` is the shared board
/// display, anything else is a tablet.
///
/// Returns when the host loop has gone away.
pub async fn serve(listener: TcpListener, board_path: String, ingress: IngressTx) {
    let mut next_observer: ObserverId = 1;

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            },
            _ = ingress.closed() => {
                info!("Host loop gone, accept loop stopping");
                return;
            }
        };

        let observer = next_observer;
        next_observer += 1;
        info!("Connection {} from {}", observer, addr);

        let board_path = board_path.clone();
        let ingress = ingress.clone();
        tokio::spawn(async move {
            handle_connection(stream, observer, &board_path, ingress).await;
        });
    }
}

/// Runs one connection until its socket closes.
///
/// 1. **Write task** forwards encoded frames from the broadcaster to the
///    WebSocket sink.
/// 2. **Read loop** decodes binary frames as `ClientMessage` and pushes them
///    into the ingress queue, then reports the detach.
async fn handle_connection(
    stream: TcpStream,
    observer: ObserverId,
    board_path: &str,
    ingress: IngressTx,
) {
    let mut path = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    };
    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for connection {}: {}", observer, e);
            return;
        }
    };

    let kind = if path == board_path {
        ConnectionKind::Board
    } else {
        ConnectionKind::Tablet
    };
    debug!("Connection {} on {:?} is a {:?}", observer, path, kind);

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    if ingress
        .send(Ingress::Attach {
            observer,
            kind,
            tx: frame_tx,
        })
        .is_err()
    {
        return;
    }

    // ── Write task ──────────────────────────────────────────────
    let writer = tokio::spawn(async move {
        while let Some(bytes) = frame_rx.recv().await {
            if let Err(e) = ws_write.send(Message::Binary(bytes.into())).await {
                error!("Failed to send to connection {}: {}", observer, e);
                break;
            }
        }
        let _ = ws_write.close().await;
        debug!("Write task {} shutting down", observer);
    });

    // ── Read loop ───────────────────────────────────────────────
    while let Some(result) = ws_read.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("WebSocket read error on connection {}: {}", observer, e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if !msg.is_binary() {
            continue;
        }

        let data = msg.into_data();
        match rmp_serde::from_slice::<ClientMessage>(&data) {
            Ok(message) => {
                if ingress.send(Ingress::Message { observer, message }).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to decode ClientMessage from {}: {}", observer, e),
        }
    }

    info!("Connection {} closed", observer);
    let _ = ingress.send(Ingress::Detach { observer });
    // The broadcaster drops our frame sender on detach, which ends the writer.
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;

    use super::*;
    use crate::authority::Authority;
    use crate::config::RulesConfig;
    use crate::game::risk::{HexRiskBoard, RiskCatalogue};
    use crate::network::host;
    use crate::network::http_api::StatusSnapshot;
    use crate::protocol::{BoardState, Phase, Role, ServerMessage};

    async fn start_host() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let risk = HexRiskBoard::new(3, 1, RiskCatalogue::default(), Some(3));
        let authority = Authority::new(RulesConfig::default(), Box::new(risk));
        let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = tokio::sync::watch::channel(StatusSnapshot::default());

        tokio::spawn(serve(listener, "/board".to_string(), ingress_tx));
        tokio::spawn(host::run(authority, ingress_rx, state_tx));
        addr
    }

    async fn recv<S>(ws: &mut S) -> ServerMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("read error");
            if msg.is_binary() {
                return rmp_serde::from_slice(&msg.into_data()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn tablet_receives_its_role_on_connect() {
        let addr = start_host().await;
        let (mut ws, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();

        match recv(&mut ws).await {
            ServerMessage::RoleAssigned { role, .. } => assert_eq!(role, Role::Farming),
            other => panic!("expected RoleAssigned, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn board_path_connection_drives_phases() {
        let addr = start_host().await;
        let (_tablet, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
        let (mut board, _) = connect_async(format!("ws://{}/board", addr)).await.unwrap();

        // The board gets a snapshot and no role.
        assert_eq!(
            recv(&mut board).await,
            ServerMessage::BoardStateUpdated(BoardState::default())
        );

        let next = rmp_serde::to_vec_named(&ClientMessage::NextPhase).unwrap();
        board.send(Message::Binary(next.into())).await.unwrap();

        match recv(&mut board).await {
            ServerMessage::BoardStateUpdated(state) => {
                assert_eq!(state.phase, Phase::Draw);
                assert_eq!(state.turn_number, 1);
            }
            other => panic!("expected BoardStateUpdated, got {:?}", other),
        }
    }
}
