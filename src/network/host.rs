use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::authority::{Action, Authority};
use crate::protocol::{ClientMessage, ObserverId};

use super::broadcast::Broadcaster;
use super::http_api::StatusSnapshot;
use super::server::{Ingress, IngressRx};

/// The single writer. Owns the `Authority` and applies ingress events and
/// deadline expiries to it one at a time, in arrival order.
///
/// Publishes a `StatusSnapshot` after every action on `state`. Returns once
/// every ingress sender is gone.
pub async fn run(mut authority: Authority, mut ingress: IngressRx, state: watch::Sender<StatusSnapshot>) {
    let mut broadcaster = Broadcaster::new();
    // (generation, fire time) of the deadline the loop is waiting on.
    let mut armed: Option<(u64, Instant)> = None;

    loop {
        let fire_at = armed.map(|(_, at)| at);

        let action = tokio::select! {
            event = ingress.recv() => match event {
                Some(Ingress::Attach { observer, kind, tx }) => {
                    broadcaster.attach(observer, tx);
                    Action::Connect { observer, kind }
                }
                Some(Ingress::Detach { observer }) => {
                    broadcaster.detach(observer);
                    Action::Disconnect { observer }
                }
                Some(Ingress::Message { observer, message }) => to_action(observer, message),
                None => {
                    info!("Ingress closed, host loop stopping");
                    return;
                }
            },
            _ = wait_for(fire_at) => {
                let Some((generation, _)) = armed.take() else {
                    continue;
                };
                info!("Deadline {} expired", generation);
                Action::DeadlineExpired { generation }
            }
        };

        let outbound = authority.apply(action);
        broadcaster.dispatch(&outbound);

        let snapshot = StatusSnapshot::of(&authority);
        state.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });

        armed = match authority.deadline() {
            Some(deadline) => match armed {
                Some((generation, at)) if generation == deadline.generation => Some((generation, at)),
                _ => {
                    debug!(
                        "Arming deadline {} for {:?} ({:?})",
                        deadline.generation, deadline.phase, deadline.after
                    );
                    Some((deadline.generation, Instant::now() + deadline.after))
                }
            },
            None => None,
        };
    }
}

fn to_action(observer: ObserverId, message: ClientMessage) -> Action {
    match message {
        ClientMessage::PlayCard { card_id } => Action::PlayCard { observer, card_id },
        ClientMessage::Vote { card_id, vote_yes } => Action::Vote {
            observer,
            card_id,
            vote_yes,
        },
        ClientMessage::NextPhase => Action::NextPhase { requester: observer },
    }
}

async fn wait_for(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
