use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::authority::{Outbound, Target};
use crate::protocol::ObserverId;

/// Channel feeding one connection's write task with encoded frames.
pub type FrameTx = mpsc::UnboundedSender<Vec<u8>>;

/// Routes outbound messages to connection writers.
///
/// Each message is encoded once (msgpack, named fields) and the bytes are
/// cloned per recipient. Sending never waits on the socket.
#[derive(Default)]
pub struct Broadcaster {
    clients: BTreeMap<ObserverId, FrameTx>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, observer: ObserverId, tx: FrameTx) {
        self.clients.insert(observer, tx);
    }

    pub fn detach(&mut self, observer: ObserverId) {
        self.clients.remove(&observer);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn dispatch(&mut self, outbound: &[Outbound]) {
        for message in outbound {
            self.send(message);
        }
    }

    fn send(&mut self, outbound: &Outbound) {
        let bytes = match rmp_serde::to_vec_named(&outbound.message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to serialize ServerMessage: {}", e);
                return;
            }
        };

        let recipients: Vec<ObserverId> = match &outbound.target {
            Target::All => self.clients.keys().copied().collect(),
            Target::One(id) => vec![*id],
        };

        let mut closed = Vec::new();
        for id in recipients {
            match self.clients.get(&id) {
                Some(tx) => {
                    if tx.send(bytes.clone()).is_err() {
                        closed.push(id);
                    }
                }
                None => debug!("No connection for observer {}; message dropped", id),
            }
        }

        for id in closed {
            warn!("Observer {} writer closed, detaching", id);
            self.clients.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BoardState, ServerMessage};

    fn decode(bytes: &[u8]) -> ServerMessage {
        rmp_serde::from_slice(bytes).unwrap()
    }

    fn client(b: &mut Broadcaster, id: ObserverId) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        b.attach(id, tx);
        rx
    }

    #[test]
    fn all_reaches_every_client() {
        let mut b = Broadcaster::new();
        let mut r1 = client(&mut b, 1);
        let mut r2 = client(&mut b, 2);

        let msg = ServerMessage::BoardStateUpdated(BoardState::default());
        b.dispatch(&[Outbound::all(msg.clone())]);

        assert_eq!(decode(&r1.try_recv().unwrap()), msg);
        assert_eq!(decode(&r2.try_recv().unwrap()), msg);
    }

    #[test]
    fn one_only_reaches_its_target() {
        let mut b = Broadcaster::new();
        let mut r1 = client(&mut b, 1);
        let mut r2 = client(&mut b, 2);

        let vote = ServerMessage::VoteRecorded {
            card_id: "c1".to_string(),
            vote_yes: true,
        };
        b.dispatch(&[Outbound::to(2, vote.clone())]);

        assert_eq!(decode(&r2.try_recv().unwrap()), vote);
        assert!(r2.try_recv().is_err());
        assert!(r1.try_recv().is_err());
    }

    #[test]
    fn closed_writer_is_detached() {
        let mut b = Broadcaster::new();
        let r1 = client(&mut b, 1);
        let _r2 = client(&mut b, 2);
        drop(r1);

        b.dispatch(&[Outbound::all(ServerMessage::BoardStateUpdated(
            BoardState::default(),
        ))]);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn unknown_target_is_ignored() {
        let mut b = Broadcaster::new();
        let mut r1 = client(&mut b, 1);
        b.dispatch(&[Outbound::to(
            9,
            ServerMessage::BoardStateUpdated(BoardState::default()),
        )]);
        assert!(r1.try_recv().is_err());
        assert_eq!(b.len(), 1);
    }
}
