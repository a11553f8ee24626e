use std::{
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use ledger_keeper::{
    networking::{
        messages::Message,
        network::{Charge, Network, PeerSummary},
    },
    types::data_types::LedgerSeq,
};
use rand_core::OsRng;

/// A mock network stub that records what is sent through it, and delivers messages pushed into its
/// inbox through [`NetworkStub::deliver`].
#[derive(Clone)]
pub(crate) struct NetworkStub {
    peers: Arc<Mutex<Vec<PeerSummary>>>,
    sent: Arc<Mutex<Vec<(VerifyingKey, Message)>>>,
    charges: Arc<Mutex<Vec<(VerifyingKey, Charge)>>>,
    to_inbox: Sender<(VerifyingKey, Message)>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, Message)>>>,
}

impl NetworkStub {
    pub(crate) fn new() -> NetworkStub {
        let (to_inbox, inbox) = mpsc::channel();
        NetworkStub {
            peers: Arc::new(Mutex::new(Vec::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            charges: Arc::new(Mutex::new(Vec::new())),
            to_inbox,
            inbox: Arc::new(Mutex::new(inbox)),
        }
    }

    /// Connect a new peer advertising `ledger_range`, and return its key.
    pub(crate) fn add_peer(
        &self,
        ledger_range: Option<(u32, u32)>,
        latency: Option<Duration>,
    ) -> VerifyingKey {
        let peer = SigningKey::generate(&mut OsRng).verifying_key();
        self.peers.lock().unwrap().push(PeerSummary {
            peer,
            ledger_range: ledger_range.map(|(low, high)| (LedgerSeq::new(low), LedgerSeq::new(high))),
            latency,
        });
        peer
    }

    pub(crate) fn deliver(&self, origin: VerifyingKey, message: Message) {
        self.to_inbox.send((origin, message)).unwrap();
    }

    pub(crate) fn sent(&self) -> Vec<(VerifyingKey, Message)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn charges(&self) -> Vec<(VerifyingKey, Charge)> {
        self.charges.lock().unwrap().clone()
    }

    /// Wait up to `timeout` for at least `count` messages to have been sent.
    pub(crate) fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<(VerifyingKey, Message)> {
        let deadline = Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || Instant::now() > deadline {
                return sent;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Network for NetworkStub {
    fn active_peers(&self) -> Vec<PeerSummary> {
        self.peers.lock().unwrap().clone()
    }

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        self.sent.lock().unwrap().push((peer, message));
    }

    fn charge(&mut self, peer: VerifyingKey, charge: Charge) {
        self.charges.lock().unwrap().push((peer, charge));
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}
