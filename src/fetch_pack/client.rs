/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The requesting side of the fetch pack protocol.
//!
//! ## Peer selection
//!
//! Fetch packs are requested from a single peer. Candidates are the peers that advertise both the
//! missing ledger and the ledger after it. Among them, the peer with the highest [score](peer_score)
//! is chosen. Scores mix a random component with a latency penalty, so that low-latency peers are
//! preferred but requests are still spread between similar peers.
//!
//! ## Accepting replies
//!
//! Only a reply to the last request sent is accepted: it must come from the peer that was asked, and
//! name the same `have` ledger and sequence. Accepting a reply consumes the request, so a second reply
//! to it is dropped. A reply carrying more objects than a correct server ever sends is rejected and its
//! sender charged.

use std::fmt::{self, Display, Formatter};
use std::sync::{mpsc::Sender, Mutex};
use std::time::SystemTime;

use ed25519_dalek::VerifyingKey;
use rand::Rng;

use crate::{
    events::{Event, RequestFetchPackEvent},
    networking::{
        network::{Charge, Network, PeerSummary},
        sending::SenderHandle,
    },
    types::data_types::{CryptoHash, LedgerSeq},
};

use super::messages::{FetchPackReply, FetchPackRequest};

/// Reasons a received fetch pack is dropped without being stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchPackReplyError {
    /// The reply does not answer the last request this node sent.
    Unsolicited,
    /// The reply holds more objects than a fetch pack may.
    TooManyObjects { objects: usize },
}

impl FetchPackReplyError {
    /// The charge levied on the sender, if any.
    pub fn charge(&self) -> Option<Charge> {
        match self {
            FetchPackReplyError::Unsolicited => None,
            FetchPackReplyError::TooManyObjects { .. } => Some(Charge::InvalidRequest),
        }
    }
}

impl Display for FetchPackReplyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FetchPackReplyError::Unsolicited => write!(f, "unsolicited reply"),
            FetchPackReplyError::TooManyObjects { objects } => {
                write!(f, "reply holds {} objects", objects)
            }
        }
    }
}

/// The request a reply is expected for.
#[derive(Clone, Copy, PartialEq, Eq)]
struct OutstandingRequest {
    peer: VerifyingKey,
    have: CryptoHash,
    seq: LedgerSeq,
}

/// Score a peer for serving a request: a random value below 10000, plus 10000 if the peer has the
/// requested item, minus 30 per millisecond of latency (or 8000 if its latency is unknown).
pub fn peer_score<R: Rng>(peer: &PeerSummary, has_item: bool, rng: &mut R) -> i64 {
    let mut score: i64 = rng.gen_range(0, 10000);
    if has_item {
        score += 10000;
    }
    match peer.latency {
        Some(latency) => score -= latency.as_millis() as i64 * 30,
        None => score -= 8000,
    }
    score
}

/// The best peer to ask for the fetch pack that covers `missing_seq`, if any peer advertises it.
pub fn select_peer(peers: &[PeerSummary], missing_seq: LedgerSeq) -> Option<VerifyingKey> {
    let mut rng = rand::thread_rng();
    peers
        .iter()
        .filter(|peer| peer.has_range(missing_seq, missing_seq + 1))
        .map(|peer| (peer_score(peer, true, &mut rng), peer.peer))
        .max_by_key(|(score, _)| *score)
        .map(|(_, peer)| peer)
}

pub(crate) struct FetchPackClient<N: Network> {
    sender: Mutex<SenderHandle<N>>,
    outstanding: Mutex<Option<OutstandingRequest>>,
}

impl<N: Network> FetchPackClient<N> {
    pub(crate) fn new(network: N) -> Self {
        Self {
            sender: Mutex::new(SenderHandle::new(network)),
            outstanding: Mutex::new(None),
        }
    }

    /// Ask the best available peer for the ancestors of `have`, the ledger after `missing_seq`.
    /// Returns the peer asked, or `None` if no peer advertises the range.
    pub(crate) fn request(
        &self,
        have: CryptoHash,
        missing_seq: LedgerSeq,
        event_publisher: &Option<Sender<Event>>,
    ) -> Option<VerifyingKey> {
        let Ok(mut sender) = self.sender.lock() else {
            return None;
        };

        let peer = select_peer(&sender.active_peers(), missing_seq)?;
        // The reply may arrive before `send` returns.
        if let Ok(mut outstanding) = self.outstanding.lock() {
            *outstanding = Some(OutstandingRequest {
                peer,
                have,
                seq: missing_seq,
            });
        }
        sender.send(
            peer,
            FetchPackRequest {
                have,
                seq: Some(missing_seq),
            },
        );
        drop(sender);

        Event::RequestFetchPack(RequestFetchPackEvent {
            timestamp: SystemTime::now(),
            peer,
            have,
            missing_seq,
        })
        .publish(event_publisher);

        Some(peer)
    }

    /// Check that `reply`, received from `origin`, answers the outstanding request and is no larger than
    /// `max_objects`. An accepted reply consumes the outstanding request.
    pub(crate) fn accept_reply(
        &self,
        origin: VerifyingKey,
        reply: &FetchPackReply,
        max_objects: usize,
    ) -> Result<(), FetchPackReplyError> {
        if reply.objects.len() > max_objects {
            return Err(FetchPackReplyError::TooManyObjects {
                objects: reply.objects.len(),
            });
        }

        let mut outstanding = self
            .outstanding
            .lock()
            .map_err(|_| FetchPackReplyError::Unsolicited)?;
        let answers = outstanding.as_ref().map_or(false, |request| {
            request.peer == origin && request.have == reply.have && Some(request.seq) == reply.seq
        });
        if !answers {
            return Err(FetchPackReplyError::Unsolicited);
        }
        *outstanding = None;
        Ok(())
    }
}
