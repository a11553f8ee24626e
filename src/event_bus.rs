/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the ledger master and protocol
//! threads and fires the handlers registered for them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) accept_ledger_handlers: Vec<HandlerPtr<AcceptLedgerEvent>>,
    pub(crate) valid_ledger_handlers: Vec<HandlerPtr<ValidLedgerEvent>>,
    pub(crate) publish_ledger_handlers: Vec<HandlerPtr<PublishLedgerEvent>>,
    pub(crate) skip_gap_handlers: Vec<HandlerPtr<SkipGapEvent>>,
    pub(crate) invalidate_ledgers_handlers: Vec<HandlerPtr<InvalidateLedgersEvent>>,
    pub(crate) backfill_handlers: Vec<HandlerPtr<BackfillEvent>>,
    pub(crate) consensus_built_handlers: Vec<HandlerPtr<ConsensusBuiltEvent>>,
    pub(crate) acquire_ledger_handlers: Vec<HandlerPtr<AcquireLedgerEvent>>,
    pub(crate) request_fetch_pack_handlers: Vec<HandlerPtr<RequestFetchPackEvent>>,
    pub(crate) receive_fetch_pack_handlers: Vec<HandlerPtr<ReceiveFetchPackEvent>>,
    pub(crate) receive_fetch_pack_request_handlers: Vec<HandlerPtr<ReceiveFetchPackRequestEvent>>,
    pub(crate) send_fetch_pack_handlers: Vec<HandlerPtr<SendFetchPackEvent>>,
    pub(crate) reject_fetch_pack_handlers: Vec<HandlerPtr<RejectFetchPackEvent>>,
    pub(crate) update_remote_fee_handlers: Vec<HandlerPtr<UpdateRemoteFeeEvent>>,
    pub(crate) amendment_blocked_handlers: Vec<HandlerPtr<AmendmentBlockedEvent>>,
}

impl EventHandlers {
    /// Create a set of handlers that, if `log_events` is true, contains the default logger of every
    /// event type.
    pub(crate) fn new(log_events: bool) -> EventHandlers {
        let mut event_handlers = EventHandlers::default();
        if log_events {
            event_handlers.accept_ledger_handlers.push(AcceptLedgerEvent::get_logger());
            event_handlers.valid_ledger_handlers.push(ValidLedgerEvent::get_logger());
            event_handlers.publish_ledger_handlers.push(PublishLedgerEvent::get_logger());
            event_handlers.skip_gap_handlers.push(SkipGapEvent::get_logger());
            event_handlers.invalidate_ledgers_handlers.push(InvalidateLedgersEvent::get_logger());
            event_handlers.backfill_handlers.push(BackfillEvent::get_logger());
            event_handlers.consensus_built_handlers.push(ConsensusBuiltEvent::get_logger());
            event_handlers.acquire_ledger_handlers.push(AcquireLedgerEvent::get_logger());
            event_handlers.request_fetch_pack_handlers.push(RequestFetchPackEvent::get_logger());
            event_handlers.receive_fetch_pack_handlers.push(ReceiveFetchPackEvent::get_logger());
            event_handlers
                .receive_fetch_pack_request_handlers
                .push(ReceiveFetchPackRequestEvent::get_logger());
            event_handlers.send_fetch_pack_handlers.push(SendFetchPackEvent::get_logger());
            event_handlers.reject_fetch_pack_handlers.push(RejectFetchPackEvent::get_logger());
            event_handlers.update_remote_fee_handlers.push(UpdateRemoteFeeEvent::get_logger());
            event_handlers.amendment_blocked_handlers.push(AmendmentBlockedEvent::get_logger());
        }
        event_handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.accept_ledger_handlers.is_empty()
            && self.valid_ledger_handlers.is_empty()
            && self.publish_ledger_handlers.is_empty()
            && self.skip_gap_handlers.is_empty()
            && self.invalidate_ledgers_handlers.is_empty()
            && self.backfill_handlers.is_empty()
            && self.consensus_built_handlers.is_empty()
            && self.acquire_ledger_handlers.is_empty()
            && self.request_fetch_pack_handlers.is_empty()
            && self.receive_fetch_pack_handlers.is_empty()
            && self.receive_fetch_pack_request_handlers.is_empty()
            && self.send_fetch_pack_handlers.is_empty()
            && self.reject_fetch_pack_handlers.is_empty()
            && self.update_remote_fee_handlers.is_empty()
            && self.amendment_blocked_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::AcceptLedger(accept_ledger_event) => self
                .accept_ledger_handlers
                .iter()
                .for_each(|handler| handler(&accept_ledger_event)),

            Event::ValidLedger(valid_ledger_event) => self
                .valid_ledger_handlers
                .iter()
                .for_each(|handler| handler(&valid_ledger_event)),

            Event::PublishLedger(publish_ledger_event) => self
                .publish_ledger_handlers
                .iter()
                .for_each(|handler| handler(&publish_ledger_event)),

            Event::SkipGap(skip_gap_event) => self
                .skip_gap_handlers
                .iter()
                .for_each(|handler| handler(&skip_gap_event)),

            Event::InvalidateLedgers(invalidate_ledgers_event) => self
                .invalidate_ledgers_handlers
                .iter()
                .for_each(|handler| handler(&invalidate_ledgers_event)),

            Event::Backfill(backfill_event) => self
                .backfill_handlers
                .iter()
                .for_each(|handler| handler(&backfill_event)),

            Event::ConsensusBuilt(consensus_built_event) => self
                .consensus_built_handlers
                .iter()
                .for_each(|handler| handler(&consensus_built_event)),

            Event::AcquireLedger(acquire_ledger_event) => self
                .acquire_ledger_handlers
                .iter()
                .for_each(|handler| handler(&acquire_ledger_event)),

            Event::RequestFetchPack(request_fetch_pack_event) => self
                .request_fetch_pack_handlers
                .iter()
                .for_each(|handler| handler(&request_fetch_pack_event)),

            Event::ReceiveFetchPack(receive_fetch_pack_event) => self
                .receive_fetch_pack_handlers
                .iter()
                .for_each(|handler| handler(&receive_fetch_pack_event)),

            Event::ReceiveFetchPackRequest(receive_request_event) => self
                .receive_fetch_pack_request_handlers
                .iter()
                .for_each(|handler| handler(&receive_request_event)),

            Event::SendFetchPack(send_fetch_pack_event) => self
                .send_fetch_pack_handlers
                .iter()
                .for_each(|handler| handler(&send_fetch_pack_event)),

            Event::RejectFetchPack(reject_fetch_pack_event) => self
                .reject_fetch_pack_handlers
                .iter()
                .for_each(|handler| handler(&reject_fetch_pack_event)),

            Event::UpdateRemoteFee(update_remote_fee_event) => self
                .update_remote_fee_handlers
                .iter()
                .for_each(|handler| handler(&update_remote_fee_event)),

            Event::AmendmentBlocked(amendment_blocked_event) => self
                .amendment_blocked_handlers
                .iter()
                .for_each(|handler| handler(&amendment_blocked_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => return,
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher has been dropped.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
