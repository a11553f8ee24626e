/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumerations around every message variant used in ledger_keeper.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::fetch_pack::messages::{FetchPackMessage, FetchPackReply, FetchPackRequest};

/// All message variants used in ledger_keeper.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`FetchPackMessage`].
    FetchPackMessage(FetchPackMessage),
}

impl From<FetchPackRequest> for Message {
    fn from(value: FetchPackRequest) -> Self {
        Message::FetchPackMessage(FetchPackMessage::Request(value))
    }
}

impl From<FetchPackReply> for Message {
    fn from(value: FetchPackReply) -> Self {
        Message::FetchPackMessage(FetchPackMessage::Reply(value))
    }
}
