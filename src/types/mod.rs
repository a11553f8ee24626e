/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types used throughout the crate: plain byte-holding [data types](data_types), the [ledger], and
//! [validations](validation).

pub mod crypto_primitives;

pub mod data_types;

pub mod ledger;

pub mod validation;
