pub(crate) mod chain;

pub(crate) mod collaborators;

pub(crate) mod harness;

pub(crate) mod logging;

pub(crate) mod network;
