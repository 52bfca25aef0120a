//! Gossip tasks. `receive` turns inbound datagrams into store transitions;
//! `broadcast` periodically pushes the whole store to every peer.

pub mod broadcast;
pub mod receive;
