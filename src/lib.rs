//! A leaderless, asynchronous Byzantine-fault-tolerant consensus core over
//! a DAG of signed events (a hashgraph): virtual voting decides witness
//! fame without any additional network messages, and a deterministic total
//! order over committed events falls out of round-received and a strict
//! tie-break comparator.
//!
//! Gossip, signature verification, transport, and the application state
//! machine that consumes the committed order are all out of scope; see
//! [`Hashgraph`] for the external interface this crate owns.
#![deny(missing_docs)]

pub mod config;
pub mod election;
pub mod error;
pub mod event;
pub mod graph;
pub mod hash;
pub mod member;
pub mod ordering;
pub mod round;
pub mod snapshot;
pub mod store;
pub mod voting;

pub use config::Config;
pub use error::{Diagnostic, Error, InvalidEventKind};
pub use event::{Event, EventIndex, NewEvent};
pub use graph::{Hashgraph, WitnessHashes};
pub use hash::{Hash, Signature};
pub use member::MemberTable;
