//! Versioned storage schema
//!
//! Defines the layout of the durable action queue blob. Every write carries a
//! version tag; reads migrate the unversioned array layout and reject
//! anything else.

mod stored_queue;

pub use stored_queue::*;
