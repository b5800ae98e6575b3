// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Driver core for a programmable traffic generator (see `SPEC_FULL.md`).
//!
//! The crate is organized leaf-first, matching the component table in
//! spec.md §2: [`peer`] and [`pool`] at the bottom, [`timer`], [`server`],
//! and [`transport`] wrapping raw descriptors, [`transfer`] driving a single
//! exchange over a transport, [`multiplexer`] dispatching all of the above,
//! [`graph`] describing the workload, and [`driver`] orchestrating
//! everything per §4.8.

pub mod driver;
pub mod fail;
pub mod forwarding;
pub mod graph;
pub mod multiplexer;
pub mod peer;
pub mod pool;
pub mod server;
pub mod time;
pub mod timer;
pub mod transfer;
pub mod transport;

pub use driver::Driver;
pub use fail::Fail;
pub use graph::{ActionGraph, GraphSpec};
