//! Client-side session layer for long-running scans run by an external worker.
//!
//! A [`controller::ScanController`] drives one scan domain: it issues commands
//! through an [`ipc::Invoker`], correlates pushed events from an
//! [`ipc::EventBus`] with the current session, and owns the resulting category
//! tree together with its pagination and selection state.

pub mod cleanup;
pub mod controller;
pub mod correlator;
pub mod demo;
pub mod domains;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod model;
pub mod pagination;
pub mod selection;
pub mod settings;
