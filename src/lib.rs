//! misp-glue - MISP event enrichment
//!
//! Subscribes to a MISP instance's ZMQ feed, runs every attribute of each
//! published event through the applicable misp-modules expansion modules and
//! writes the returned observables back to the event.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event;
pub mod feed;
pub mod modules;
pub mod sink;

pub use error::{GlueError, Result};
