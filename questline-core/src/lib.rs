//! Questline core library: quest blueprint graphs and per-user progress tracking.
//!
//! The main entry point is [`tracker::QuestTracker`], which runs every
//! blueprint, graph and assignment operation as one transaction over a
//! [`store::QuestStore`].

pub mod access;
pub mod config;
pub mod error;
pub mod graph;
pub mod store;
pub mod tracker;
pub mod types;
pub mod value;
