#![doc = "apel-publisher-core: core logic library for apel-publisher."]

//! This crate holds the accounting pipeline: watermark tracking, record normalisation,
//! aggregation into APEL summary and sync rows, message formatting, and the publish
//! cycle that drives them. Transport concerns (HTTP, TLS, S/MIME) live behind the
//! traits in [`contract`] and are implemented by the binary crate.
//!
//! # Usage
//! Build a [`publish::Publisher`] from a [`config::PublisherConfig`] and the three
//! collaborators, then call [`publish::Publisher::serve`] or
//! [`publish::Publisher::republish`].

pub mod aggregate;
pub mod config;
pub mod contract;
pub mod error;
pub mod message;
pub mod normalise;
pub mod publish;
pub mod taxonomy;
pub mod watermark;
