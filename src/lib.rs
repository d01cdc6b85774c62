//! Document chat backend: upload documents, keep them consistent across the
//! raw store, chunk store, vector index, and processed manifest, and answer
//! questions about them with retrieval-augmented generation.
//!
//! The crate is organized around a small number of seams:
//!
//! - [`storage`] owns the three file-backed stores (raw bytes, chunks, and
//!   the processed manifest).
//! - [`ingest`] turns raw documents into persisted chunks.
//! - [`index`] synchronizes chunks into Qdrant and retrieves them.
//! - [`lifecycle`] is the only component that mutates more than one store per
//!   operation.
//! - [`answer`] and [`chat`] produce grounded answers inside persisted
//!   conversation sessions.
//! - [`api`] exposes everything over HTTP.

#![deny(missing_docs)]

pub mod answer;
pub mod api;
pub mod app;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod lifecycle;
pub mod logging;
pub mod storage;
