//! # Brain Box
//!
//! A personal knowledge ingestion pipeline with a decision layer.
//!
//! Brain Box accepts content from a single trusted sender — notes, links,
//! documents, images — classifies it, stores the raw bytes durably on the
//! local filesystem, extracts and enriches text via an AI provider, records
//! an auditable routing decision, and conditionally publishes the enriched
//! result to a GitHub-backed knowledge repository.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │ Inbound  │──▶│ Classify  │──▶│ Raw Store │──▶│  SQLite   │
//! │  item    │   │ doc/img/  │   │ (on disk) │   │ metadata  │
//! └──────────┘   │ link/note │   └───────────┘   └────┬─────┘
//!                └───────────┘                        │
//!                      ┌──────────────┬───────────────┤
//!                      ▼              ▼               ▼
//!                ┌──────────┐   ┌──────────┐   ┌──────────┐
//!                │ Extract  │──▶│  Enrich  │──▶│ Decision │
//!                │ pdf/docx │   │ (OpenAI) │   │  layer   │
//!                │ html     │   └──────────┘   └────┬─────┘
//!                └──────────┘                       ▼
//!                                             ┌──────────┐
//!                                             │ Publish  │
//!                                             │ (GitHub) │
//!                                             └──────────┘
//! ```
//!
//! The pipeline degrades rather than aborts: extraction and enrichment
//! failures fall back to deterministic metadata, and a failed publish
//! leaves the content stored locally with a retryable record. Only
//! authorization, the raw write, and the metadata commit are fatal.
//!
//! ## Quick Start
//!
//! ```bash
//! brainbox init                              # create storage tree + database
//! brainbox ingest --text "buy milk"          # store a note
//! brainbox ingest --text "read https://example.com #github"
//! brainbox ingest --file ./paper.pdf --caption "ML survey"
//! brainbox list notes                        # browse by type
//! brainbox search rust                       # keyword search
//! brainbox publish last                      # publish the newest unpublished item
//! brainbox reconcile                         # replay interrupted runs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`classify`] | Content type detection |
//! | [`storage`] | Durable raw file store |
//! | [`extract`] | Text extraction (PDF, DOCX, HTML) |
//! | [`enrich`] | AI enrichment gateway |
//! | [`decision`] | Trigger detection and routing decisions |
//! | [`store`] | SQLite metadata persistence |
//! | [`repo`] | Remote repository client (GitHub contents API) |
//! | [`publish`] | Publish orchestration with retries |
//! | [`pipeline`] | End-to-end run coordination |
//! | [`reconcile`] | Crash recovery |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod classify;
pub mod config;
pub mod db;
pub mod decision;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod publish;
pub mod reconcile;
pub mod repo;
pub mod storage;
pub mod store;
