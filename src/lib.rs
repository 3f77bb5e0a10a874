//! # shotsync
//!
//! Screenshot reconciliation and classification engine for the competitor
//! feature matrix.
//!
//! Three independently mutable stores describe which screenshot documents
//! which competitor feature: a filesystem tree of image files, the
//! relational feature matrix, and two generations of screenshot tables
//! (plus a remote deployment of the same data behind an HTTP API).
//! shotsync keeps them consistent: it classifies screenshots from path
//! text, reconciles the stores idempotently, repairs referential drift,
//! and mirrors the result to the remote with retries and a resumable
//! checkpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌───────────────┐
//! │ Filesystem │──▶│ Classifier │──▶│    SQLite     │
//! │   scan     │   │ + Resolver │   │ matrix+shots  │
//! └────────────┘   └────────────┘   └──────┬────────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                ┌──────────┐        ┌──────────┐
//!                │ Validate │        │   Push   │
//!                │  report  │        │ (remote) │
//!                └──────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, alias table, feature taxonomy |
//! | [`models`] | Core data types |
//! | [`scan`] | Filesystem tree scanner |
//! | [`classify`] | Path → feature classifier |
//! | [`resolve`] | Canonical entity resolution and duplicate merge |
//! | [`matrix`] | Competitor ↔ feature matrix store |
//! | [`screenshots`] | Unified screenshot store (both representations) |
//! | [`reconcile`] | Scan → classify → upsert → validate pipeline |
//! | [`validate`] | Referential integrity checks |
//! | [`remote`] | HTTP client for the remote deployment |
//! | [`push`] | Resumable remote sync |
//! | [`checkpoint`] | Durable push progress file |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod db;
pub mod import;
pub mod matrix;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod push;
pub mod reclassify;
pub mod reconcile;
pub mod remote;
pub mod resolve;
pub mod scan;
pub mod screenshots;
pub mod seed;
pub mod stats;
pub mod status;
pub mod validate;
