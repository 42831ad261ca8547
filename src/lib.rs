//! # Site Assist
//!
//! Backend for an IT services website: a chat assistant that greets
//! visitors with a simulated human hand-off, routes job seekers to the
//! right application form, and answers general questions from the site's
//! own content; plus contact, training and job-application forms that are
//! stored and forwarded by email.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Ingest  │──▶│ Chunk+Embed │──▶│    SQLite    │
//! │ files/URL│   └─────────────┘   │ snippets,    │
//! └──────────┘                     │ inquiries,   │
//!                                  │ jobs         │
//!                                  └──────┬───────┘
//!                      ┌──────────────────┤
//!                      ▼                  ▼
//!                 ┌──────────┐      ┌──────────┐
//!                 │   CLI    │      │   HTTP   │
//!                 │  (chat)  │      │  (axum)  │
//!                 └──────────┘      └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`intent`] | Rule-based intent classification |
//! | [`handoff`] | Simulated human-agent hand-off |
//! | [`conversation`] | Chat sessions and the session store |
//! | [`rag`] | Reply generation seam and the in-process pipeline |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`retrieval`] | Snippet similarity matching |
//! | [`completion`] | Chat completion calls |
//! | [`chunk`] | Text chunking |
//! | [`ingest`] | Scrape and embed site content |
//! | [`forms`] | Form validation, honeypot, rate limiting |
//! | [`submit`] | Submission pipeline (persist, then notify) |
//! | [`mailer`] | Notification email delivery |
//! | [`storage`] | Resume file storage |
//! | [`jobs`] | Job postings |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod forms;
pub mod handoff;
pub mod ingest;
pub mod intent;
pub mod jobs;
pub mod mailer;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod retrieval;
pub mod server;
pub mod storage;
pub mod submit;
