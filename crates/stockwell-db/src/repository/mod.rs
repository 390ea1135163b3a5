//! # Repository Module
//!
//! Database repository implementations.
//!
//! ## Two Call Styles
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Pool methods (&self)              Connection functions (conn, ..)     │
//! │  ─────────────────────             ───────────────────────────────     │
//! │  db.sales().get(id)                SaleRepository::lock_in(&mut tx, id)│
//! │  db.ledger().receive(..)           StockLedger::append_in(&mut tx, ..) │
//! │                                                                         │
//! │  Reads and self-contained          Steps of an orchestrator           │
//! │  writes, each on its own           transaction; all run on the one    │
//! │  pooled connection                 connection holding the sale claim  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Product catalog
//! - [`BatchRepository`](batch::BatchRepository) - Batches and derived on-hand
//! - [`StockLedger`](ledger::StockLedger) - Append-only movements, audit
//! - [`SaleRepository`](sale::SaleRepository) - Sales, lines, the sale claim
//! - [`RefundRepository`](refund::RefundRepository) - Refunds and refund lines
//! - [`OutboxRepository`](outbox::OutboxRepository) - Event outbox

pub mod batch;
pub mod ledger;
pub mod outbox;
pub mod product;
pub mod refund;
pub mod sale;
