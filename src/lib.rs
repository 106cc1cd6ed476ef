//! ONTAP Performance Metric Agent
//!
//! A collection agent for NetApp ONTAP storage systems. The agent
//! periodically queries a controller over its XML management protocol,
//! transforms raw cumulative counters into rate/average/percent metrics,
//! and publishes the results as a time-series matrix for downstream
//! exporters.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐      HTTPS/XML       ┌───────────────────────────┐
//! │   ONTAP     │ ◄─────────────────►  │          Agent            │
//! │ controller  │   management API     │                           │
//! └─────────────┘                      │  ┌────────┐  ┌─────────┐  │
//!                                      │  │ Client │→ │Collector│  │──► Matrix
//!                                      │  └────────┘  └─────────┘  │    (per poll)
//!                                      │              ┌─────────┐  │
//!                                      │              │ Plugins │  │
//!                                      │              └─────────┘  │
//!                                      └───────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`matrix`] - The metrics × instances table exchanged per poll
//! - [`ontap`] - Request/response trees and the management API client
//! - [`collectors`] - The perf counter collector
//! - [`plugins`] - Fan-out transforms (disk shelf sub-objects)
//! - [`config`] - Configuration and collector templates
//! - [`error`] - Error types
//!
//! # Collection model
//!
//! Counters on ONTAP are cumulative. The collector keeps the previous
//! poll's raw values as a baseline and derives per-interval metrics from
//! the difference: a `rate` counter becomes delta per elapsed second, an
//! `average` becomes delta divided by the delta of its base counter (for
//! latencies, only when enough operations happened to make the average
//! meaningful), a `percent` is an average scaled by 100. The first poll
//! after startup only establishes the baseline and emits nothing.

pub mod collectors;
pub mod config;
pub mod error;
pub mod matrix;
pub mod ontap;
pub mod plugins;
