//! Collectors.
//!
//! A collector owns one ONTAP object's state (metric schema, instance
//! set, previous-poll baseline) and is driven serially by the poller:
//! `poll_counter` on a slow cadence, `poll_instance` on a medium one,
//! `poll_data` on every collection interval. Collectors perform no
//! internal concurrency; running several objects in parallel means
//! running several collectors, each with its own client and caches.

pub mod zapiperf;

pub use zapiperf::ZapiPerf;
