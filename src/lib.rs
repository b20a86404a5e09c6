//! Page view counting.
//!
//! Every observed visit to a page adds exactly one to that page's stored
//! count, also when many visits to the same page race each other from
//! independent processes. Correctness rests on the storage backend's atomic
//! primitives, see [`store`], and on the create-or-retry flow in [`service`].
//!
//! ```no_run
//! # async fn demo() -> visit_counter::error::Result<()> {
//! use visit_counter::{memory::MemoryCounterStore, service::CounterService};
//!
//! let counter = CounterService::new(MemoryCounterStore::new());
//! assert_eq!(counter.record_visit("/home").await?, 1);
//! assert_eq!(counter.get_count("/home").await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod key;
pub mod memory;
pub mod redis;
pub mod service;
pub mod store;
