//! Coalescing scheduler for device-keys queries.
//!
//! Looking up the cryptographic device keys of a set of users is expensive
//! (in a real deployment it is a round trip to a `/keys/query` endpoint), and
//! demand for it is bursty: a room full of users goes stale at once, and every
//! part of the client asks for keys at the same moment. [`KeysQueryScheduler`]
//! sits between those callers and the lookup, batching overlapping requests
//! into *waves* so the lookup runs at most once per wave while every caller
//! still gets an answer that covers its own request.
//!
//! The scheduler owns no transport and keeps no cache. It is constructed from
//! a single asynchronous *query action* and only ever coalesces requests that
//! are in flight or waiting to be issued; once a wave settles, the next query
//! starts from scratch.
//!
//! # Example
//!
//! ```
//! use keys_query_scheduler::KeysQueryScheduler;
//! use std::collections::{HashMap, HashSet};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() {
//! // In production the action is an HTTP call; here it is a fixed directory.
//! let scheduler = KeysQueryScheduler::new(|users: HashSet<String>| async move {
//!     let directory = HashMap::from([("alice".to_string(), "device-keys-of-alice")]);
//!     Ok::<_, std::io::Error>(
//!         users
//!             .into_iter()
//!             .filter_map(|user| directory.get(&user).copied().map(|keys| (user, keys)))
//!             .collect(),
//!     )
//! });
//!
//! let response = scheduler
//!     .query(HashSet::from(["alice".to_string()]))
//!     .await
//!     .unwrap();
//! assert_eq!(response.get("alice"), Some(&"device-keys-of-alice"));
//! # }
//! ```

pub mod query;

pub use query::{KeysQueryScheduler, QueryError, QueryHandle, Response, SchedulerStatus};
