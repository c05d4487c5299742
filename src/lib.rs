//! The Rust server-side SDK for FeatureProbe, a feature management service.
//!
//! # Overview
//!
//! The SDK revolves around a [`FeatureProbe`] client that evaluates feature toggles for users.
//! Each user ([`FPUser`]) has a key and string attributes that toggle rules match against.
//! Evaluation happens locally against a copy of the toggle repository that is kept up to date in
//! the background by a synchronizer (polling, streaming or a local file, see [`SyncMode`]).
//!
//! Evaluations and custom events from [`FeatureProbe::track`] are aggregated and periodically
//! reported back to the server.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum and are returned only while constructing a client.
//! Toggle getters never fail: when a toggle cannot be evaluated, the caller's default is returned
//! and the `*_detail` getters explain why in [`FPDetail::reason`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `featureprobe`
//! target. Consider integrating a `log`-compatible logger implementation for better visibility
//! into SDK operations.
//!
//! # Examples
//!
//! ```no_run
//! # use featureprobe::{ClientConfig, FPUser};
//! let client = ClientConfig::from_server_sdk_key("server-sdk-key")
//!     .remote_url("https://featureprobe.example.com/server")
//!     .to_client()?;
//!
//! let user = FPUser::new().stable_rollout("user-id").with("city", "Paris");
//! let color = client.string_value("header_color", &user, "red");
//! # Ok::<(), featureprobe::Error>(())
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod bucketer;
mod client;
mod config;
mod error;
mod eval;
pub mod events;
mod http;
pub mod model;
mod repository;
pub mod sync;
mod user;

pub use bucketer::{Bucketer, Sha1Bucketer, BUCKET_SIZE};
pub use client::{FPDetail, FeatureProbe};
pub use config::{ClientConfig, SyncMode};
pub use error::{Error, EvalError, Result};
pub use eval::{EvaluationResult, HitResult};
pub use repository::DataRepository;
pub use user::FPUser;
