//! `camctl-middleware` – Change Notification
//!
//! Carries session [`ChangeEvent`][camctl_types::ChangeEvent]s from the
//! runtime to whoever is watching, without caring what they mean.
//!
//! # Modules
//!
//! - [`notifier`] – [`ChangeNotifier`]: synchronous, ordered,
//!   reason-filtered callbacks, plus lag-reporting async
//!   [`EventStream`]s built on Tokio broadcast channels.

pub mod notifier;

pub use notifier::{ChangeNotifier, EventStream, ReasonFilter, SubscriptionId};
