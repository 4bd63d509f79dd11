//! Keep API gateways in sync with Kubernetes routing resources.
//!
//! Objects are translated into gateway configuration with a [Translator],
//! cached per sync target in a [Store], and pushed to the gateways of each
//! target by an [Executor]. A [Client] ties the three together: it tracks
//! which targets every object is synced to and reports sync failures back
//! against the objects that caused them.

mod error;
pub use error::{Error, Result};

pub mod cache;
pub mod config;
pub mod config_manager;
pub mod sync;
pub mod translate;

mod client;
pub use client::{Client, StatusReport};

pub use cache::Store;
pub use config::Config;
pub use config_manager::ConfigManager;
pub use sync::{Executor, Task};
pub use translate::{SourceObject, TranslateContext, Translator};
