pub mod config;
pub mod event;
pub mod key;
pub mod outbox;
pub mod reader;
pub mod registry;
pub mod source;
pub mod watcher;

pub use config::WatcherConfig;
pub use event::{ChangeEvent, Diagnostic, DiagnosticLevel, EventType, Outbound};
pub use key::{ObjectId, ResourceKey, Scope};
pub use outbox::{Outbox, Subscriber};
pub use reader::{CacheReader, CachedResources};
pub use registry::WatcherRegistry;
pub use source::{Listing, ResourceSource, ScopedResourceApi, WatchStream};
pub use watcher::{ResourceWatcher, WatcherState};
