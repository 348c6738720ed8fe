pub mod client;
pub mod connection;
pub mod kinds;

/// Default user agent for `kubewire` - automatically uses the package version
///
/// All clients built by the connection registry carry it so that proxy
/// traffic can be told apart in API server audit logs.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
