pub mod api;
pub mod client;
pub mod logs;
pub mod mirror;
pub mod resources;

/// Default user agent for `kubemirror` - automatically uses the package version
///
/// ## Client Creation Pattern Guidelines:
///
/// Callers should use `client::new(&options, Some(USER_AGENT))` for consistency.
/// The user-agent can be overridden via the `KUBEMIRROR_USER_AGENT` environment variable.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
