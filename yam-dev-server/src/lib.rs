//! Development server: compiles requested pages on the fly, recompiles on
//! file changes and tells open tabs to reload.

pub mod asset_log;
pub mod error;
pub mod livereload;
pub mod plugins;
pub mod resolver;
pub mod server;
pub mod watch;

pub use error::ServerError;
pub use livereload::{ReloadCoalescer, inject_livereload_script};
pub use plugins::{MockRoutePlugin, RequestPlugin};
pub use resolver::{RequestResolver, Resolved, decode_request_path};
pub use server::{DevServer, ServerOptions};
pub use watch::{SourceWatcher, WatchClass};
