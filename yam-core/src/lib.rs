pub mod assets;
pub mod build;
pub mod clean;
pub mod compress;
pub mod config;
pub mod discovery;
pub mod env;
pub mod error;
pub mod favicons;
pub mod locale;
pub mod markdown;
pub mod memo;
pub mod output;
pub mod pages;
pub mod scripts;
pub mod sitemap;
pub mod source;
pub mod styles;
pub mod template;

// Re-export main types
pub use build::{BuildReport, build_all};
pub use config::{BuildConfig, Mode, Options, Paths};
pub use env::ClientEnvironment;
pub use error::{BuildError, CacheError, CompileError, CompressError, ConfigError};
pub use pages::{PageCompiler, PageOutput, PageTarget};
pub use source::{SourceFile, SourceKind};
