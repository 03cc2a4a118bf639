//! The full build: clean, copy assets, compile everything, then the
//! sitemap.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info};

use crate::assets::copy_assets;
use crate::clean::clean;
use crate::config::BuildConfig;
use crate::error::{BuildError, CompileError, error_chain};
use crate::favicons::{FaviconOutcome, generate_favicons};
use crate::output::CompileReport;
use crate::pages::{PageCompiler, PageTarget};
use crate::scripts::compile_scripts;
use crate::sitemap::generate_sitemap;
use crate::styles::compile_styles;

#[derive(Debug, Default)]
pub struct BuildReport {
    pub assets: Vec<PathBuf>,
    pub pages: CompileReport,
    pub styles: CompileReport,
    pub scripts: CompileReport,
    pub favicons: Option<FaviconOutcome>,
    pub sitemap: Option<PathBuf>,
    /// Failures outside the per-file compilers (favicons, sitemap).
    pub errors: Vec<String>,
}

impl BuildReport {
    pub fn error_count(&self) -> usize {
        self.pages.errors.len() + self.styles.errors.len() + self.scripts.errors.len() + self.errors.len()
    }

    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }
}

/// Run the whole pipeline. Per-file failures are collected in the report;
/// only filesystem failures around the build directory abort it.
pub fn build_all(config: &BuildConfig, clean_cache: bool) -> Result<BuildReport, BuildError> {
    let started = Instant::now();
    info!(mode = config.mode.as_str(), "building");

    clean(config, clean_cache)?;
    std::fs::create_dir_all(&config.paths.build).map_err(|source| BuildError::CreateBuildDir {
        path: config.paths.build.clone(),
        source,
    })?;

    let mut report = BuildReport {
        assets: copy_assets(config)?,
        ..BuildReport::default()
    };

    // favicons write the partial pages include, so they go first on that branch
    let ((favicons, pages), (styles, scripts)) = rayon::join(
        || {
            let favicons = generate_favicons(config);
            let pages = PageCompiler::new(config).compile(&PageTarget::All);
            (favicons, pages)
        },
        || {
            rayon::join(
                || compile_styles(config, None),
                || compile_scripts(config, None),
            )
        },
    );

    report.pages = pages?;
    report.styles = styles?;
    report.scripts = scripts?;
    match favicons {
        Ok(outcome) => report.favicons = Some(outcome),
        Err(e) => record_error(config, &mut report, &e),
    }

    if config.mode.is_production() && config.sitemap_enabled() {
        match generate_sitemap(config) {
            Ok(path) => report.sitemap = path,
            Err(e) => {
                error!("sitemap failed: {e}");
                report.errors.push(error_chain(&e));
            }
        }
    }

    info!(
        pages = report.pages.written.len(),
        styles = report.styles.written.len(),
        scripts = report.scripts.written.len(),
        errors = report.error_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "build finished"
    );
    Ok(report)
}

fn record_error(config: &BuildConfig, report: &mut BuildReport, e: &CompileError) {
    error!(path = %config.paths.pretty(e.path()), "{}", error_chain(e));
    report.errors.push(error_chain(e));
}
