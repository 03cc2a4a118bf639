use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::config::BuildConfig;
use crate::discovery::{get_files, pattern_for};
use crate::error::BuildError;
use crate::output::write_artifact;

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
pub const SITEMAP_FILE: &str = "sitemap.xml";

/// Write `build/sitemap.xml` listing the directory of every emitted html
/// file. Skipped when no public url resolves or nothing was built.
pub fn generate_sitemap(config: &BuildConfig) -> Result<Option<PathBuf>, BuildError> {
    let Some(public_url) = config.public_url() else {
        warn!("sitemap enabled but no public url configured (set `sitemap` or PUBLIC_URL), skipping");
        return Ok(None);
    };

    let html = get_files(&[pattern_for(&config.paths.build, true, "html")])?;
    if html.is_empty() {
        warn!("no html files in the build directory, skipping sitemap");
        return Ok(None);
    }

    let urls = page_urls(&config.paths.build, &public_url, &html);
    let xml = into_xml(&urls, Utc::now().date_naive());

    let destination = config.paths.build.join(SITEMAP_FILE);
    write_artifact(&destination, xml)?;

    info!(path = %config.paths.pretty(&destination), urls = urls.len(), "compiled");
    Ok(Some(destination))
}

/// `<public url>/<dir>/` for each file, deduplicated and sorted.
fn page_urls(build: &Path, public_url: &str, files: &[PathBuf]) -> Vec<String> {
    let dirs: BTreeSet<String> = files
        .iter()
        .filter_map(|file| file.parent()?.strip_prefix(build).ok())
        .map(|dir| {
            dir.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect();

    dirs.into_iter()
        .map(|dir| {
            if dir.is_empty() {
                format!("{public_url}/")
            } else {
                format!("{public_url}/{dir}/")
            }
        })
        .collect()
}

fn into_xml(urls: &[String], lastmod: NaiveDate) -> String {
    let lastmod = lastmod.format("%Y-%m-%d");
    let mut xml = String::with_capacity(4096);

    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!(r#"<urlset xmlns="{SITEMAP_NS}">"#));
    xml.push('\n');

    for url in urls {
        xml.push_str("  <url>\n");
        xml.push_str(&format!("    <loc>{}</loc>\n", escape_xml(url)));
        xml.push_str(&format!("    <lastmod>{lastmod}</lastmod>\n"));
        xml.push_str("  </url>\n");
    }

    xml.push_str("</urlset>\n");
    xml
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
