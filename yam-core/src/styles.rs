use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::config::BuildConfig;
use crate::discovery::{get_files, pattern_for};
use crate::error::{BuildError, CompileError};
use crate::output::{CompileReport, mirrored_destination, write_artifact};
use crate::source::SourceFile;

const BREAKPOINTS_IMPORTS: [&str; 2] = [
    "@import \"yam:breakpoints\";",
    "@import 'yam:breakpoints';",
];

#[derive(Debug, Clone, PartialEq)]
pub struct StyleOutput {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub css: String,
}

/// Compile one stylesheet without writing it.
pub fn render_style(config: &BuildConfig, source: &Path) -> Result<StyleOutput, CompileError> {
    let scss = std::fs::read_to_string(source).map_err(|e| CompileError::Read {
        path: source.to_path_buf(),
        source: e,
    })?;
    let scss = inject_breakpoints(&scss, config);

    let style = if config.mode.is_production() {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    };

    let mut load_paths: Vec<PathBuf> = Vec::new();
    if let Some(dir) = source.parent() {
        load_paths.push(dir.to_path_buf());
    }
    load_paths.push(config.paths.pages.clone());
    load_paths.extend(
        config
            .options
            .styles
            .load_paths
            .iter()
            .map(|p| config.paths.cwd.join(p)),
    );

    let options = grass::Options::default().style(style).load_paths(&load_paths);
    let css = grass::from_string(scss, &options).map_err(|e| CompileError::Style {
        path: source.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(StyleOutput {
        source: source.to_path_buf(),
        destination: mirrored_destination(&config.paths, source, "css"),
        css,
    })
}

/// Compile `changed`, or every stylesheet when `None` or when the change is
/// a partial another sheet may import.
pub fn compile_styles(
    config: &BuildConfig,
    changed: Option<&Path>,
) -> Result<CompileReport, BuildError> {
    let sources = match changed {
        // removed since the event fired
        Some(path) if !path.is_file() => Vec::new(),
        Some(path) if !SourceFile::new(path).is_partial && path.starts_with(&config.paths.pages) => {
            vec![path.to_path_buf()]
        }
        _ => stylesheets(config)?,
    };

    let results: Vec<_> = sources
        .par_iter()
        .map(|source| {
            let output = render_style(config, source)?;
            write_artifact(&output.destination, &output.css)?;
            Ok(output.destination)
        })
        .collect();

    let mut report = CompileReport::default();
    for result in results {
        report.record(&config.paths, result);
    }
    Ok(report)
}

/// Non-partial `.scss` files under the pages directory.
pub fn stylesheets(config: &BuildConfig) -> Result<Vec<PathBuf>, BuildError> {
    Ok(get_files(&[pattern_for(&config.paths.pages, true, "scss")])?
        .into_iter()
        .filter(|p| !SourceFile::new(p).is_partial)
        .collect())
}

/// Replace the breakpoints import with one `$name` variable per configured
/// breakpoint.
fn inject_breakpoints(scss: &str, config: &BuildConfig) -> String {
    let variables: String = config
        .options
        .breakpoints
        .iter()
        .map(|(name, query)| format!("${name}: \"screen and {query}\";\n"))
        .collect();

    BREAKPOINTS_IMPORTS
        .iter()
        .fold(scss.to_string(), |acc, import| acc.replace(import, &variables))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_breakpoints_import_becomes_variables() {
        let mut config = BuildConfig::with_defaults(Path::new("/site"), Mode::Development);
        config
            .options
            .breakpoints
            .insert("medium-up".into(), "(min-width: 40em)".into());

        let scss = inject_breakpoints("@import \"yam:breakpoints\";\na { b: c }", &config);
        assert_eq!(scss, "$medium-up: \"screen and (min-width: 40em)\";\n\na { b: c }");
    }

    #[test]
    fn test_compile_with_partial_and_breakpoints() {
        let dir = TempDir::new().unwrap();
        let mut config = BuildConfig::with_defaults(dir.path(), Mode::Production);
        config.options.breakpoints.insert("md".into(), "(min-width: 40em)".into());

        write(dir.path(), "pages/_colors.scss", "$brand: #ff0000;");
        let main = write(
            dir.path(),
            "pages/main.scss",
            "@import \"yam:breakpoints\";\n@import \"colors\";\n@media #{$md} { a { color: $brand; } }\n",
        );

        let output = render_style(&config, &main).unwrap();
        assert_eq!(output.destination, dir.path().join("build/main.css"));
        assert!(output.css.contains("@media screen and (min-width: 40em)"));
        assert!(output.css.contains("red") || output.css.contains("#ff0000") || output.css.contains("#f00"));
    }

    #[test]
    fn test_compile_all_skips_partials_and_reports_errors() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        write(dir.path(), "pages/_partial.scss", "a { b: c }");
        write(dir.path(), "pages/ok.scss", "a { b: c }");
        write(dir.path(), "pages/bad.scss", "a { b: ");

        let report = compile_styles(&config, None).unwrap();
        assert_eq!(report.written, vec![dir.path().join("build/ok.css")]);
        assert_eq!(report.errors.len(), 1);
        assert!(!dir.path().join("build/_partial.css").exists());
    }

    #[test]
    fn test_partial_change_recompiles_everything() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        let partial = write(dir.path(), "pages/_vars.scss", "$x: 1px;");
        write(dir.path(), "pages/a.scss", "@import \"vars\"; a { width: $x; }");
        write(dir.path(), "pages/blog/b.scss", "b { width: 2px; }");

        let report = compile_styles(&config, Some(&partial)).unwrap();
        assert_eq!(report.written.len(), 2);
        assert!(dir.path().join("build/blog/b.css").is_file());
    }
}
