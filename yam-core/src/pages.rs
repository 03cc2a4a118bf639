//! Page compilation: templates and markdown rendered once per locale.
//!
//! Which pages get rendered depends on the [`PageTarget`]. A full run renders
//! every page in every locale it has; a change to one file narrows that down
//! to the pages (and locales) the file can affect.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;

use crate::config::BuildConfig;
use crate::discovery::{get_files, pattern_for};
use crate::env::ClientEnvironment;
use crate::error::{BuildError, CompileError};
use crate::locale::{LocaleContext, LocaleDocument, LocaleResolver};
use crate::markdown::MarkdownDocument;
use crate::output::{CompileReport, relative_up, write_artifact};
use crate::source::{SourceFile, SourceKind};
use crate::template::{TemplateLibrary, context_from, is_page_template};

/// What to recompile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTarget {
    All,
    Template(PathBuf),
    Locale(PathBuf),
    Markdown(PathBuf),
}

impl PageTarget {
    /// The target a changed file maps to. `None` when the file cannot affect
    /// any page.
    pub fn for_change(path: &Path, config: &BuildConfig) -> Option<Self> {
        let locales = LocaleResolver::new(config);

        match SourceKind::classify(path, config)? {
            SourceKind::Template if is_page_template(path, &config.paths.pages) => {
                Some(PageTarget::Template(path.to_path_buf()))
            }
            // partials and layouts can be included anywhere
            SourceKind::Template => Some(PageTarget::All),
            SourceKind::Markdown => Some(PageTarget::Markdown(path.to_path_buf())),
            SourceKind::Locale if locales.is_global(path) => {
                if locales.is_default(&LocaleResolver::name_of(path)) {
                    Some(PageTarget::All)
                } else {
                    Some(PageTarget::Locale(path.to_path_buf()))
                }
            }
            SourceKind::Locale if is_page_locale(path, config) => {
                Some(PageTarget::Locale(path.to_path_buf()))
            }
            _ => None,
        }
    }
}

fn is_page_locale(path: &Path, config: &BuildConfig) -> bool {
    path.starts_with(&config.paths.pages)
        && path
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|name| name.to_string_lossy() == config.options.locales.directory)
}

/// One rendered page, not yet written.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutput {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub html: String,
    pub locale: String,
    /// The context the page was rendered with. `Null` for markdown rendered
    /// without a template.
    pub context: Value,
}

/// A page source paired with the locale to render it in.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RenderJob {
    source: PathBuf,
    locale: String,
    page_locale: Option<PathBuf>,
}

#[derive(Serialize)]
struct RenderContext<'a> {
    env: &'a ClientEnvironment,
    relative_root: String,
    relative_locale_root: String,
    locale_key: &'a str,
    globals: &'a Value,
    page: &'a Value,
    locale: Value,
    breakpoints: &'a BTreeMap<String, String>,
}

pub struct PageCompiler<'a> {
    config: &'a BuildConfig,
    library: TemplateLibrary,
    locales: LocaleResolver<'a>,
}

impl<'a> PageCompiler<'a> {
    pub fn new(config: &'a BuildConfig) -> Self {
        Self {
            config,
            library: TemplateLibrary::load(config),
            locales: LocaleResolver::new(config),
        }
    }

    /// Render and write every page `target` selects. Failures are collected
    /// per page; only a broken discovery pattern aborts the run.
    pub fn compile(&self, target: &PageTarget) -> Result<CompileReport, BuildError> {
        let results = self.render(target)?;

        let mut report = CompileReport::default();
        for result in results {
            let written = result.and_then(|output| {
                write_artifact(&output.destination, &output.html)?;
                Ok(output.destination)
            });
            report.record(&self.config.paths, written);
        }

        Ok(report)
    }

    /// Render without writing anything. Results come back in a stable order.
    pub fn render(
        &self,
        target: &PageTarget,
    ) -> Result<Vec<Result<PageOutput, CompileError>>, BuildError> {
        let jobs = self.plan(target)?;
        Ok(jobs.par_iter().map(|job| self.render_job(job)).collect())
    }

    /// Render `source` in locale `locale`, picking up its page-local
    /// document for that locale when one exists.
    pub fn render_source(&self, source: &Path, locale: &str) -> Result<PageOutput, CompileError> {
        let dir = source.parent().unwrap_or(Path::new(""));
        self.render_job(&RenderJob {
            source: source.to_path_buf(),
            locale: locale.to_string(),
            page_locale: self.locales.page_locale_file(dir, locale),
        })
    }

    fn plan(&self, target: &PageTarget) -> Result<Vec<RenderJob>, BuildError> {
        match target {
            PageTarget::All => {
                let mut jobs = Vec::new();
                for source in self.page_sources(&self.config.paths.pages, true)? {
                    jobs.extend(self.jobs_for(&source)?);
                }
                Ok(jobs)
            }
            PageTarget::Template(path) | PageTarget::Markdown(path) => {
                // removed since the event fired
                if !path.is_file() || SourceFile::new(path).is_partial {
                    return Ok(Vec::new());
                }
                self.jobs_for(path)
            }
            PageTarget::Locale(path) => self.plan_locale(path),
        }
    }

    fn plan_locale(&self, path: &Path) -> Result<Vec<RenderJob>, BuildError> {
        let name = LocaleResolver::name_of(path);

        if self.locales.is_global(path) {
            if self.locales.is_default(&name) {
                return self.plan(&PageTarget::All);
            }
            // every page that has a page-local document for this locale
            let mut jobs = Vec::new();
            for source in self.page_sources(&self.config.paths.pages, true)? {
                let dir = source.parent().unwrap_or(Path::new(""));
                if let Some(page_locale) = self.locales.page_locale_file(dir, &name) {
                    jobs.push(RenderJob {
                        source,
                        locale: name.clone(),
                        page_locale: Some(page_locale),
                    });
                }
            }
            return Ok(jobs);
        }

        if !path.is_file() {
            return Ok(Vec::new());
        }

        // pages/about/locales/fr.yaml -> pages/about/*
        let Some(template_dir) = path.parent().and_then(Path::parent) else {
            return Ok(Vec::new());
        };
        Ok(self
            .page_sources(template_dir, false)?
            .into_iter()
            .map(|source| RenderJob {
                source,
                locale: name.clone(),
                page_locale: Some(path.to_path_buf()),
            })
            .collect())
    }

    /// One job per page-local locale, or a single default-locale job when
    /// the page has none.
    fn jobs_for(&self, source: &Path) -> Result<Vec<RenderJob>, BuildError> {
        let dir = source.parent().unwrap_or(Path::new(""));
        let files = self.locales.page_locale_files(dir)?;

        if files.is_empty() {
            return Ok(vec![RenderJob {
                source: source.to_path_buf(),
                locale: self.locales.default_name().to_string(),
                page_locale: None,
            }]);
        }

        Ok(files
            .into_iter()
            .map(|file| RenderJob {
                source: source.to_path_buf(),
                locale: LocaleResolver::name_of(&file),
                page_locale: Some(file),
            })
            .collect())
    }

    /// Non-partial page sources under `dir`. When a template and a markdown
    /// file share a stem the template wins.
    fn page_sources(&self, dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, BuildError> {
        let templates = get_files(&[pattern_for(dir, recursive, SourceKind::TEMPLATE_EXTENSION)])?;
        let markdown = get_files(&[pattern_for(dir, recursive, "md")])?;

        let mut sources: Vec<PathBuf> = templates
            .into_iter()
            .filter(|p| !SourceFile::new(p).is_partial)
            .collect();

        for md in markdown {
            let shadowed = md.with_extension(SourceKind::TEMPLATE_EXTENSION).is_file();
            if !shadowed && !SourceFile::new(&md).is_partial {
                sources.push(md);
            }
        }

        sources.sort();
        Ok(sources)
    }

    fn render_job(&self, job: &RenderJob) -> Result<PageOutput, CompileError> {
        let file = SourceFile::new(&job.source);
        let locale = self.locales.resolve(&job.locale, job.page_locale.as_deref());

        let (locale_dir, rel_dir) = self.destination_parts(&file, &job.locale);
        let destination = self
            .config
            .paths
            .build
            .join(&locale_dir)
            .join(&rel_dir)
            .join(format!("{}.html", file.stem));

        let is_markdown = file.extension == "md";
        let markdown = if is_markdown {
            Some(MarkdownDocument::load(&job.source)?)
        } else {
            None
        };

        let field = &self.config.options.locales.markdown_template_field;
        if let Some(doc) = &markdown
            && doc.template(field).is_none()
        {
            return Ok(PageOutput {
                source: job.source.clone(),
                destination,
                html: doc.to_standalone_html(),
                locale: job.locale.clone(),
                context: Value::Null,
            });
        }

        let depth_to_locale = depth(&rel_dir);
        let depth_to_root = depth_to_locale + depth(&locale_dir);

        let template_name = markdown
            .as_ref()
            .and_then(|doc| doc.template(field))
            .map(str::to_string);
        let page_model = match markdown {
            Some(doc) => locale.page.clone().merged(&LocaleDocument(doc.into_model())),
            None => locale.page.clone(),
        };
        let locale = LocaleContext {
            page: page_model,
            ..locale
        };

        let merged = locale.merged();
        let render_context = RenderContext {
            env: &self.config.env,
            relative_root: relative_up(depth_to_root),
            relative_locale_root: relative_up(depth_to_locale),
            locale_key: &job.locale,
            globals: &locale.globals.0,
            page: &locale.page.0,
            locale: merged.0,
            breakpoints: &self.config.options.breakpoints,
        };

        let to_error = |message: String| CompileError::Template {
            path: job.source.clone(),
            message,
        };
        let context_value =
            serde_json::to_value(&render_context).map_err(|e| to_error(e.to_string()))?;
        let context = context_from(&render_context).map_err(|e| to_error(e.to_string()))?;

        let html = match template_name {
            Some(name) => self.library.render_named(&job.source, &name, &context)?,
            None => self.library.render_file(&job.source, &context)?,
        };

        Ok(PageOutput {
            source: job.source.clone(),
            destination,
            html,
            locale: job.locale.clone(),
            context: context_value,
        })
    }

    /// `(<locale> or empty, <dir relative to pages>)`.
    fn destination_parts(&self, file: &SourceFile, locale: &str) -> (PathBuf, PathBuf) {
        let locale_dir = if self.locales.is_default(locale) {
            PathBuf::new()
        } else {
            PathBuf::from(locale)
        };
        (locale_dir, file.relative_dir(&self.config.paths.pages))
    }
}

fn depth(path: &Path) -> usize {
    path.components().count()
}
