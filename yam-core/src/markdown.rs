use std::path::Path;
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};
use serde_json::{Map, Value};
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::error::CompileError;

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

const THEME: &str = "base16-ocean.dark";
const FENCE: &str = "---";

/// A markdown page split into its front matter and rendered body.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownDocument {
    pub front_matter: Map<String, Value>,
    pub html: String,
}

impl MarkdownDocument {
    pub fn load(path: &Path) -> Result<Self, CompileError> {
        let content = std::fs::read_to_string(path).map_err(|source| CompileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|message| CompileError::Markdown {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let (front_matter, body) = split_front_matter(content)?;
        Ok(Self {
            front_matter,
            html: render_markdown(body),
        })
    }

    /// The template named by `field` in the front matter, if any.
    pub fn template(&self, field: &str) -> Option<&str> {
        self.front_matter
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Front matter fields plus `content`, the model handed to a named
    /// template.
    pub fn into_model(self) -> Value {
        let mut model = self.front_matter;
        model.insert("content".to_string(), Value::String(self.html));
        Value::Object(model)
    }

    /// A standalone html document for markdown without a template.
    pub fn to_standalone_html(&self) -> String {
        let title = self
            .front_matter
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default();
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
            html_escape::encode_text(title),
            self.html
        )
    }
}

fn split_front_matter(content: &str) -> Result<(Map<String, Value>, &str), String> {
    let trimmed = content.trim_start_matches('\u{feff}');
    let Some(rest) = trimmed.strip_prefix(FENCE) else {
        return Ok((Map::new(), content));
    };
    // the opening fence must sit on its own line
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return Ok((Map::new(), content));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let front_matter = match serde_yaml_ng::from_str::<Value>(yaml) {
                Ok(Value::Object(map)) => map,
                Ok(Value::Null) => Map::new(),
                Ok(_) => return Err("front matter must be a mapping".to_string()),
                Err(e) => return Err(format!("invalid front matter: {e}")),
            };
            return Ok((front_matter, body));
        }
        offset += line.len();
    }

    Err("front matter is missing its closing `---`".to_string())
}

/// Render markdown to html, highlighting fenced code blocks.
pub fn render_markdown(content: &str) -> String {
    let parser = Parser::new_ext(content, Options::all());

    let mut events = Vec::new();
    let mut code: Option<(String, String)> = None;

    for event in parser {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                code = Some((lang.to_string(), String::new()));
            }
            Event::Text(text) if code.is_some() => {
                if let Some((_, buffer)) = code.as_mut() {
                    buffer.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) if code.is_some() => {
                if let Some((lang, buffer)) = code.take() {
                    events.push(Event::Html(highlight(&lang, &buffer).into()));
                }
            }
            other => events.push(other),
        }
    }

    let mut out = String::new();
    html::push_html(&mut out, events.into_iter());
    out
}

fn highlight(lang: &str, code: &str) -> String {
    let fallback = || format!("<pre><code>{}</code></pre>", html_escape::encode_text(code));

    let token = lang.split_whitespace().next().unwrap_or_default();
    let Some(syntax) = SYNTAX_SET.find_syntax_by_token(token) else {
        return fallback();
    };
    let Some(theme) = THEME_SET.themes.get(THEME) else {
        return fallback();
    };

    highlighted_html_for_string(code, &SYNTAX_SET, syntax, theme).unwrap_or_else(|_| fallback())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_matter_and_body() {
        let doc = MarkdownDocument::parse("---\ntitle: Hello\ntemplate: templates/post.tera\n---\n# Hi\n").unwrap();
        assert_eq!(doc.front_matter["title"], "Hello");
        assert_eq!(doc.template("template"), Some("templates/post.tera"));
        assert!(doc.html.contains("<h1>Hi</h1>"));
    }

    #[test]
    fn test_no_front_matter() {
        let doc = MarkdownDocument::parse("plain *text*").unwrap();
        assert!(doc.front_matter.is_empty());
        assert_eq!(doc.template("template"), None);
        assert!(doc.html.contains("<em>text</em>"));
    }

    #[test]
    fn test_unclosed_front_matter_errors() {
        assert!(MarkdownDocument::parse("---\ntitle: x\n# body").is_err());
    }

    #[test]
    fn test_model_has_content() {
        let doc = MarkdownDocument::parse("---\ntitle: T\n---\nbody").unwrap();
        let model = doc.into_model();
        assert_eq!(model["title"], "T");
        assert!(model["content"].as_str().unwrap().contains("<p>body</p>"));
    }

    #[test]
    fn test_fenced_code_is_highlighted_or_escaped() {
        let html = render_markdown("```rust\nfn main() {}\n```\n");
        assert!(html.contains("<pre"));
        assert!(!html.contains("```"));

        let html = render_markdown("```nosuchlang\n<b>\n```\n");
        assert!(html.contains("&lt;b&gt;"));
    }

    #[test]
    fn test_standalone_html_escapes_title() {
        let doc = MarkdownDocument::parse("---\ntitle: \"<T>\"\n---\nx").unwrap();
        let html = doc.to_standalone_html();
        assert!(html.contains("<title>&lt;T&gt;</title>"));
        assert!(html.contains("</body>"));
    }
}
