//! HTML to Markdown conversion
//!
//! Conversion goes through one backend picked at construction:
//! `htmd` when compiled in, then `html2md`, then the built-in regex converter.
//! A backend error falls back to the built-in converter for that document.

use crate::failure::{Failure, Stage};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Stands in for an empty block until conversion is done
const PARAGRAPH_BREAK: &str = "WEBCLIPPARAGRAPHBREAK";

static EMPTY_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["div", "p", "section"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(
                r"(?is)<{tag}\b[^>]*>(?:\s|&nbsp;|&#160;|&#xa0;|\u{{a0}}|<br\s*/?>)*</{tag}\s*>"
            ))
            .expect("empty block regex is valid")
        })
        .collect()
});

static BREAK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?m)^[ \t>]*{}[ \t]*$", PARAGRAPH_BREAK)).expect("break regex is valid")
});

static HORIZONTAL_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]{2,}").expect("whitespace regex is valid"));

static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line regex is valid"));

/// Available conversion backends, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Htmd,
    Html2md,
    Builtin,
}

impl Backend {
    /// Backends compiled into this build, in preference order
    pub fn available() -> Vec<Backend> {
        let mut backends = Vec::new();
        if cfg!(feature = "htmd") {
            backends.push(Backend::Htmd);
        }
        if cfg!(feature = "html2md") {
            backends.push(Backend::Html2md);
        }
        backends.push(Backend::Builtin);
        backends
    }

    pub fn is_available(self) -> bool {
        Self::available().contains(&self)
    }

    /// Resolve a configured name. `auto`, unknown and unavailable names
    /// resolve to the first available backend.
    pub fn select(name: &str) -> Backend {
        let first = Self::available()[0];
        match name.parse::<Backend>() {
            Ok(backend) if backend.is_available() => backend,
            Ok(backend) => {
                warn!("Markdown backend {} not compiled in, using {}", backend, first);
                first
            }
            Err(_) => {
                if !name.eq_ignore_ascii_case("auto") {
                    warn!("Unknown markdown backend {:?}, using {}", name, first);
                }
                first
            }
        }
    }

    fn run(self, html: &str) -> std::result::Result<String, String> {
        match self {
            #[cfg(feature = "htmd")]
            Backend::Htmd => htmd::convert(html).map_err(|e| e.to_string()),
            #[cfg(feature = "html2md")]
            Backend::Html2md => std::panic::catch_unwind(|| html2md::parse_html(html))
                .map_err(|_| "html2md panicked".to_string()),
            Backend::Builtin => Ok(builtin::convert(html)),
            #[allow(unreachable_patterns)]
            other => Err(format!("backend {} not compiled in", other)),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "htmd" => Ok(Backend::Htmd),
            "html2md" => Ok(Backend::Html2md),
            "builtin" | "regex" => Ok(Backend::Builtin),
            _ => Err(format!(
                "Unknown converter: {}. Use 'auto', 'htmd', 'html2md' or 'builtin'",
                s
            )),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Htmd => write!(f, "htmd"),
            Backend::Html2md => write!(f, "html2md"),
            Backend::Builtin => write!(f, "builtin"),
        }
    }
}

/// Converts cleaned HTML to normalized Markdown
#[derive(Debug, Clone, Copy)]
pub struct MarkdownConverter {
    backend: Backend,
}

impl MarkdownConverter {
    /// Pick a backend for the whole run
    pub fn new(preference: &str) -> Self {
        let backend = Backend::select(preference);
        debug!("Markdown backend: {}", backend);
        Self { backend }
    }

    pub fn with_backend(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Convert an HTML fragment
    pub fn convert(&self, html: &str) -> Result<String, Failure> {
        let prepared = mark_empty_blocks(html);

        let raw = match self.backend.run(&prepared) {
            Ok(markdown) => markdown,
            Err(e) if self.backend != Backend::Builtin => {
                warn!("{} conversion failed ({}), using builtin", self.backend, e);
                builtin::convert(&prepared)
            }
            Err(e) => return Err(Failure::convert(Stage::Convert, e)),
        };

        Ok(normalize(&restore_breaks(&raw)))
    }
}

impl Default for MarkdownConverter {
    fn default() -> Self {
        Self::new("auto")
    }
}

/// Replace whitespace-only blocks with the paragraph-break sentinel
pub fn mark_empty_blocks(html: &str) -> String {
    let replacement = format!("<p>{}</p>", PARAGRAPH_BREAK);
    EMPTY_BLOCKS.iter().fold(html.to_string(), |acc, re| {
        re.replace_all(&acc, replacement.as_str()).into_owned()
    })
}

fn restore_breaks(markdown: &str) -> String {
    let text = BREAK_LINE.replace_all(markdown, "");
    // Sentinels that ended up inline with other text
    text.replace(PARAGRAPH_BREAK, "\n\n")
}

/// Post-conversion cleanup shared by every backend
pub fn normalize(markdown: &str) -> String {
    let unescaped = html_escape::decode_html_entities(markdown);

    let mut lines = Vec::new();
    let mut in_fence = false;
    for line in unescaped.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            lines.push(line.trim_end().to_string());
            continue;
        }
        if in_fence {
            lines.push(line.trim_end().to_string());
            continue;
        }
        let indent = &line[..line.len() - trimmed.len()];
        let body = HORIZONTAL_RUN.replace_all(trimmed, " ");
        lines.push(format!("{}{}", indent, body).trim_end().to_string());
    }

    let joined = lines.join("\n");
    BLANK_RUN.replace_all(&joined, "\n\n").trim().to_string()
}

/// Regex-based converter used when no library backend is available
pub mod builtin {
    use regex::{Captures, Regex};
    use std::sync::LazyLock;

    macro_rules! re {
        ($name:ident, $pattern:expr) => {
            static $name: LazyLock<Regex> =
                LazyLock::new(|| Regex::new($pattern).expect("converter regex is valid"));
        };
    }

    re!(HEAD, r"(?is)<head\b.*?</head>");
    re!(PRE, r"(?is)<pre\b[^>]*>(?:\s*<code\b[^>]*>)?(.*?)(?:</code>\s*)?</pre>");
    re!(HEADING, r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]>");
    re!(IMG, r"(?is)<img\b[^>]*>");
    re!(VIDEO, r"(?is)<video\b[^>]*>");
    re!(ATTR_SRC, r#"(?is)\bsrc\s*=\s*["']([^"']*)["']"#);
    re!(ATTR_ALT, r#"(?is)\balt\s*=\s*["']([^"']*)["']"#);
    re!(ATTR_POSTER, r#"(?is)\bposter\s*=\s*["']([^"']*)["']"#);
    re!(LINK, r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#);
    re!(STRONG, r"(?is)<(?:strong|b)\b[^>]*>(.*?)</(?:strong|b)>");
    re!(EM, r"(?is)<(?:em|i)\b[^>]*>(.*?)</(?:em|i)>");
    re!(CODE, r"(?is)<code\b[^>]*>(.*?)</code>");
    re!(BLOCKQUOTE, r"(?is)<blockquote\b[^>]*>(.*?)</blockquote>");
    re!(LIST_ITEM, r"(?is)<li\b[^>]*>(.*?)</li>");
    re!(HR, r"(?is)<hr\b[^>]*>");
    re!(BR, r"(?is)<br\s*/?>");
    re!(BLOCK_CLOSE, r"(?is)</(?:p|div|section|article|main|ul|ol|table|tr|figure|figcaption|h[1-6])\s*>");
    re!(BLOCK_OPEN, r"(?is)<(?:p|div|section|article|main|ul|ol|table|tr|figure|figcaption)\b[^>]*>");
    re!(CELL, r"(?is)</t[dh]\s*>");
    re!(TAG, r"(?is)<[^>]+>");
    re!(INLINE_SPACE, r"[ \t\r\n]+");

    /// Convert HTML to Markdown with a fixed sequence of substitutions
    pub fn convert(html: &str) -> String {
        let mut text = HEAD.replace_all(html, "").into_owned();

        // Code blocks are pulled out first so later passes leave them alone
        let mut blocks = Vec::new();
        text = PRE
            .replace_all(&text, |caps: &Captures| {
                let code = TAG.replace_all(&caps[1], "");
                blocks.push(format!("```\n{}\n```", code.trim_matches('\n')));
                format!("\n\nWEBCLIPCODEBLOCK{}\n\n", blocks.len() - 1)
            })
            .into_owned();

        text = HEADING
            .replace_all(&text, |caps: &Captures| {
                let level: usize = caps[1].parse().unwrap_or(1);
                format!("\n\n{} {}\n\n", "#".repeat(level), inline_text(&caps[2]))
            })
            .into_owned();

        text = IMG
            .replace_all(&text, |caps: &Captures| {
                let tag = &caps[0];
                match ATTR_SRC.captures(tag) {
                    Some(src) => {
                        let alt = ATTR_ALT.captures(tag).map(|a| a[1].to_string()).unwrap_or_default();
                        format!("![{}]({})", alt, &src[1])
                    }
                    None => String::new(),
                }
            })
            .into_owned();

        text = VIDEO
            .replace_all(&text, |caps: &Captures| {
                let tag = &caps[0];
                let poster = ATTR_POSTER.captures(tag).map(|p| format!("![]({})", &p[1]));
                let src = ATTR_SRC.captures(tag).map(|s| format!("[video]({})", &s[1]));
                let parts: Vec<String> = poster.into_iter().chain(src).collect();
                format!("\n\n{}\n\n", parts.join("\n\n"))
            })
            .into_owned();

        text = LINK
            .replace_all(&text, |caps: &Captures| {
                let label = inline_text(&caps[2]);
                let label = if label.is_empty() { caps[1].to_string() } else { label };
                format!("[{}]({})", label, &caps[1])
            })
            .into_owned();

        text = STRONG.replace_all(&text, "**$1**").into_owned();
        text = EM.replace_all(&text, "*$1*").into_owned();
        text = CODE.replace_all(&text, "`$1`").into_owned();

        text = BLOCKQUOTE
            .replace_all(&text, |caps: &Captures| {
                let inner = TAG.replace_all(&caps[1], "\n");
                let quoted: Vec<String> = inner
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|line| format!("> {}", line))
                    .collect();
                format!("\n\n{}\n\n", quoted.join("\n"))
            })
            .into_owned();

        text = LIST_ITEM
            .replace_all(&text, |caps: &Captures| format!("\n- {}\n", inline_text(&caps[1])))
            .into_owned();

        text = HR.replace_all(&text, "\n\n---\n\n").into_owned();
        text = BR.replace_all(&text, "\n").into_owned();
        text = CELL.replace_all(&text, " | ").into_owned();
        text = BLOCK_CLOSE.replace_all(&text, "\n\n").into_owned();
        text = BLOCK_OPEN.replace_all(&text, "\n\n").into_owned();
        text = TAG.replace_all(&text, "").into_owned();

        for (i, block) in blocks.iter().enumerate() {
            text = text.replace(&format!("WEBCLIPCODEBLOCK{}", i), block);
        }
        text
    }

    fn inline_text(html: &str) -> String {
        let stripped = TAG.replace_all(html, "");
        INLINE_SPACE.replace_all(stripped.trim(), " ").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_blocks_become_blank_lines() {
        let html = "<p>First</p><div> &nbsp; <br/> </div><p>Second</p>";
        let md = MarkdownConverter::with_backend(Backend::Builtin)
            .convert(html)
            .unwrap();
        assert_eq!(md, "First\n\nSecond");
    }

    #[test]
    fn test_mark_empty_blocks_leaves_content_alone() {
        let html = "<section><br></section><div>text</div>";
        let marked = mark_empty_blocks(html);
        assert!(marked.contains(PARAGRAPH_BREAK));
        assert!(marked.contains("<div>text</div>"));
    }

    #[test]
    fn test_normalize_caps_blank_lines() {
        let md = "Line one   \n\n\n\n\nLine  two\t\tend";
        assert_eq!(normalize(md), "Line one\n\nLine two end");
    }

    #[test]
    fn test_normalize_unescapes_entities() {
        assert_eq!(normalize("Fish &amp; Chips &lt;3"), "Fish & Chips <3");
    }

    #[test]
    fn test_normalize_keeps_code_fences() {
        let md = "```\nlet  x =   1;\n```";
        assert_eq!(normalize(md), md);
    }

    #[test]
    fn test_builtin_converter() {
        let html = r#"<h1>Title</h1><p>Hello <strong>world</strong> and <a href="https://e.com/x">a link</a>.</p>
            <ul><li>one</li><li>two</li></ul><img src="https://e.com/a.jpg" alt="cat">"#;
        let md = MarkdownConverter::with_backend(Backend::Builtin)
            .convert(html)
            .unwrap();
        assert!(md.starts_with("# Title"));
        assert!(md.contains("Hello **world** and [a link](https://e.com/x)."));
        assert!(md.contains("- one\n"));
        assert!(md.contains("![cat](https://e.com/a.jpg)"));
    }

    #[test]
    fn test_builtin_code_block() {
        let html = "<pre><code>fn main() {\n    println!(\"&lt;hi&gt;\");\n}</code></pre>";
        let md = MarkdownConverter::with_backend(Backend::Builtin)
            .convert(html)
            .unwrap();
        assert!(md.starts_with("```\nfn main() {\n    println!(\"<hi>\");"));
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(Backend::select("builtin"), Backend::Builtin);
        assert_eq!(Backend::select("auto"), Backend::available()[0]);
        assert_eq!(Backend::select("nonsense"), Backend::available()[0]);
        assert!("HTMD".parse::<Backend>().is_ok());
    }

    #[cfg(feature = "htmd")]
    #[test]
    fn test_htmd_backend_output_is_normalized() {
        let md = MarkdownConverter::with_backend(Backend::Htmd)
            .convert("<p>A</p><div></div><p>B &amp; C</p>")
            .unwrap();
        assert_eq!(md, "A\n\nB & C");
    }
}
