//! Replace remote media URLs in converted text with local paths

use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome of a rewrite pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteResult {
    pub text: String,
    /// Assets with at least one replaced occurrence
    pub rewritten: usize,
    /// Assets that were not found in the text
    pub unmatched: Vec<String>,
}

/// Rewrite every occurrence of each remote URL to its local path.
///
/// Contextual forms are tried first: Markdown destinations, quoted `src`,
/// lazy-load attributes. Anything left over is replaced as a raw substring.
/// The `&amp;`-escaped spelling and the backslash-escaped parentheses that
/// Markdown writers emit inside destinations are handled as well.
pub fn rewrite_links(text: &str, rewrites: &HashMap<String, String>) -> RewriteResult {
    // Longer URLs first so one URL that prefixes another cannot clobber it
    let mut pairs: Vec<(&String, &String)> = rewrites.iter().collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut text = text.to_string();
    let mut rewritten = 0;
    let mut unmatched = Vec::new();

    for (remote, local) in pairs {
        let spellings = spellings_of(remote);

        let mut hits = 0;
        for spelling in &spellings {
            hits += replace_contextual(&mut text, spelling, local);
        }
        for spelling in &spellings {
            if text.contains(spelling.as_str()) {
                hits += text.matches(spelling.as_str()).count();
                text = text.replace(spelling.as_str(), local);
            }
        }

        if hits > 0 {
            debug!("Rewrote {} occurrence(s) of {}", hits, remote);
            rewritten += 1;
        } else {
            warn!("Downloaded asset not referenced in text: {}", remote);
            unmatched.push(remote.clone());
        }
    }

    RewriteResult {
        text,
        rewritten,
        unmatched,
    }
}

/// The URL as written, plus its HTML-escaped and Markdown-escaped forms
fn spellings_of(remote: &str) -> Vec<String> {
    let mut spellings = vec![remote.to_string()];
    let amp = remote.replace('&', "&amp;");
    for base in [remote.to_string(), amp] {
        let parens = base.replace('(', "\\(").replace(')', "\\)");
        for spelling in [base, parens] {
            if !spellings.contains(&spelling) {
                spellings.push(spelling);
            }
        }
    }
    spellings
}

fn replace_contextual(text: &mut String, url: &str, local: &str) -> usize {
    let forms: [(String, String); 8] = [
        (format!("]({})", url), format!("]({})", local)),
        (format!("]({} \"", url), format!("]({} \"", local)),
        (format!("](<{}>)", url), format!("]({})", local)),
        (format!("](<{}> \"", url), format!("]({} \"", local)),
        (format!("src=\"{}\"", url), format!("src=\"{}\"", local)),
        (format!("src='{}'", url), format!("src='{}'", local)),
        (format!("data-src=\"{}\"", url), format!("data-src=\"{}\"", local)),
        (
            format!("data-original=\"{}\"", url),
            format!("data-original=\"{}\"", local),
        ),
    ];

    let mut hits = 0;
    for (from, to) in &forms {
        let count = text.matches(from.as_str()).count();
        if count > 0 {
            *text = text.replace(from.as_str(), to);
            hits += count;
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_markdown_and_attribute_forms() {
        let text = "![a](https://e.com/a.jpg)\n[t](https://e.com/a.jpg \"title\")\n<img src='https://e.com/a.jpg'>";
        let result = rewrite_links(text, &map(&[("https://e.com/a.jpg", "media/a_1.jpg")]));
        assert_eq!(
            result.text,
            "![a](media/a_1.jpg)\n[t](media/a_1.jpg \"title\")\n<img src='media/a_1.jpg'>"
        );
        assert_eq!(result.rewritten, 1);
        assert!(result.unmatched.is_empty());
    }

    #[test]
    fn test_escaped_ampersand_form() {
        let text = "![x](https://e.com/i?a=1&amp;b=2)";
        let result = rewrite_links(text, &map(&[("https://e.com/i?a=1&b=2", "media/i_2.jpg")]));
        assert_eq!(result.text, "![x](media/i_2.jpg)");
    }

    #[test]
    fn test_parenthesized_urls() {
        let rewrites = map(&[("https://e.com/post/a%20(1).jpg", "media/a_20_1__9f.jpg")]);

        let escaped = rewrite_links("![](https://e.com/post/a%20\\(1\\).jpg)", &rewrites);
        assert_eq!(escaped.text, "![](media/a_20_1__9f.jpg)");
        assert_eq!(escaped.rewritten, 1);

        let angled = rewrite_links("![](<https://e.com/post/a%20(1).jpg>)", &rewrites);
        assert_eq!(angled.text, "![](media/a_20_1__9f.jpg)");
        assert!(angled.unmatched.is_empty());
    }

    #[test]
    fn test_prefix_urls_do_not_collide() {
        let text = "![](https://e.com/a.jpg) ![](https://e.com/a.jpg?large)";
        let result = rewrite_links(
            text,
            &map(&[
                ("https://e.com/a.jpg", "media/a_1.jpg"),
                ("https://e.com/a.jpg?large", "media/a_2.jpg"),
            ]),
        );
        assert_eq!(result.text, "![](media/a_1.jpg) ![](media/a_2.jpg)");
        assert_eq!(result.rewritten, 2);
    }

    #[test]
    fn test_unmatched_is_reported() {
        let result = rewrite_links("no media here", &map(&[("https://e.com/z.png", "media/z.png")]));
        assert_eq!(result.text, "no media here");
        assert_eq!(result.rewritten, 0);
        assert_eq!(result.unmatched, vec!["https://e.com/z.png".to_string()]);
    }
}
