//! Per-domain dynamic fallbacks
//!
//! A [`Router`] holds an ordered list of [`Route`]s. Each route pairs a URL
//! predicate with a [`DynamicStrategy`] and says when it applies: before the
//! static fetch ([`Trigger::Always`]) or only once a fetched page turned out
//! to be a client-side shell ([`Trigger::OnShell`]).

pub mod render;
pub mod syndication;

pub use render::HeadlessRenderStrategy;
pub use syndication::SyndicationStrategy;

use crate::budget::Deadline;
use crate::config::Settings;
use crate::failure::{Diagnostic, Failure, FailureCode, Stage};
use crate::ExtractedContent;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Hosts served by the micro-blog routes
pub const MICROBLOG_HOSTS: &[&str] = &["twitter.com", "x.com", "mobile.twitter.com", "mobile.x.com"];

/// A way of obtaining content for pages the static fetch cannot handle
#[async_trait]
pub trait DynamicStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn get_content(&self, url: &Url, deadline: Deadline) -> Result<ExtractedContent, Diagnostic>;
}

/// When a route is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Before the static fetch, which is then skipped
    Always,
    /// After the shell detector flags the fetched page
    OnShell,
}

type Predicate = Arc<dyn Fn(&Url) -> bool + Send + Sync>;

/// One entry of the routing table
#[derive(Clone)]
pub struct Route {
    predicate: Predicate,
    strategy: Arc<dyn DynamicStrategy>,
    trigger: Trigger,
}

impl Route {
    pub fn new<P>(predicate: P, strategy: Arc<dyn DynamicStrategy>, trigger: Trigger) -> Self
    where
        P: Fn(&Url) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            strategy,
            trigger,
        }
    }

    /// Route for a set of domains, each matching itself and its subdomains
    pub fn for_domains(domains: &[&str], strategy: Arc<dyn DynamicStrategy>, trigger: Trigger) -> Self {
        let domains: Vec<String> = domains.iter().map(|d| d.to_ascii_lowercase()).collect();
        Self::new(
            move |url: &Url| {
                url.host_str()
                    .map(|host| domains.iter().any(|d| host_matches(host, d)))
                    .unwrap_or(false)
            },
            strategy,
            trigger,
        )
    }

    pub fn matches(&self, url: &Url) -> bool {
        (self.predicate)(url)
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn strategy(&self) -> &Arc<dyn DynamicStrategy> {
        &self.strategy
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("strategy", &self.strategy.name())
            .field("trigger", &self.trigger)
            .finish()
    }
}

/// `host` is `domain` or one of its subdomains
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Ordered routing table
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Arc<Vec<Route>>,
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: Arc::new(routes),
        }
    }

    /// Whether any `Always` route matches, meaning the static fetch is skipped
    pub fn has_always_route(&self, url: &Url) -> bool {
        self.matching(url, Trigger::Always).next().is_some()
    }

    fn matching<'a>(&'a self, url: &'a Url, trigger: Trigger) -> impl Iterator<Item = &'a Route> + 'a {
        self.routes
            .iter()
            .filter(move |route| route.trigger == trigger && route.matches(url))
    }

    /// Try every matching route in order; the first success wins.
    pub async fn resolve(
        &self,
        url: &Url,
        trigger: Trigger,
        deadline: Deadline,
    ) -> Result<ExtractedContent, Failure> {
        let mut diagnostics = Vec::new();

        for route in self.matching(url, trigger) {
            let name = route.strategy.name();
            if deadline.remaining().is_none() {
                return Err(Failure::timeout(
                    Stage::DynamicFallback,
                    format!("no budget left before {}", name),
                ));
            }
            debug!(strategy = name, "Trying dynamic strategy for {}", url);
            match route.strategy.get_content(url, deadline).await {
                Ok(content) => {
                    info!(strategy = name, "Dynamic strategy succeeded for {}", url);
                    return Ok(content);
                }
                Err(diagnostic) if diagnostic.code == FailureCode::ArticleUnavailable => {
                    info!(strategy = name, "Article unavailable: {}", diagnostic.message);
                    return Err(Failure::new(
                        FailureCode::ArticleUnavailable,
                        Stage::DynamicFallback,
                        format!("{}: {}", name, diagnostic.message),
                    ));
                }
                Err(diagnostic) => {
                    debug!(strategy = name, "Dynamic strategy failed: {}", diagnostic);
                    diagnostics.push((name.to_string(), diagnostic));
                }
            }
        }

        Err(aggregate(&diagnostics))
    }
}

/// Combine the diagnostics of every failed strategy into one failure
pub fn aggregate(diagnostics: &[(String, Diagnostic)]) -> Failure {
    if diagnostics.is_empty() {
        return Failure::new(
            FailureCode::DynamicPageUnresolved,
            Stage::DynamicFallback,
            "no dynamic handler registered for this page",
        );
    }

    let joined = diagnostics
        .iter()
        .map(|(name, d)| format!("{}: {}", name, d.message))
        .collect::<Vec<_>>()
        .join("; ");

    let code = if diagnostics
        .iter()
        .all(|(_, d)| d.code == FailureCode::DynamicHandlerUnavailable)
    {
        FailureCode::DynamicHandlerUnavailable
    } else {
        FailureCode::DynamicPageUnresolved
    };
    Failure::new(code, Stage::DynamicFallback, joined)
}

/// Built-in routing table: micro-blog hosts try the syndication endpoint
/// and then a headless render; toutiao renders directly.
pub fn default_routes(settings: &Settings, client: Client) -> Vec<Route> {
    let syndication: Arc<dyn DynamicStrategy> =
        Arc::new(SyndicationStrategy::new(client, settings.syndication.endpoint.clone()));
    let render: Arc<dyn DynamicStrategy> = Arc::new(HeadlessRenderStrategy::new(
        settings.render.clone(),
        settings.shell.clone(),
    ));

    vec![
        Route::new(
            |url: &Url| url.host_str().map(is_microblog_host).unwrap_or(false),
            syndication,
            Trigger::Always,
        ),
        Route::new(
            |url: &Url| url.host_str().map(is_microblog_host).unwrap_or(false),
            render.clone(),
            Trigger::Always,
        ),
        Route::for_domains(&["toutiao.com"], render, Trigger::Always),
    ]
}

fn is_microblog_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    MICROBLOG_HOSTS.contains(&host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Origin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixed {
        name: &'static str,
        outcome: Result<&'static str, FailureCode>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn ok(name: &'static str, html: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome: Ok(html),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(name: &'static str, code: FailureCode) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome: Err(code),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DynamicStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn get_content(&self, _url: &Url, _deadline: Deadline) -> Result<ExtractedContent, Diagnostic> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Ok(html) => Ok(ExtractedContent {
                    html: html.to_string(),
                    title: None,
                    description: None,
                    author: None,
                    publish_time: None,
                    origin: Origin::HeadlessRender,
                }),
                Err(code) => Err(Failure::new(code, Stage::DynamicFallback, self.name)),
            }
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let failing = Fixed::err("first", FailureCode::DynamicPageUnresolved);
        let winning = Fixed::ok("second", "<p>ok</p>");
        let unused = Fixed::ok("third", "<p>never</p>");
        let router = Router::new(vec![
            Route::for_domains(&["example.com"], failing.clone(), Trigger::OnShell),
            Route::for_domains(&["example.com"], winning.clone(), Trigger::OnShell),
            Route::for_domains(&["example.com"], unused.clone(), Trigger::OnShell),
        ]);
        let content = router
            .resolve(&url("https://www.example.com/a"), Trigger::OnShell, deadline())
            .await
            .unwrap();
        assert_eq!(content.html, "<p>ok</p>");
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(unused.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_article_unavailable_short_circuits() {
        let gone = Fixed::err("gone", FailureCode::ArticleUnavailable);
        let later = Fixed::ok("later", "<p>x</p>");
        let router = Router::new(vec![
            Route::for_domains(&["example.com"], gone, Trigger::OnShell),
            Route::for_domains(&["example.com"], later.clone(), Trigger::OnShell),
        ]);
        let err = router
            .resolve(&url("https://example.com/a"), Trigger::OnShell, deadline())
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::ArticleUnavailable);
        assert_eq!(later.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_matching_route_is_unresolved() {
        let router = Router::new(vec![Route::for_domains(
            &["example.com"],
            Fixed::ok("x", "<p>x</p>"),
            Trigger::OnShell,
        )]);
        let err = router
            .resolve(&url("https://other.org/a"), Trigger::OnShell, deadline())
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::DynamicPageUnresolved);
    }

    #[tokio::test]
    async fn test_trigger_filters_routes() {
        let always = Fixed::ok("always", "<p>x</p>");
        let router = Router::new(vec![Route::for_domains(&["example.com"], always.clone(), Trigger::Always)]);
        let target = url("https://example.com/a");
        assert!(router.has_always_route(&target));
        assert!(router.resolve(&target, Trigger::OnShell, deadline()).await.is_err());
        assert_eq!(always.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_aggregate_all_unavailable() {
        let diag = |code| ("s".to_string(), Failure::new(code, Stage::DynamicFallback, "m"));
        let all = aggregate(&[
            diag(FailureCode::DynamicHandlerUnavailable),
            diag(FailureCode::DynamicHandlerUnavailable),
        ]);
        assert_eq!(all.code, FailureCode::DynamicHandlerUnavailable);

        let mixed = aggregate(&[
            diag(FailureCode::DynamicPageUnresolved),
            diag(FailureCode::DynamicHandlerUnavailable),
        ]);
        assert_eq!(mixed.code, FailureCode::DynamicPageUnresolved);
        assert_eq!(mixed.message, "s: m; s: m");
    }

    #[test]
    fn test_default_routes() {
        let settings = Settings::default();
        let router = Router::new(default_routes(&settings, Client::new()));
        assert!(router.has_always_route(&url("https://x.com/abc/status/1")));
        assert!(router.has_always_route(&url("https://mobile.twitter.com/abc/status/1")));
        assert!(router.has_always_route(&url("https://www.toutiao.com/article/1/")));
        assert!(!router.has_always_route(&url("https://example.com/a")));
        assert!(!router.has_always_route(&url("https://notx.com/a")));
    }
}
