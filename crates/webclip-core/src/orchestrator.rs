//! Batch orchestration
//!
//! Each request moves through
//! `INTAKE → FETCH → SHELL_CHECK → (DYNAMIC_FALLBACK) → CLEAN → CONVERT →
//! MEDIA_DOWNLOAD → REWRITE → PERSIST`, with `Always` routes going from
//! intake straight to the dynamic fallback. Every stage runs under the
//! request's [`Deadline`]; a stage that finds the budget spent is not started.
//! Requests run one after another so output order follows input order.

use crate::budget::Deadline;
use crate::clean;
use crate::config::Settings;
use crate::dedup::{BatchInput, Deduper};
use crate::dynamic::{self, Route, Router, Trigger};
use crate::extract;
use crate::failure::{Failure, FailureCode, FailureRecord, Stage};
use crate::fetch::Fetcher;
use crate::markdown::MarkdownConverter;
use crate::media::{self, MediaDownloader};
use crate::persist::{self, DocumentHeader, OutputWriter};
use crate::rewrite;
use crate::shell::{ShellDetector, ShellVerdict};
use crate::{ContentRequest, ExtractedContent, MediaAsset, Origin, OutputDocument, Result};
use chrono::Local;
use std::path::PathBuf;
use tracing::{info, warn};
use url::Url;

/// Terminal state of one input URL
#[derive(Debug, Clone)]
pub enum Outcome {
    Done {
        url: String,
        document: OutputDocument,
        media: Vec<MediaAsset>,
        /// Media that failed and kept its remote URL
        media_failures: usize,
    },
    Failed(FailureRecord),
    Skipped {
        url: String,
        duplicate_of: String,
    },
}

impl Outcome {
    pub fn url(&self) -> &str {
        match self {
            Outcome::Done { url, .. } => url,
            Outcome::Failed(record) => &record.url,
            Outcome::Skipped { url, .. } => url,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done { .. })
    }
}

/// Summary of a batch run
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One outcome per input URL, in input order
    pub outcomes: Vec<Outcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Manual-review record, when there was anything to review
    pub review_path: Option<PathBuf>,
}

impl BatchReport {
    fn push(&mut self, outcome: Outcome) {
        match &outcome {
            Outcome::Done { .. } => self.succeeded += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailureRecord> {
        self.outcomes.iter().filter_map(|o| match o {
            Outcome::Failed(record) => Some(record),
            _ => None,
        })
    }
}

struct Archived {
    document: OutputDocument,
    media: Vec<MediaAsset>,
    media_failures: usize,
}

/// Runs batches of URLs through the pipeline
pub struct Orchestrator {
    settings: Settings,
    fetcher: Fetcher,
    shell: ShellDetector,
    router: Router,
    converter: MarkdownConverter,
    downloader: MediaDownloader,
    writer: OutputWriter,
}

impl Orchestrator {
    /// Build with an explicit routing table
    pub fn new(settings: Settings, routes: Vec<Route>) -> Result<Self> {
        let fetcher = Fetcher::new(settings.fetch.clone())?;
        Ok(Self::assemble(settings, fetcher, routes))
    }

    /// Build with the built-in routing table
    pub fn with_default_routes(settings: Settings) -> Result<Self> {
        let fetcher = Fetcher::new(settings.fetch.clone())?;
        let routes = dynamic::default_routes(&settings, fetcher.client().clone());
        Ok(Self::assemble(settings, fetcher, routes))
    }

    fn assemble(settings: Settings, fetcher: Fetcher, routes: Vec<Route>) -> Self {
        let output_dir = settings.general.output_dir.clone();
        Self {
            shell: ShellDetector::new(settings.shell.clone()),
            router: Router::new(routes),
            converter: MarkdownConverter::new(&settings.general.converter),
            downloader: MediaDownloader::new(
                fetcher.client().clone(),
                settings.media.clone(),
                &output_dir,
            ),
            writer: OutputWriter::new(output_dir),
            fetcher,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Parse batch text and run it
    pub async fn run_batch(&self, input: &str) -> BatchReport {
        self.run_input(BatchInput::parse(input), None).await
    }

    /// Run parsed input. `output_name` applies only when the batch holds a
    /// single URL.
    pub async fn run_input(&self, input: BatchInput, output_name: Option<String>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut deduper = Deduper::new(self.settings.dedup.clone());
        let output_name = output_name.filter(|_| input.urls.len() == 1);

        info!(
            "Batch of {} URL(s) and {} note(s)",
            input.urls.len(),
            input.notes.len()
        );

        for raw in &input.urls {
            let url = match Url::parse(raw) {
                Ok(url) => url,
                Err(e) => {
                    let failure = Failure::new(
                        FailureCode::FetchFailed,
                        Stage::Intake,
                        format!("invalid URL: {}", e),
                    );
                    warn!(url = %raw, "{}", failure);
                    report.push(Outcome::Failed(failure.into_record(raw)));
                    continue;
                }
            };

            if let Err(first) = deduper.admit(&url) {
                info!(url = %raw, "Skipping duplicate of {}", first);
                report.push(Outcome::Skipped {
                    url: raw.clone(),
                    duplicate_of: first,
                });
                continue;
            }

            let request = ContentRequest {
                url,
                output_name: output_name.clone(),
                download_media: self.settings.general.download_media,
                deadline: Deadline::after(self.settings.budget()),
            };
            report.push(self.run_request(raw, request).await);
        }

        let failures: Vec<FailureRecord> = report.failures().cloned().collect();
        match persist::write_review_record(
            &self.settings.general.output_dir,
            &input.notes,
            &failures,
            Local::now(),
        ) {
            Ok(path) => report.review_path = path,
            Err(e) => warn!("Could not write manual review record: {}", e),
        }

        info!(
            "Batch finished: {} succeeded, {} failed, {} skipped",
            report.succeeded, report.failed, report.skipped
        );
        report
    }

    async fn run_request(&self, raw: &str, request: ContentRequest) -> Outcome {
        match self.process(request).await {
            Ok(archived) => {
                info!(url = %raw, "Saved {:?}", archived.document.path);
                Outcome::Done {
                    url: raw.to_string(),
                    document: archived.document,
                    media: archived.media,
                    media_failures: archived.media_failures,
                }
            }
            Err(failure) => {
                warn!(url = %raw, code = %failure.code, stage = %failure.stage, "{}", failure.message);
                Outcome::Failed(failure.into_record(raw))
            }
        }
    }

    /// Process one request through every stage
    async fn process(&self, request: ContentRequest) -> std::result::Result<Archived, Failure> {
        let deadline = request.deadline;
        let url = request.url.clone();

        // INTAKE → DYNAMIC_FALLBACK | FETCH → SHELL_CHECK
        let (content, base) = if self.router.has_always_route(&url) {
            (self.dynamic(&url, Trigger::Always, deadline).await?, url.clone())
        } else {
            self.fetch_static(&url, deadline).await?
        };

        // CLEAN
        let min_region = self.settings.clean.min_region_chars;
        let html = content.html.clone();
        let clean_base = base.clone();
        let (cleaned, media_urls) = deadline
            .run_blocking(Stage::Clean, move || {
                let cleaned = clean::clean(&html, &clean_base, min_region)?;
                let media_urls = media::enumerate_media(&cleaned, &clean_base);
                Ok((cleaned, media_urls))
            })
            .await?;

        // CONVERT
        let converter = self.converter;
        let body = deadline
            .run_blocking(Stage::Convert, move || converter.convert(&cleaned))
            .await?;
        let visible = body.chars().filter(|c| !c.is_whitespace()).count();
        if visible < self.settings.general.min_body_chars.max(1) {
            return Err(Failure::new(
                FailureCode::ContentEmpty,
                Stage::Convert,
                format!("converted body has {} visible characters", visible),
            ));
        }

        // MEDIA_DOWNLOAD
        let mut report = if request.download_media && !media_urls.is_empty() {
            let downloader = self.downloader.clone();
            let referer = base.clone();
            deadline
                .run(Stage::MediaDownload, async move {
                    Ok(downloader.download_all(&media_urls, Some(&referer)).await)
                })
                .await?
        } else {
            media::MediaReport::default()
        };

        // REWRITE
        let rewrites = std::mem::take(&mut report.rewrites);
        let rewritten = deadline
            .run_blocking(Stage::Rewrite, move || Ok(rewrite::rewrite_links(&body, &rewrites)))
            .await?;
        if !rewritten.unmatched.is_empty() {
            warn!(
                "{} downloaded asset(s) not referenced in the converted text",
                rewritten.unmatched.len()
            );
        }

        // PERSIST
        let title = content
            .title
            .clone()
            .or_else(|| extract::title_from_body(&rewritten.text))
            .unwrap_or_else(|| url.host_str().unwrap_or("untitled").to_string());
        let header = DocumentHeader {
            title: Some(&title),
            source_url: url.as_str(),
            description: content.description.as_deref(),
            author: content.author.as_deref(),
            published: content.publish_time.as_deref(),
        };
        let markdown = persist::build_document(
            &header,
            &rewritten.text,
            Local::now(),
            self.settings.general.include_title,
        );

        let stem = persist::sanitize_filename(request.output_name.as_deref().unwrap_or(&title));
        let writer = self.writer.clone();
        let text = markdown.clone();
        let path = deadline
            .run_blocking(Stage::Persist, move || {
                writer
                    .write_new(&stem, "md", &text)
                    .map_err(|e| Failure::convert(Stage::Persist, format!("write failed: {}", e)))
            })
            .await?;

        Ok(Archived {
            document: OutputDocument { markdown, path },
            media: report.assets,
            media_failures: report.failed.len(),
        })
    }

    /// FETCH then SHELL_CHECK, falling back to `OnShell` routes for shells
    async fn fetch_static(
        &self,
        url: &Url,
        deadline: Deadline,
    ) -> std::result::Result<(ExtractedContent, Url), Failure> {
        let fetcher = self.fetcher.clone();
        let target = url.clone();
        let page = deadline
            .run(Stage::Fetch, async move { fetcher.fetch(&target).await })
            .await?;

        let shell = self.shell.clone();
        let html = page.html.clone();
        let verdict = deadline
            .run_blocking(Stage::ShellCheck, move || Ok(shell.classify(&html)))
            .await?;

        match verdict {
            ShellVerdict::RealContent => {
                let meta = extract::extract_meta(&page.html);
                let content = ExtractedContent {
                    html: page.html,
                    title: meta.title,
                    description: meta.description,
                    author: meta.author,
                    publish_time: meta.publish_time,
                    origin: Origin::Static,
                };
                Ok((content, page.final_url))
            }
            ShellVerdict::JsShell => {
                info!(url = %url, "Page is a client-side shell, trying dynamic fallback");
                let content = self.dynamic(url, Trigger::OnShell, deadline).await?;
                Ok((content, page.final_url))
            }
        }
    }

    async fn dynamic(
        &self,
        url: &Url,
        trigger: Trigger,
        deadline: Deadline,
    ) -> std::result::Result<ExtractedContent, Failure> {
        let router = self.router.clone();
        let target = url.clone();
        deadline
            .run(Stage::DynamicFallback, async move {
                router.resolve(&target, trigger, deadline).await
            })
            .await
    }
}
