use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::{TrackerError, TrackerResult};
use crate::matcher::Matcher;
use crate::models::{JobPosting, JobSource, MatchResult};
use crate::notify::Notifier;
use crate::scrape::Scraper;

pub struct Collaborators<'a> {
    pub scraper: &'a dyn Scraper,
    pub matcher: &'a dyn Matcher,
    pub notifier: &'a dyn Notifier,
}

#[derive(Debug, Clone, Copy)]
pub struct CycleOptions {
    pub now: DateTime<Utc>,
    pub interval: chrono::Duration,
    /// Evaluate only: no notifications, no timestamps written.
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub sources_due: usize,
    pub sources_checked: usize,
    pub sources_failed: usize,
    pub postings_seen: usize,
    pub notify_failures: usize,
    pub matches: Vec<(JobPosting, MatchResult)>,
}

#[derive(Debug, Default)]
struct SourceOutcome {
    postings: usize,
    notify_failures: usize,
    matches: Vec<(JobPosting, MatchResult)>,
}

/// Runs one check cycle over every due source, one source at a time.
///
/// Only listing the due sources can fail the whole cycle. A source whose
/// scrape fails is logged, left unmarked, and retried next cycle.
pub fn run_cycle(
    db: &Database,
    collab: &Collaborators,
    resume: &str,
    opts: &CycleOptions,
) -> TrackerResult<CycleReport> {
    let due = db.due_sources(opts.now, opts.interval)?;
    let mut report = CycleReport { sources_due: due.len(), ..Default::default() };
    tracing::info!(due = due.len(), dry_run = opts.dry_run, "starting check cycle");

    for source in &due {
        let outcome = match check_source(collab, source, resume, opts.dry_run) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(source_id = source.id, url = %source.url, error = %e, "source check failed");
                report.sources_failed += 1;
                continue;
            }
        };

        report.postings_seen += outcome.postings;
        report.notify_failures += outcome.notify_failures;
        report.matches.extend(outcome.matches);

        if opts.dry_run {
            report.sources_checked += 1;
            continue;
        }

        match db.mark_checked(source.id, opts.now) {
            Ok(()) => report.sources_checked += 1,
            Err(TrackerError::NotFound { id }) => {
                tracing::warn!(source_id = id, url = %source.url, "source removed during cycle, skipping");
            }
            Err(e) => {
                tracing::error!(source_id = source.id, error = %e, "failed to record check");
                report.sources_failed += 1;
            }
        }
    }

    tracing::info!(
        checked = report.sources_checked,
        failed = report.sources_failed,
        postings = report.postings_seen,
        matches = report.matches.len(),
        "check cycle finished"
    );
    Ok(report)
}

fn check_source(
    collab: &Collaborators,
    source: &JobSource,
    resume: &str,
    dry_run: bool,
) -> Result<SourceOutcome> {
    tracing::info!(source_id = source.id, url = %source.url, "scraping job source");
    let postings = collab.scraper.scrape_listings(&source.url)?;
    let mut outcome = SourceOutcome { postings: postings.len(), ..Default::default() };

    for posting in postings {
        let text = collab.scraper.fetch_content(&posting.url).unwrap_or_else(|e| {
            tracing::warn!(url = %posting.url, error = %e, "could not fetch posting, using placeholder");
            format!("Could not retrieve job details from {}", posting.url)
        });

        let result = collab.matcher.evaluate(resume, &posting, &text);
        if !result.counts_as_match() {
            continue;
        }

        if !dry_run {
            if let Err(e) = collab.notifier.send_match(&posting, &result) {
                tracing::warn!(url = %posting.url, error = %e, "notification failed");
                outcome.notify_failures += 1;
            }
        }
        outcome.matches.push((posting, result));
    }

    Ok(outcome)
}
