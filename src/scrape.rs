use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::ai::{AIProvider, strip_code_fences};
use crate::models::JobPosting;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const FIRECRAWL_SCRAPE_URL: &str = "https://api.firecrawl.dev/v1/scrape";
const LISTING_PAGE_CHARS: usize = 15_000;
const USER_AGENT: &str = concat!("careerwatch/", env!("CARGO_PKG_VERSION"));

/// Fetches career pages and turns them into postings.
pub trait Scraper {
    fn scrape_listings(&self, source_url: &str) -> Result<Vec<JobPosting>>;
    fn fetch_content(&self, url: &str) -> Result<String>;
}

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

// --- Firecrawl ---

#[derive(Debug, Serialize)]
struct FirecrawlRequest<'a> {
    url: &'a str,
    formats: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct FirecrawlData {
    #[serde(default)]
    markdown: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FirecrawlResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<FirecrawlData>,
    #[serde(default)]
    error: Option<String>,
}

/// Scrapes pages to markdown through Firecrawl and lets the model pick out listings.
pub struct FirecrawlScraper<'a> {
    api_key: String,
    client: reqwest::blocking::Client,
    provider: &'a dyn AIProvider,
}

impl<'a> FirecrawlScraper<'a> {
    pub fn new(api_key: String, provider: &'a dyn AIProvider) -> Result<Self> {
        Ok(Self { api_key, client: http_client()?, provider })
    }
}

impl Scraper for FirecrawlScraper<'_> {
    fn scrape_listings(&self, source_url: &str) -> Result<Vec<JobPosting>> {
        let markdown = self.fetch_content(source_url)?;
        let page: String = markdown.chars().take(LISTING_PAGE_CHARS).collect();

        let prompt = format!(
            "Extract all individual job listings from this job board page.\n\
            For each job, provide:\n\
            1. Job title\n\
            2. Company name\n\
            3. Job URL (if available, or construct it from the job ID and base URL)\n\n\
            Job Board Content:\n{}\n\n\
            Return the results as a JSON array of objects with fields: title, company, url\n\
            Example: [{{\"title\": \"Senior Software Engineer\", \"company\": \"Acme Corp\", \
            \"url\": \"https://example.com/jobs/12345\"}}]",
            page
        );

        let response = self
            .provider
            .complete(None, &prompt, 4096)
            .with_context(|| format!("Listing extraction failed for {}", source_url))?;

        let postings = parse_listings(&response, source_url);
        tracing::info!(url = source_url, count = postings.len(), "extracted job listings");
        Ok(postings)
    }

    fn fetch_content(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .post(FIRECRAWL_SCRAPE_URL)
            .bearer_auth(&self.api_key)
            .json(&FirecrawlRequest { url, formats: ["markdown"] })
            .send()
            .with_context(|| format!("Failed to send Firecrawl request for {}", url))?;

        let status = response.status();
        let body: FirecrawlResponse = response
            .json()
            .with_context(|| format!("Failed to parse Firecrawl response for {}", url))?;

        if !status.is_success() || !body.success {
            return Err(anyhow!(
                "Firecrawl scrape of {} failed ({}): {}",
                url,
                status,
                body.error.unwrap_or_default()
            ));
        }

        body.data
            .and_then(|d| d.markdown)
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| anyhow!("Firecrawl returned no markdown for {}", url))
    }
}

// --- Plain HTTP ---

/// Fetches pages directly and reads listings out of the page's links.
pub struct DirectScraper {
    client: reqwest::blocking::Client,
}

impl DirectScraper {
    pub fn new() -> Result<Self> {
        Ok(Self { client: http_client()? })
    }

    fn get_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to fetch {}", url))?;
        if !response.status().is_success() {
            return Err(anyhow!("Fetching {} failed with status {}", url, response.status()));
        }
        response.text().with_context(|| format!("Failed to read body of {}", url))
    }
}

impl Scraper for DirectScraper {
    fn scrape_listings(&self, source_url: &str) -> Result<Vec<JobPosting>> {
        let html = self.get_html(source_url)?;
        let postings = extract_link_listings(&html, source_url);
        tracing::info!(url = source_url, count = postings.len(), "extracted job links");
        Ok(postings)
    }

    fn fetch_content(&self, url: &str) -> Result<String> {
        let html = self.get_html(url)?;
        let text = visible_text(&html);
        if text.is_empty() {
            return Err(anyhow!("No text content found at {}", url));
        }
        Ok(text)
    }
}

// --- Listing extraction ---

#[derive(Debug, Deserialize)]
struct RawListing {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Turns the model's JSON array into postings. Unparseable output yields a
/// single placeholder posting for the whole page.
pub fn parse_listings(model_output: &str, source_url: &str) -> Vec<JobPosting> {
    let cleaned = strip_code_fences(model_output);
    let listings: Vec<RawListing> = match serde_json::from_str(cleaned) {
        Ok(listings) => listings,
        Err(e) => {
            tracing::warn!(url = source_url, error = %e, "could not parse job listings JSON");
            let company = company_from_url(source_url);
            return vec![JobPosting {
                title: format!("Jobs at {}", company),
                company,
                url: source_url.to_string(),
            }];
        }
    };

    listings
        .into_iter()
        .map(|raw| {
            let company = non_empty(raw.company).unwrap_or_else(|| "Unknown Company".to_string());
            let title = non_empty(raw.title).unwrap_or_else(|| format!("Job at {}", company));
            let url = non_empty(raw.url)
                .map(|href| resolve_url(source_url, &href))
                .unwrap_or_else(|| source_url.to_string());
            JobPosting { title, company, url }
        })
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Makes `href` absolute against the page it came from.
pub fn resolve_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| base.to_string())
}

/// "https://careers.acme.com/x" -> "Acme"
pub fn company_from_url(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string());
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let label = match labels.len() {
        0 => return "Unknown Company".to_string(),
        1 => labels[0],
        n => labels[n - 2],
    };
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => "Unknown Company".to_string(),
    }
}

const JOB_LINK_HINTS: &[&str] = &[
    "/job", "/jobs/", "/careers/", "/position", "/opening", "/vacanc", "/role",
    "greenhouse.io", "lever.co", "ashbyhq.com", "myworkdayjobs.com", "smartrecruiters.com",
];

fn extract_link_listings(html: &str, source_url: &str) -> Vec<JobPosting> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let company = company_from_url(source_url);
    let source_trimmed = source_url.trim_end_matches('/');

    let mut seen: HashSet<String> = HashSet::new();
    let mut postings = Vec::new();

    for element in document.select(&selector) {
        let href = element.value().attr("href").unwrap_or("").trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("mailto:")
            || href.starts_with("javascript:")
        {
            continue;
        }

        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() || is_navigation_artifact(&text) {
            continue;
        }

        let url = resolve_url(source_url, href);
        let lower = url.to_lowercase();
        if url.trim_end_matches('/') == source_trimmed
            || !JOB_LINK_HINTS.iter().any(|hint| lower.contains(hint))
        {
            continue;
        }

        if seen.insert(url.clone()) {
            postings.push(JobPosting { title: text, company: company.clone(), url });
        }
    }

    postings
}

fn is_navigation_artifact(text: &str) -> bool {
    let text_lower = text.to_lowercase();
    let text_trimmed = text.trim();

    if text_trimmed.len() < 5 {
        return true;
    }

    let artifacts = [
        "apply", "apply now", "view job", "view all", "view all jobs", "see all jobs",
        "search jobs", "learn more", "read more", "careers", "jobs", "sign in", "log in",
    ];
    if artifacts.iter().any(|a| text_lower == *a) {
        return true;
    }

    if text_lower.starts_with("jobs in ")
        || text_lower.starts_with("back to")
        || text_lower.contains("privacy")
        || text_lower.contains("cookie")
    {
        return true;
    }

    // "Engineering jobs" style links point at filtered searches, not postings
    text_lower.ends_with(" jobs")
}

fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next())
        .unwrap_or_else(|| document.root_element());

    let mut lines = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        if hidden {
            continue;
        }
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}
