use anyhow::{Context, Result, anyhow};
use std::path::Path;

use crate::scrape::Scraper;

const MIN_RESUME_CHARS: usize = 100;

/// Loads resume text from a local file or from a URL via the scraper.
pub fn load_resume(location: &str, scraper: &dyn Scraper) -> Result<String> {
    let location = location.trim();
    let raw = if location.starts_with("http://") || location.starts_with("https://") {
        let url = normalize_resume_url(location);
        tracing::info!(%url, "fetching resume");
        scraper
            .fetch_content(&url)
            .with_context(|| format!("Failed to fetch resume from {}", url))?
    } else {
        let path = Path::new(location);
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read resume file: {}", path.display()))?
    };

    let content = clean_resume_text(&raw);
    let chars = content.chars().count();
    if chars < MIN_RESUME_CHARS || content.starts_with("%PDF") {
        return Err(anyhow!(
            "Resume content from {} is empty, too short, or raw PDF data ({} characters)",
            location,
            chars
        ));
    }
    tracing::info!(chars, "resume loaded");
    Ok(content)
}

/// Rewrites Google Drive share links to their direct download form.
pub fn normalize_resume_url(url: &str) -> String {
    if !url.contains("drive.google.com") {
        return url.to_string();
    }

    let file_id = if let Some((_, rest)) = url.split_once("/file/d/") {
        rest.split('/').next()
    } else if let Some((_, rest)) = url.split_once("id=") {
        rest.split('&').next()
    } else {
        None
    };

    match file_id.filter(|id| !id.is_empty()) {
        Some(id) => format!("https://drive.google.com/uc?export=download&id={}", id),
        None if url.contains("/view") => url.replace("/view", "/preview"),
        None => url.to_string(),
    }
}

pub fn clean_resume_text(raw: &str) -> String {
    raw.replace('\u{00a0}', " ")
        .replace('\u{2022}', "- ")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobPosting;
    use std::cell::RefCell;

    struct FakeScraper {
        body: String,
        requested: RefCell<Vec<String>>,
    }

    impl Scraper for FakeScraper {
        fn scrape_listings(&self, _source_url: &str) -> Result<Vec<JobPosting>> {
            Ok(Vec::new())
        }

        fn fetch_content(&self, url: &str) -> Result<String> {
            self.requested.borrow_mut().push(url.to_string());
            Ok(self.body.clone())
        }
    }

    #[test]
    fn test_normalize_drive_file_link() {
        assert_eq!(
            normalize_resume_url("https://drive.google.com/file/d/AbC123/view?usp=sharing"),
            "https://drive.google.com/uc?export=download&id=AbC123"
        );
    }

    #[test]
    fn test_normalize_drive_open_link() {
        assert_eq!(
            normalize_resume_url("https://drive.google.com/open?id=XyZ&authuser=0"),
            "https://drive.google.com/uc?export=download&id=XyZ"
        );
    }

    #[test]
    fn test_normalize_drive_without_id() {
        assert_eq!(
            normalize_resume_url("https://drive.google.com/drive/folders/view"),
            "https://drive.google.com/drive/folders/preview"
        );
        assert_eq!(
            normalize_resume_url("https://example.com/resume.pdf"),
            "https://example.com/resume.pdf"
        );
    }

    #[test]
    fn test_clean_resume_text() {
        let raw = "  Jane Doe\u{00a0}Engineer  \n\u{2022}Rust\n\t\u{2022} Go  ";
        assert_eq!(clean_resume_text(raw), "Jane Doe Engineer\n- Rust\n-  Go");
    }

    #[test]
    fn test_load_resume_from_url_uses_scraper() {
        let scraper = FakeScraper {
            body: "Experienced engineer. ".repeat(10),
            requested: RefCell::new(Vec::new()),
        };
        let text = load_resume("https://drive.google.com/file/d/F1/view", &scraper).unwrap();

        assert!(text.starts_with("Experienced engineer."));
        assert_eq!(
            scraper.requested.borrow().as_slice(),
            ["https://drive.google.com/uc?export=download&id=F1".to_string()]
        );
    }

    #[test]
    fn test_load_resume_rejects_short_or_pdf() {
        let short = FakeScraper { body: "too short".into(), requested: RefCell::new(Vec::new()) };
        assert!(load_resume("https://example.com/r.pdf", &short).is_err());

        let pdf = FakeScraper {
            body: format!("%PDF-1.7 {}", "x".repeat(200)),
            requested: RefCell::new(Vec::new()),
        };
        assert!(load_resume("https://example.com/r.pdf", &pdf).is_err());
    }

    #[test]
    fn test_load_resume_minimum_counts_characters() {
        // 60 characters, 120 bytes
        let accented = FakeScraper { body: "é".repeat(60), requested: RefCell::new(Vec::new()) };
        assert!(load_resume("https://example.com/r.txt", &accented).is_err());

        let enough = FakeScraper { body: "é".repeat(100), requested: RefCell::new(Vec::new()) };
        assert_eq!(load_resume("https://example.com/r.txt", &enough).unwrap().chars().count(), 100);
    }

    #[test]
    fn test_load_resume_missing_file() {
        let scraper = FakeScraper { body: String::new(), requested: RefCell::new(Vec::new()) };
        let err = load_resume("/nonexistent/resume.md", &scraper).unwrap_err();
        assert!(err.to_string().contains("Failed to read resume file"));
    }
}
