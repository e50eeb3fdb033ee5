use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSource {
    pub id: i64,
    pub url: String,
    pub last_checked: Option<DateTime<Utc>>, // None = never checked
}

/// A single posting scraped from a job source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub company: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(default)]
    pub is_match: bool,
    #[serde(default, deserialize_with = "de_percentage")]
    pub match_percentage: Option<u8>,
    #[serde(default)]
    pub matching_skills: Vec<String>,
    #[serde(default)]
    pub missing_skills: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

/// Structured reading of a resume, produced once and reused for every posting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResumeProfile {
    #[serde(default)]
    pub explicit_skills: Vec<String>,
    #[serde(default)]
    pub inferred_skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<String>,
    #[serde(default)]
    pub education: Vec<String>,
    #[serde(default = "unknown_years", deserialize_with = "de_years")]
    pub years_of_experience: String,
    #[serde(default)]
    pub project_types: Vec<String>,
}

fn unknown_years() -> String {
    "Unknown".to_string()
}

// Years come back as a number, a string like "5+", or null.
fn de_years<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => unknown_years(),
    })
}

impl MatchResult {
    /// A result counts as a match when the model says so or scores it at 50 or above.
    pub fn counts_as_match(&self) -> bool {
        self.is_match || self.match_percentage.is_some_and(|p| p >= 50)
    }
}

// Models return percentages as ints, floats, or numeric strings.
fn de_percentage<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let number = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.map(|n| n.clamp(0.0, 100.0).round() as u8))
}
