use regex::Regex;
use serde::de::DeserializeOwned;
use std::cell::RefCell;

use crate::ai::{AIProvider, strip_code_fences};
use crate::models::{JobPosting, MatchResult, ResumeProfile};

/// Combined budget for resume plus posting, in estimated tokens.
const MAX_INPUT_TOKENS: usize = 6000;
const TRUNCATION_MARKER: &str = "\n[...content truncated...]\n";

const SYSTEM_PROMPT: &str = "You are an expert job recruiter. Judge candidate fit honestly \
    and answer with JSON only.";

const PROFILE_SYSTEM_PROMPT: &str = "You are an expert resume analyzer with deep knowledge of \
    the tech industry. Answer with JSON only.";

const SKILLS_SECTION_HEADERS: &[&str] = &[
    "SKILLS", "TECHNICAL SKILLS", "TECHNOLOGIES", "CORE COMPETENCIES", "EXPERTISE",
    "PROFICIENCIES", "TECHNICAL EXPERTISE", "TOOLS",
];
const SKILLS_SECTION_TAG: &str = ">>>SKILLS_SECTION<<<";

const TECH_KEYWORDS: &[&str] = &[
    "Python", "JavaScript", "TypeScript", "Java", "C#", "C++", "Go", "Rust", "Ruby", "PHP", "Swift",
    "React", "Angular", "Vue", "Node.js", "Express", "Django", "Flask", "Spring", "ASP.NET",
    "HTML", "CSS", "SASS", "LESS", "Bootstrap", "Tailwind", "Material UI",
    "AWS", "Azure", "GCP", "Firebase", "Heroku", "Netlify", "Vercel",
    "Docker", "Kubernetes", "CI/CD", "Jenkins", "GitHub Actions", "GitLab CI",
    "SQL", "MySQL", "PostgreSQL", "MongoDB", "DynamoDB", "Redis", "Elasticsearch",
    "REST API", "GraphQL", "WebSockets", "gRPC", "Terraform",
    "Git", "GitHub", "GitLab", "Bitbucket",
    "TensorFlow", "PyTorch", "Scikit-learn", "Pandas", "NumPy",
    "Agile", "Scrum", "Kanban", "Jira", "Confluence",
];

// Assumed for any developer when the profile could not be read at all
const FALLBACK_INFERRED_SKILLS: &[&str] = &["Git", "GitHub", "CI/CD", "Agile", "REST APIs"];

/// Decides whether a posting fits the resume.
pub trait Matcher {
    fn evaluate(&self, resume: &str, posting: &JobPosting, posting_text: &str) -> MatchResult;
}

/// Model-backed matcher. The resume is profiled once and the profile is
/// reused for every posting evaluated against that same resume.
pub struct JobMatcher<'a> {
    provider: &'a dyn AIProvider,
    profile: RefCell<Option<(String, ResumeProfile)>>,
}

impl<'a> JobMatcher<'a> {
    pub fn new(provider: &'a dyn AIProvider) -> Self {
        Self { provider, profile: RefCell::new(None) }
    }

    fn profile_for(&self, resume: &str) -> ResumeProfile {
        if let Some((cached_for, profile)) = self.profile.borrow().as_ref() {
            if cached_for == resume {
                return profile.clone();
            }
        }
        let profile = analyze_resume(self.provider, resume);
        *self.profile.borrow_mut() = Some((resume.to_string(), profile.clone()));
        profile
    }

    fn build_prompt(&self, profile: &str, posting: &JobPosting, posting_text: &str) -> String {
        format!(
            "Determine whether this candidate is a good match for this job.\n\n\
            CANDIDATE PROFILE (from resume analysis):\n{profile}\n\n\
            JOB: {title} at {company} ({url})\n\
            JOB POSTING:\n{posting_text}\n\n\
            1. Identify the key skills and requirements of the job posting.\n\
            2. Compare them with both the explicit and the inferred skills of the candidate.\n\
            3. Consider the candidate's project types and experience level.\n\
            4. Focus on core requirements, not every listed technology.\n\
            5. A match percentage of 50 or higher counts as a match.\n\n\
            Return JSON in exactly this shape:\n\
            {{\"is_match\": true/false, \"match_percentage\": 0-100, \
            \"matching_skills\": [...], \"missing_skills\": [...], \"reason\": \"...\"}}",
            title = posting.title,
            company = posting.company,
            url = posting.url,
        )
    }
}

impl Matcher for JobMatcher<'_> {
    fn evaluate(&self, resume: &str, posting: &JobPosting, posting_text: &str) -> MatchResult {
        let profile = self.profile_for(resume);
        let profile = serde_json::to_string_pretty(&profile).unwrap_or_default();
        let (profile, posting_text) = fit_to_budget(&profile, posting_text, MAX_INPUT_TOKENS);
        let prompt = self.build_prompt(&profile, posting, &posting_text);

        match self.provider.complete(Some(SYSTEM_PROMPT), &prompt, 1024) {
            Ok(response) => {
                let result = parse_match_response(&response);
                tracing::debug!(
                    title = %posting.title,
                    is_match = result.counts_as_match(),
                    percentage = ?result.match_percentage,
                    "evaluated posting"
                );
                result
            }
            Err(e) => {
                tracing::warn!(title = %posting.title, error = %e, "match evaluation failed");
                MatchResult {
                    is_match: false,
                    reason: format!("Error evaluating match: {}", e),
                    ..Default::default()
                }
            }
        }
    }
}

/// Asks the model for a structured profile of the resume. Skills fall back
/// to the keyword scan when the model returns none or cannot be read.
pub fn analyze_resume(provider: &dyn AIProvider, resume: &str) -> ResumeProfile {
    let resume = truncate_middle(resume, MAX_INPUT_TOKENS * 4);
    let prompt = build_profile_prompt(&highlight_skill_sections(&resume));

    let parsed = match provider.complete(Some(PROFILE_SYSTEM_PROMPT), &prompt, 2048) {
        Ok(response) => parse_json_object::<ResumeProfile>(&response, r#"\{[^{}]*"ExplicitSkills"[^{}]*\}"#),
        Err(e) => {
            tracing::warn!(error = %e, "resume analysis failed");
            None
        }
    };

    match parsed {
        Some(mut profile) => {
            if profile.explicit_skills.is_empty() {
                tracing::warn!("resume analysis returned no skills, scanning keywords");
                profile.explicit_skills = keyword_skills(&resume).into_iter().map(String::from).collect();
            }
            tracing::info!(
                skills = profile.explicit_skills.len(),
                inferred = profile.inferred_skills.len(),
                "resume profile ready"
            );
            profile
        }
        None => {
            tracing::warn!("could not read resume profile, using keyword scan");
            let mut skills: Vec<String> = keyword_skills(&resume).into_iter().map(String::from).collect();
            if skills.is_empty() {
                skills.push("Unable to parse skills".to_string());
            }
            ResumeProfile {
                explicit_skills: skills,
                inferred_skills: FALLBACK_INFERRED_SKILLS.iter().map(|s| s.to_string()).collect(),
                experience: vec!["Unable to parse experience".to_string()],
                education: vec!["Unable to parse education".to_string()],
                years_of_experience: "Unknown".to_string(),
                project_types: vec!["Software Development".to_string()],
            }
        }
    }
}

fn build_profile_prompt(resume: &str) -> String {
    format!(
        "Extract every skill from this resume.\n\n\
        RESUME:\n{resume}\n\n\
        1. Sections marked {tag} list skills directly.\n\
        2. Look through the whole resume, including project descriptions and work experience.\n\
        3. Include all programming languages, frameworks, tools, platforms and technologies.\n\
        4. Then infer related skills the projects and roles imply \
        (React implies JavaScript, HTML, CSS; AWS implies cloud deployment).\n\n\
        Return JSON in exactly this shape:\n\
        {{\"ExplicitSkills\": [...], \"InferredSkills\": [...], \
        \"Experience\": [\"Company - Title (Period)\", ...], \"Education\": [...], \
        \"YearsOfExperience\": number or \"Unknown\", \"ProjectTypes\": [...]}}",
        tag = SKILLS_SECTION_TAG,
    )
}

/// Tags skills section headers (`SKILLS:`, `Technical Skills:`, ...) so the model weighs them.
pub fn highlight_skill_sections(resume: &str) -> String {
    let mut text = resume.to_string();
    for header in SKILLS_SECTION_HEADERS {
        let title_case = header
            .split(' ')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        for variant in [header.to_string(), title_case] {
            let marker = format!("{}:", variant);
            text = text.replace(&marker, &format!("{} {}", SKILLS_SECTION_TAG, marker));
        }
    }
    text
}

/// Roughly one token per four characters of English.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Keeps the head and tail of `text`, which for resumes and postings hold
/// the most signal.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let half = max_chars / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(total - half).collect();
    format!("{}{}{}", head, TRUNCATION_MARKER, tail)
}

/// Shrinks both inputs by the same factor when together they exceed `max_tokens`.
pub fn fit_to_budget(resume: &str, posting: &str, max_tokens: usize) -> (String, String) {
    let total = estimate_tokens(resume) + estimate_tokens(posting);
    if total <= max_tokens {
        return (resume.to_string(), posting.to_string());
    }

    let factor = max_tokens as f64 / total as f64;
    let resume_chars = (resume.chars().count() as f64 * factor) as usize;
    let posting_chars = (posting.chars().count() as f64 * factor) as usize;
    tracing::debug!(total, max_tokens, "truncating match inputs");

    (truncate_middle(resume, resume_chars), truncate_middle(posting, posting_chars))
}

/// Technologies from a fixed list that appear anywhere in the resume.
pub fn keyword_skills(resume: &str) -> Vec<&'static str> {
    let lower = resume.to_lowercase();
    TECH_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| {
            let kw_lower = kw.to_lowercase();
            // Short names like "Go" or "LESS" must stand alone as a word
            if kw.len() <= 4 && kw.chars().all(char::is_alphanumeric) {
                lower
                    .split(|c: char| !c.is_alphanumeric() && c != '#' && c != '+')
                    .any(|word| word == kw_lower)
            } else {
                lower.contains(&kw_lower)
            }
        })
        .collect()
}

/// Reads a JSON object from a model reply: fences stripped, then the span
/// from the first `{` to the last `}`, then the first match of `pattern`.
fn parse_json_object<T: DeserializeOwned>(content: &str, pattern: &str) -> Option<T> {
    let cleaned = strip_code_fences(content);
    let candidate = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    };

    if let Ok(value) = serde_json::from_str::<T>(candidate) {
        return Some(value);
    }

    let re = Regex::new(pattern).ok()?;
    let found = re.find(content)?;
    serde_json::from_str::<T>(found.as_str()).ok()
}

/// Parses the model's verdict, falling back to progressively looser reads.
pub fn parse_match_response(content: &str) -> MatchResult {
    if let Some(result) =
        parse_json_object::<MatchResult>(content, r#"(?i)\{[^{}]*"is_match"\s*:\s*(true|false)[^{}]*\}"#)
    {
        return result;
    }

    tracing::warn!("could not parse structured match response, using keyword fallback");
    let lower = content.to_lowercase();
    let is_match =
        lower.contains("match") && (lower.contains("good fit") || lower.contains("strong match"));
    MatchResult {
        is_match,
        match_percentage: Some(if is_match { 75 } else { 30 }),
        matching_skills: Vec::new(),
        missing_skills: Vec::new(),
        reason: if is_match {
            "Could not parse structured response. Based on keywords, this appears to be a match."
        } else {
            "Could not parse structured response. Based on keywords, this does not appear to be a match."
        }
        .to_string(),
    }
}
