//! Keyword intent classifier for chat messages.
//!
//! Rules are evaluated in a fixed order and the first one that fires wins:
//!
//! | Order | Rule | Fires when |
//! |-------|------|------------|
//! | 1 | [`Intent::JobApplication`] | a known job title AND an apply keyword both occur |
//! | 2 | [`Intent::Greeting`] | the message is, or starts with, a greeting token |
//! | 3 | [`Intent::GeneralQuery`] | always |
//!
//! Job applications are checked first because they carry more information:
//! "hi, I'd like to apply for the DevOps Engineer job" is routed to the
//! application form rather than the handoff script.
//!
//! When more than one job title occurs in a message, the one that appears
//! earliest wins; equal positions prefer the longer title, then list order.

use serde::Serialize;

/// Greeting tokens, matched case-insensitively as whole message or prefix.
pub const GREETING_TOKENS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hiya",
    "howdy",
    "greetings",
    "good morning",
    "good afternoon",
    "good evening",
];

/// Job titles recognised in chat, lower-case.
pub const JOB_TITLES: &[&str] = &[
    "ai engineer",
    "machine learning engineer",
    "data scientist",
    "full stack developer",
    "frontend developer",
    "backend developer",
    "mobile developer",
    "devops engineer",
    "cloud architect",
    "qa engineer",
    "ui/ux designer",
    "project manager",
];

/// Words that signal the user wants to apply.
pub const APPLY_KEYWORDS: &[&str] = &[
    "apply",
    "application",
    "job",
    "career",
    "position",
    "opening",
    "vacancy",
    "hiring",
];

/// The classified purpose of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    JobApplication { job_title: String },
    GeneralQuery,
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    JobApplication,
    Greeting,
}

const RULES: [Rule; 2] = [Rule::JobApplication, Rule::Greeting];

#[derive(Debug, Clone)]
pub struct IntentClassifier {
    greetings: Vec<String>,
    job_titles: Vec<String>,
    apply_keywords: Vec<String>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self {
            greetings: to_owned_list(GREETING_TOKENS),
            job_titles: to_owned_list(JOB_TITLES),
            apply_keywords: to_owned_list(APPLY_KEYWORDS),
        }
    }
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl IntentClassifier {
    /// Append extra job titles (e.g. from the jobs table) after the defaults.
    ///
    /// Titles are lower-cased; duplicates and blanks are dropped.
    pub fn with_job_titles(mut self, titles: impl IntoIterator<Item = String>) -> Self {
        for title in titles {
            let title = title.trim().to_lowercase();
            if !title.is_empty() && !self.job_titles.contains(&title) {
                self.job_titles.push(title);
            }
        }
        self
    }

    pub fn job_titles(&self) -> &[String] {
        &self.job_titles
    }

    /// Classify one user utterance.
    pub fn classify(&self, utterance: &str) -> Intent {
        let lower = utterance.trim().to_lowercase();

        for rule in RULES {
            match rule {
                Rule::JobApplication => {
                    if let Some(job_title) = self.match_job_application(&lower) {
                        return Intent::JobApplication { job_title };
                    }
                }
                Rule::Greeting => {
                    if self.is_greeting(&lower) {
                        return Intent::Greeting;
                    }
                }
            }
        }

        Intent::GeneralQuery
    }

    fn match_job_application(&self, lower: &str) -> Option<String> {
        if !self.apply_keywords.iter().any(|k| lower.contains(k.as_str())) {
            return None;
        }

        let mut matches: Vec<(usize, usize, &String)> = self
            .job_titles
            .iter()
            .enumerate()
            .filter_map(|(order, title)| lower.find(title.as_str()).map(|pos| (pos, order, title)))
            .collect();

        if matches.len() > 1 {
            tracing::debug!(
                candidates = ?matches.iter().map(|(_, _, t)| t.as_str()).collect::<Vec<_>>(),
                "multiple job titles in one message; resolving by position"
            );
        }

        matches.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.2.len().cmp(&a.2.len()))
                .then(a.1.cmp(&b.1))
        });

        matches.first().map(|(_, _, title)| (*title).clone())
    }

    fn is_greeting(&self, lower: &str) -> bool {
        self.greetings.iter().any(|token| {
            if lower == token {
                return true;
            }
            match lower.strip_prefix(token.as_str()) {
                Some(rest) => rest
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_whitespace() || c.is_ascii_punctuation()),
                None => false,
            }
        })
    }
}
