//! Form payloads, field validation, honeypot, and submission rate limiting.
//!
//! Validation never touches the network or the database; a payload that
//! fails here produces no side effects at all.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 100;
const SUBJECT_MAX: usize = 200;
const MESSAGE_MIN: usize = 10;
const MESSAGE_MAX: usize = 5000;
const COVER_LETTER_MIN: usize = 50;
const RESUME_EXTENSIONS: &[&str] = &["pdf", "doc", "docx"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed for: {}", field_list(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

fn field_list(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationErrors {
    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

/// Collects per-field errors.
#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn name(&mut self, value: &str) {
        let len = value.trim().chars().count();
        if !(NAME_MIN..=NAME_MAX).contains(&len) {
            self.fail(
                "name",
                format!("Name must be between {} and {} characters", NAME_MIN, NAME_MAX),
            );
        }
    }

    fn email(&mut self, value: &str) {
        if !is_valid_email(value.trim()) {
            self.fail("email", "Please enter a valid email address");
        }
    }

    fn phone(&mut self, value: Option<&str>) {
        if let Some(phone) = value.map(str::trim).filter(|p| !p.is_empty()) {
            if !is_valid_phone(phone) {
                self.fail("phone", "Please enter a valid phone number");
            }
        }
    }

    fn text(&mut self, field: &str, value: &str, min: usize, max: usize) {
        let len = value.trim().chars().count();
        if len < min {
            self.fail(field, format!("Must be at least {} characters", min));
        } else if len > max {
            self.fail(field, format!("Must be at most {} characters", max));
        }
    }

    fn consent(&mut self, value: bool) {
        if !value {
            self.fail("consent", "You must agree to be contacted");
        }
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors {
                errors: self.errors,
            })
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|part| !part.is_empty())
}

pub fn is_valid_phone(phone: &str) -> bool {
    let len = phone.chars().count();
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=20).contains(&len)
        && digits >= 7
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')'))
}

fn honeypot_filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Contact page form.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default)]
    pub consent: bool,
    /// Honeypot; hidden from humans.
    #[serde(default)]
    pub website: Option<String>,
}

impl ContactForm {
    pub fn is_spam(&self) -> bool {
        honeypot_filled(&self.website)
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut c = Checker::default();
        c.name(&self.name);
        c.email(&self.email);
        c.phone(self.phone.as_deref());
        if let Some(subject) = &self.subject {
            c.text("subject", subject, 0, SUBJECT_MAX);
        }
        c.text("message", &self.message, MESSAGE_MIN, MESSAGE_MAX);
        c.consent(self.consent);
        c.finish()
    }
}

/// Training course inquiry form.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingInquiryForm {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub course: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub consent: bool,
    #[serde(default)]
    pub website: Option<String>,
}

impl TrainingInquiryForm {
    pub fn is_spam(&self) -> bool {
        honeypot_filled(&self.website)
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut c = Checker::default();
        c.name(&self.name);
        c.email(&self.email);
        c.phone(self.phone.as_deref());
        c.text("course", &self.course, 1, SUBJECT_MAX);
        if let Some(message) = &self.message {
            c.text("message", message, 0, MESSAGE_MAX);
        }
        c.consent(self.consent);
        c.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResumeUpload {
    pub filename: String,
    /// Standard base64 of the file bytes.
    pub content_base64: String,
}

/// Careers page application form.
#[derive(Debug, Clone, Deserialize)]
pub struct JobApplicationForm {
    pub name: String,
    pub email: String,
    pub cover_letter: String,
    pub resume: ResumeUpload,
    #[serde(default)]
    pub website: Option<String>,
}

impl JobApplicationForm {
    pub fn is_spam(&self) -> bool {
        honeypot_filled(&self.website)
    }

    /// Validate fields and decode the resume, returning its bytes.
    pub fn validate(&self, resume_max_bytes: usize) -> Result<Vec<u8>, ValidationErrors> {
        let mut c = Checker::default();
        c.name(&self.name);
        c.email(&self.email);
        c.text("cover_letter", &self.cover_letter, COVER_LETTER_MIN, MESSAGE_MAX);

        let extension = std::path::Path::new(&self.resume.filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        let extension_ok = extension
            .as_deref()
            .is_some_and(|e| RESUME_EXTENSIONS.contains(&e));
        if !extension_ok {
            c.fail("resume", "Resume must be a PDF, DOC, or DOCX file");
        }

        let bytes = match base64::engine::general_purpose::STANDARD
            .decode(self.resume.content_base64.trim())
        {
            Ok(bytes) if bytes.is_empty() => {
                c.fail("resume", "Resume file is empty");
                Vec::new()
            }
            Ok(bytes) if bytes.len() > resume_max_bytes => {
                c.fail(
                    "resume",
                    format!("Resume must be smaller than {} bytes", resume_max_bytes),
                );
                Vec::new()
            }
            Ok(bytes) => bytes,
            Err(_) => {
                c.fail("resume", "Resume upload is not valid base64");
                Vec::new()
            }
        };

        c.finish().map(|_| bytes)
    }
}

/// Fixed-window submission counter keyed by client.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    hits: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt for `key`; `false` means the limit is exhausted.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);

        if hits.len() > 10_000 {
            let window = self.window;
            hits.retain(|_, (start, _)| now.duration_since(*start) < window);
        }

        let entry = hits.entry(key.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        if entry.1 >= self.max {
            return false;
        }
        entry.1 += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ContactForm {
        ContactForm {
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            phone: None,
            subject: Some("Project".to_string()),
            message: "We need help with a cloud migration.".to_string(),
            consent: true,
            website: None,
        }
    }

    fn application(resume_b64: &str, filename: &str) -> JobApplicationForm {
        JobApplicationForm {
            name: "Sam Lee".to_string(),
            email: "sam@example.com".to_string(),
            cover_letter: "I have built production ML systems for five years and love it."
                .to_string(),
            resume: ResumeUpload {
                filename: filename.to_string(),
                content_base64: resume_b64.to_string(),
            },
            website: None,
        }
    }

    #[test]
    fn test_valid_contact() {
        contact().validate().unwrap();
        assert!(!contact().is_spam());
    }

    #[test]
    fn test_consent_required() {
        let mut form = contact();
        form.consent = false;
        let err = form.validate().unwrap_err();
        assert_eq!(err.fields(), vec!["consent"]);
    }

    #[test]
    fn test_multiple_field_errors() {
        let mut form = contact();
        form.name = "J".to_string();
        form.email = "not-an-email".to_string();
        form.message = "short".to_string();
        let err = form.validate().unwrap_err();
        assert!(err.has("name"));
        assert!(err.has("email"));
        assert!(err.has("message"));
        assert!(!err.has("consent"));
    }

    #[test]
    fn test_honeypot() {
        let mut form = contact();
        form.website = Some("http://spam.example".to_string());
        assert!(form.is_spam());
        form.website = Some("   ".to_string());
        assert!(!form.is_spam());
    }

    #[test]
    fn test_email_rules() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a@@b.co"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("a@b..co"));
    }

    #[test]
    fn test_phone_rules() {
        assert!(is_valid_phone("+1 (555) 123-4567"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("555-CALL-NOW"));
    }

    #[test]
    fn test_training_requires_course() {
        let form = TrainingInquiryForm {
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            phone: Some("+44 20 7946 0958".to_string()),
            course: " ".to_string(),
            message: None,
            consent: true,
            website: None,
        };
        assert!(form.validate().unwrap_err().has("course"));
    }

    #[test]
    fn test_application_resume_decoded() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4 resume");
        let bytes = application(&b64, "cv.PDF").validate(1024).unwrap();
        assert_eq!(bytes, b"%PDF-1.4 resume");
    }

    #[test]
    fn test_application_resume_rules() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"hello");
        assert!(application(&b64, "cv.exe")
            .validate(1024)
            .unwrap_err()
            .has("resume"));
        assert!(application(&b64, "cv.pdf")
            .validate(2)
            .unwrap_err()
            .has("resume"));
        assert!(application("***", "cv.pdf")
            .validate(1024)
            .unwrap_err()
            .has("resume"));
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(limiter.check_at("1.2.3.4", t0));
        assert!(limiter.check_at("1.2.3.4", t0));
        assert!(!limiter.check_at("1.2.3.4", t0 + Duration::from_secs(30)));
        assert!(limiter.check_at("5.6.7.8", t0));
        assert!(limiter.check_at("1.2.3.4", t0 + Duration::from_secs(61)));
    }
}
