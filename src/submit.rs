//! Form submission pipeline: check → validate → rate-limit → persist → notify.
//!
//! Persistence decides success. Notification is attempted once afterwards
//! and its result is reported through [`SubmissionOutcome`] so callers can
//! tell "stored and notified" from "stored, notification failed".

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::forms::{
    ContactForm, JobApplicationForm, RateLimiter, TrainingInquiryForm, ValidationErrors,
};
use crate::jobs;
use crate::mailer::{Notification, Notifier};
use crate::models::{Inquiry, InquiryKind, JobApplication};
use crate::storage::ResumeStore;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("submission rejected")]
    Spam,
    #[error("too many submissions, please try again later")]
    RateLimited,
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("failed to store submission: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Stored and the notification was accepted.
    Delivered { id: String, message_id: String },
    /// Stored, but the notification could not be sent.
    PersistedOnly { id: String, reason: String },
}

impl SubmissionOutcome {
    pub fn id(&self) -> &str {
        match self {
            SubmissionOutcome::Delivered { id, .. } | SubmissionOutcome::PersistedOnly { id, .. } => id,
        }
    }

    pub fn notified(&self) -> bool {
        matches!(self, SubmissionOutcome::Delivered { .. })
    }
}

pub struct Submissions {
    pool: SqlitePool,
    notifier: Arc<dyn Notifier>,
    limiter: RateLimiter,
    resumes: ResumeStore,
    resume_max_bytes: usize,
}

impl Submissions {
    pub fn new(pool: SqlitePool, config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            notifier,
            limiter: RateLimiter::new(
                config.forms.max_submissions,
                Duration::from_secs(config.forms.window_secs),
            ),
            resumes: ResumeStore::new(&config.forms.upload_dir),
            resume_max_bytes: config.forms.resume_max_bytes,
        }
    }

    fn admit(&self, client_key: &str) -> Result<(), SubmitError> {
        if self.limiter.check(client_key) {
            Ok(())
        } else {
            tracing::warn!(client = %client_key, "submission rate limit hit");
            Err(SubmitError::RateLimited)
        }
    }

    pub async fn submit_contact(
        &self,
        client_key: &str,
        form: &ContactForm,
    ) -> Result<SubmissionOutcome, SubmitError> {
        if form.is_spam() {
            tracing::info!(client = %client_key, "honeypot filled on contact form");
            return Err(SubmitError::Spam);
        }
        form.validate()?;
        self.admit(client_key)?;

        let subject = form
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("General inquiry");

        let inquiry = insert_inquiry(
            &self.pool,
            InquiryKind::Contact,
            &form.name,
            &form.email,
            form.phone.as_deref(),
            subject,
            &form.message,
        )
        .await
        .map_err(SubmitError::Store)?;

        Ok(self.notify(&inquiry.id, inquiry_notification(&inquiry)).await)
    }

    pub async fn submit_training(
        &self,
        client_key: &str,
        form: &TrainingInquiryForm,
    ) -> Result<SubmissionOutcome, SubmitError> {
        if form.is_spam() {
            tracing::info!(client = %client_key, "honeypot filled on training form");
            return Err(SubmitError::Spam);
        }
        form.validate()?;
        self.admit(client_key)?;

        let inquiry = insert_inquiry(
            &self.pool,
            InquiryKind::Training,
            &form.name,
            &form.email,
            form.phone.as_deref(),
            &form.course,
            form.message.as_deref().unwrap_or(""),
        )
        .await
        .map_err(SubmitError::Store)?;

        Ok(self.notify(&inquiry.id, inquiry_notification(&inquiry)).await)
    }

    pub async fn submit_application(
        &self,
        client_key: &str,
        job_slug: &str,
        form: &JobApplicationForm,
    ) -> Result<SubmissionOutcome, SubmitError> {
        if form.is_spam() {
            tracing::info!(client = %client_key, "honeypot filled on application form");
            return Err(SubmitError::Spam);
        }
        let resume = form.validate(self.resume_max_bytes)?;

        let job = jobs::get_job_by_slug(&self.pool, job_slug)
            .await
            .map_err(SubmitError::Store)?
            .ok_or_else(|| SubmitError::JobNotFound(job_slug.to_string()))?;

        self.admit(client_key)?;

        let resume_key = self
            .resumes
            .save(&form.resume.filename, &resume)
            .await
            .map_err(SubmitError::Store)?;

        let application = JobApplication {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            name: form.name.trim().to_string(),
            email: form.email.trim().to_string(),
            cover_letter: form.cover_letter.trim().to_string(),
            resume_key,
            created_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = insert_application(&self.pool, &application).await {
            // No row points at the upload, so it must not outlive the failure.
            if let Err(cleanup) = self.resumes.remove(&application.resume_key).await {
                tracing::warn!(
                    key = %application.resume_key,
                    error = %format!("{:#}", cleanup),
                    "failed to remove orphaned resume"
                );
            }
            return Err(SubmitError::Store(e));
        }

        let notification = Notification {
            subject: format!("New application: {} - {}", job.title, application.name),
            text: format!(
                "Position: {}\nName: {}\nEmail: {}\nResume: {}\n\n{}",
                job.title,
                application.name,
                application.email,
                application.resume_key,
                application.cover_letter
            ),
            reply_to: Some(application.email.clone()),
        };

        Ok(self.notify(&application.id, notification).await)
    }

    async fn notify(&self, id: &str, notification: Notification) -> SubmissionOutcome {
        match self.notifier.send(&notification).await {
            Ok(message_id) => {
                tracing::info!(submission = %id, "notification sent");
                SubmissionOutcome::Delivered {
                    id: id.to_string(),
                    message_id,
                }
            }
            Err(e) => {
                tracing::warn!(submission = %id, error = %e, "notification failed; submission kept");
                SubmissionOutcome::PersistedOnly {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn inquiry_notification(inquiry: &Inquiry) -> Notification {
    let heading = match inquiry.kind {
        InquiryKind::Contact => "New contact inquiry",
        InquiryKind::Training => "New training inquiry",
    };
    Notification {
        subject: format!("{}: {}", heading, inquiry.subject),
        text: format!(
            "Name: {}\nEmail: {}\nPhone: {}\nSubject: {}\n\n{}",
            inquiry.name,
            inquiry.email,
            inquiry.phone.as_deref().unwrap_or("-"),
            inquiry.subject,
            inquiry.message
        ),
        reply_to: Some(inquiry.email.clone()),
    }
}

pub async fn insert_inquiry(
    pool: &SqlitePool,
    kind: InquiryKind,
    name: &str,
    email: &str,
    phone: Option<&str>,
    subject: &str,
    message: &str,
) -> Result<Inquiry> {
    let inquiry = Inquiry {
        id: Uuid::new_v4().to_string(),
        kind,
        name: name.trim().to_string(),
        email: email.trim().to_string(),
        phone: phone
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        subject: subject.trim().to_string(),
        message: message.trim().to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };

    sqlx::query(
        "INSERT INTO inquiries (id, kind, name, email, phone, subject, message, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&inquiry.id)
    .bind(inquiry.kind.as_str())
    .bind(&inquiry.name)
    .bind(&inquiry.email)
    .bind(&inquiry.phone)
    .bind(&inquiry.subject)
    .bind(&inquiry.message)
    .bind(inquiry.created_at)
    .execute(pool)
    .await?;

    Ok(inquiry)
}

pub async fn insert_application(pool: &SqlitePool, application: &JobApplication) -> Result<()> {
    sqlx::query(
        "INSERT INTO job_applications (id, job_id, name, email, cover_letter, resume_key, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&application.id)
    .bind(&application.job_id)
    .bind(&application.name)
    .bind(&application.email)
    .bind(&application.cover_letter)
    .bind(&application.resume_key)
    .bind(application.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent inquiries first.
pub async fn list_inquiries(pool: &SqlitePool, limit: i64) -> Result<Vec<Inquiry>> {
    let rows = sqlx::query(
        "SELECT id, kind, name, email, phone, subject, message, created_at
         FROM inquiries ORDER BY created_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let kind: String = row.get("kind");
            Inquiry {
                id: row.get("id"),
                kind: InquiryKind::parse(&kind).unwrap_or(InquiryKind::Contact),
                name: row.get("name"),
                email: row.get("email"),
                phone: row.get("phone"),
                subject: row.get("subject"),
                message: row.get("message"),
                created_at: row.get("created_at"),
            }
        })
        .collect())
}

/// CLI: print recent inquiries.
pub async fn run_list_inquiries(pool: &SqlitePool, limit: i64) -> Result<()> {
    let inquiries = list_inquiries(pool, limit).await?;
    if inquiries.is_empty() {
        println!("No inquiries.");
        return Ok(());
    }
    for inquiry in &inquiries {
        let date = chrono::DateTime::from_timestamp(inquiry.created_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "[{}] {} {} <{}> : {}",
            date,
            inquiry.kind.as_str(),
            inquiry.name,
            inquiry.email,
            inquiry.subject
        );
    }
    Ok(())
}
