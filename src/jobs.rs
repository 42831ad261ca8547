//! Job listings for the careers page.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::Job;

/// Lower-case, ASCII-alphanumeric words joined by `-`.
///
/// `"UI/UX Designer"` → `"ui-ux-designer"`.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Fields for a new job listing.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub title: String,
    pub description: String,
    pub location: String,
    pub employment_type: String,
}

pub async fn create_job(pool: &SqlitePool, new_job: &NewJob) -> Result<Job> {
    let title = new_job.title.trim();
    if title.is_empty() {
        bail!("job title must not be empty");
    }
    let slug = slugify(title);
    if slug.is_empty() {
        bail!("job title must contain letters or digits");
    }

    if get_job_by_slug(pool, &slug).await?.is_some() {
        bail!("a job with slug '{}' already exists", slug);
    }

    let job = Job {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        slug,
        description: new_job.description.trim().to_string(),
        location: new_job.location.trim().to_string(),
        employment_type: new_job.employment_type.trim().to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };

    sqlx::query(
        "INSERT INTO jobs (id, title, slug, description, location, employment_type, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&job.id)
    .bind(&job.title)
    .bind(&job.slug)
    .bind(&job.description)
    .bind(&job.location)
    .bind(&job.employment_type)
    .bind(job.created_at)
    .execute(pool)
    .await?;

    Ok(job)
}

/// All jobs, newest first.
pub async fn list_jobs(pool: &SqlitePool) -> Result<Vec<Job>> {
    let rows = sqlx::query(
        "SELECT id, title, slug, description, location, employment_type, created_at
         FROM jobs ORDER BY created_at DESC, title ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_job).collect())
}

pub async fn get_job_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Job>> {
    let row = sqlx::query(
        "SELECT id, title, slug, description, location, employment_type, created_at
         FROM jobs WHERE slug = ?",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_job))
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Job {
    Job {
        id: row.get("id"),
        title: row.get("title"),
        slug: row.get("slug"),
        description: row.get("description"),
        location: row.get("location"),
        employment_type: row.get("employment_type"),
        created_at: row.get("created_at"),
    }
}

/// CLI: print all jobs.
pub async fn run_list(pool: &SqlitePool) -> Result<()> {
    let jobs = list_jobs(pool).await?;
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    for job in &jobs {
        println!("{}  {} ({}, {})", job.slug, job.title, job.location, job.employment_type);
    }
    Ok(())
}
