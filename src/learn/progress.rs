//! Lesson completion, progress recomputation and certificate issuance.
//!
//! The three steps run strictly in order: record the completion, derive
//! the enrollment's percentage from raw counts, then mint a certificate
//! when the course reaches 100%. Recompute and mint share one
//! transaction. Every step is idempotent, so a client retry or a
//! concurrent duplicate submission converges on the same end state:
//! one completion row per (user, lesson), one certificate per
//! (user, course).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::config::CertificateConfig;
use crate::learn::error::LearnError;
use crate::learn::types::{Certificate, Lesson, LessonCompletion};
use crate::learn::{
    learn_certificates, learn_enrollments, learn_lesson_completions, learn_lessons,
};
use crate::shared::utils::DbPool;

/// Result of a single complete-lesson submission.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub progress_percentage: i32,
    pub certificate: Option<Certificate>,
}

impl CompletionOutcome {
    pub fn certificate_generated(&self) -> bool {
        self.certificate.is_some()
    }
}

pub struct ProgressEngine {
    db: DbPool,
    certificates: CertificateConfig,
}

impl ProgressEngine {
    pub fn new(db: DbPool, certificates: CertificateConfig) -> Self {
        Self { db, certificates }
    }

    /// Run the full workflow for one completion signal.
    ///
    /// The lesson must belong to `course_id` and the user must hold an
    /// enrollment for it; completion signals for arbitrary lessons are
    /// rejected rather than recorded.
    pub async fn complete_lesson(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        lesson_id: Uuid,
    ) -> Result<CompletionOutcome, LearnError> {
        let mut conn = self.db.get().map_err(LearnError::from)?;

        let lesson: Lesson = learn_lessons::table
            .filter(learn_lessons::id.eq(lesson_id))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| LearnError::NotFound("Lesson not found".to_string()))?;

        if lesson.course_id != course_id {
            return Err(LearnError::Validation(
                "Lesson does not belong to the given course".to_string(),
            ));
        }

        let enrolled: i64 = learn_enrollments::table
            .filter(learn_enrollments::user_id.eq(user_id))
            .filter(learn_enrollments::course_id.eq(course_id))
            .count()
            .get_result(&mut conn)?;
        if enrolled == 0 {
            return Err(LearnError::NotFound(
                "No enrollment for this course".to_string(),
            ));
        }

        record_lesson_completion(&mut conn, user_id, lesson_id)?;

        conn.transaction::<CompletionOutcome, LearnError, _>(|conn| {
            let percentage = recompute_course_progress(conn, user_id, course_id)?;
            let certificate = issue_certificate_if_complete(
                conn,
                user_id,
                course_id,
                percentage,
                &self.certificates,
            )?;
            Ok(CompletionOutcome {
                progress_percentage: percentage,
                certificate,
            })
        })
    }
}

/// Record that `user_id` completed `lesson_id`, idempotently.
///
/// Upserts on the (user, lesson) key; a resubmission refreshes
/// completed_at and nothing else.
pub fn record_lesson_completion(
    conn: &mut PgConnection,
    user_id: Uuid,
    lesson_id: Uuid,
) -> Result<(), LearnError> {
    let completion = LessonCompletion {
        id: Uuid::new_v4(),
        user_id,
        lesson_id,
        completed_at: Utc::now(),
    };

    diesel::insert_into(learn_lesson_completions::table)
        .values(&completion)
        .on_conflict((
            learn_lesson_completions::user_id,
            learn_lesson_completions::lesson_id,
        ))
        .do_update()
        .set(learn_lesson_completions::completed_at.eq(completion.completed_at))
        .execute(conn)?;

    Ok(())
}

/// Recompute the user's completion percentage for a course from raw
/// counts and store it on the enrollment row.
///
/// The stored percentage is a derived cache; this is the only code path
/// that writes it. Returns NotFound when the user is not enrolled.
pub fn recompute_course_progress(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<i32, LearnError> {
    let total_lessons: i64 = learn_lessons::table
        .filter(learn_lessons::course_id.eq(course_id))
        .count()
        .get_result(conn)?;

    let completed_lessons: i64 = learn_lesson_completions::table
        .inner_join(learn_lessons::table)
        .filter(learn_lesson_completions::user_id.eq(user_id))
        .filter(learn_lessons::course_id.eq(course_id))
        .count()
        .get_result(conn)?;

    let percentage = completion_percentage(completed_lessons, total_lessons);

    let updated = diesel::update(
        learn_enrollments::table
            .filter(learn_enrollments::user_id.eq(user_id))
            .filter(learn_enrollments::course_id.eq(course_id)),
    )
    .set((
        learn_enrollments::progress_percentage.eq(percentage),
        learn_enrollments::last_accessed_at.eq(Utc::now()),
    ))
    .execute(conn)?;

    if updated == 0 {
        return Err(LearnError::NotFound(
            "No enrollment for this course".to_string(),
        ));
    }

    Ok(percentage)
}

/// Percentage of `completed` out of `total`, rounded half-up.
/// A course with no lessons is 0% complete, never a division by zero.
pub fn completion_percentage(completed: i64, total: i64) -> i32 {
    if total <= 0 {
        return 0;
    }
    let completed = completed.clamp(0, total);
    ((completed * 200 + total) / (total * 2)) as i32
}

/// Mint a certificate when the course is fully complete, exactly once.
///
/// Acts only on a percentage of exactly 100. The existence check is a
/// fast path; the (user, course) uniqueness constraint is what actually
/// guarantees single issuance, and losing that race reports "already
/// issued" rather than an error.
pub fn issue_certificate_if_complete(
    conn: &mut PgConnection,
    user_id: Uuid,
    course_id: Uuid,
    percentage: i32,
    config: &CertificateConfig,
) -> Result<Option<Certificate>, LearnError> {
    if percentage != 100 {
        return Ok(None);
    }

    let existing: i64 = learn_certificates::table
        .filter(learn_certificates::user_id.eq(user_id))
        .filter(learn_certificates::course_id.eq(course_id))
        .count()
        .get_result(conn)?;
    if existing > 0 {
        return Ok(None);
    }

    let issued_at = Utc::now();
    let certificate_number = generate_certificate_number(issued_at);
    let certificate = Certificate {
        id: Uuid::new_v4(),
        user_id,
        course_id,
        certificate_number: certificate_number.clone(),
        verification_url: verification_url(&config.public_base_url, &certificate_number),
        issued_at,
    };

    let inserted = diesel::insert_into(learn_certificates::table)
        .values(&certificate)
        .on_conflict((learn_certificates::user_id, learn_certificates::course_id))
        .do_nothing()
        .execute(conn)?;

    if inserted == 0 {
        // A concurrent submission issued it first.
        return Ok(None);
    }

    Ok(Some(certificate))
}

/// Certificate numbers combine the issuance date with random entropy:
/// unique, shareable, and not guessable in sequence.
pub fn generate_certificate_number(issued_at: DateTime<Utc>) -> String {
    let entropy = Uuid::new_v4().simple().to_string()[..12].to_uppercase();
    format!("LRN-{}-{}", issued_at.format("%Y%m%d"), entropy)
}

pub fn verification_url(public_base_url: &str, certificate_number: &str) -> String {
    format!(
        "{}/certificates/verify/{}",
        public_base_url.trim_end_matches('/'),
        certificate_number
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_completion_percentage_rounds_half_up() {
        assert_eq!(completion_percentage(0, 4), 0);
        assert_eq!(completion_percentage(1, 4), 25);
        assert_eq!(completion_percentage(3, 4), 75);
        assert_eq!(completion_percentage(4, 4), 100);
        assert_eq!(completion_percentage(1, 3), 33);
        assert_eq!(completion_percentage(2, 3), 67);
        assert_eq!(completion_percentage(1, 8), 13);
        assert_eq!(completion_percentage(1, 200), 1);
    }

    #[test]
    fn test_completion_percentage_empty_course_is_zero() {
        assert_eq!(completion_percentage(0, 0), 0);
        assert_eq!(completion_percentage(5, 0), 0);
    }

    #[test]
    fn test_completion_percentage_clamps_overcount() {
        assert_eq!(completion_percentage(7, 4), 100);
        assert_eq!(completion_percentage(-1, 4), 0);
    }

    #[test]
    fn test_certificate_number_format() {
        let issued = Utc.with_ymd_and_hms(2026, 8, 5, 12, 30, 0).unwrap();
        let number = generate_certificate_number(issued);
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "LRN");
        assert_eq!(parts[1], "20260805");
        assert_eq!(parts[2].len(), 12);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_certificate_numbers_do_not_repeat() {
        let issued = Utc::now();
        let a = generate_certificate_number(issued);
        let b = generate_certificate_number(issued);
        assert_ne!(a, b);
    }

    #[test]
    fn test_verification_url_contains_number() {
        let url = verification_url("https://learn.example.com/", "LRN-20260805-AB12CD34EF56");
        assert_eq!(
            url,
            "https://learn.example.com/certificates/verify/LRN-20260805-AB12CD34EF56"
        );
    }
}
