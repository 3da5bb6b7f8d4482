//! HTTP handlers for the Learn module.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use log::info;
use std::sync::Arc;
use uuid::Uuid;

use crate::learn::error::LearnError;
use crate::learn::progress::ProgressEngine;
use crate::learn::storage::LearnStore;
use crate::learn::types::{
    CertificateVerification, CompleteLessonRequest, CompleteLessonResponse, CourseFilters,
    CreateCourseRequest, CreateLessonRequest, EnrollmentResponse, ProgressStatus,
    UpdateCourseRequest, UpdateLessonRequest, VerifiedCertificate,
};
use crate::security::auth::AuthenticatedUser;
use crate::shared::state::AppState;

// ----- Course Handlers -----

/// List published courses with optional filters
pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<CourseFilters>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let courses = store.list_courses(filters).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": courses
    })))
}

/// Create a new course
pub async fn create_course(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let instructor_id = req.instructor_id.unwrap_or(user.user_id);
    let course = store.create_course(req, instructor_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "data": course
        })),
    ))
}

/// Get course details with lessons
pub async fn get_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let course = store
        .get_course(course_id)
        .await?
        .ok_or_else(|| LearnError::NotFound("Course not found".to_string()))?;
    let lessons = store.get_lessons(course_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": {
            "course": course,
            "lessons": lessons
        }
    })))
}

/// Update a course
pub async fn update_course(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
    Json(req): Json<UpdateCourseRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let course = store.update_course(course_id, req).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": course
    })))
}

/// Delete a course
pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    store.delete_course(course_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Course deleted"
    })))
}

// ----- Lesson Handlers -----

/// Get lessons for a course
pub async fn get_lessons(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let lessons = store.get_lessons(course_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": lessons
    })))
}

/// Create a lesson for a course
pub async fn create_lesson(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
    Json(req): Json<CreateLessonRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let lesson = store.create_lesson(course_id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "data": lesson
        })),
    ))
}

/// Update a lesson
pub async fn update_lesson(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(lesson_id): Path<Uuid>,
    Json(req): Json<UpdateLessonRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let lesson = store.update_lesson(lesson_id, req).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": lesson
    })))
}

/// Delete a lesson
pub async fn delete_lesson(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(lesson_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    store.delete_lesson(lesson_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Lesson deleted"
    })))
}

// ----- Enrollment Handlers -----

/// Enroll the caller in a course
pub async fn enroll(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let enrollment = store.enroll(user.user_id, course_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "data": enrollment
        })),
    ))
}

/// List the caller's enrollments with progress
pub async fn get_enrollments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let rows = store.enrollments_for_user(user.user_id).await?;

    let mut enrollments = Vec::with_capacity(rows.len());
    for (enrollment, course) in rows {
        let completed = store
            .completed_lesson_count(user.user_id, course.id)
            .await?;
        enrollments.push(EnrollmentResponse {
            course_id: course.id,
            course_title: course.title,
            progress_percentage: enrollment.progress_percentage,
            status: ProgressStatus::derive(completed, enrollment.progress_percentage),
            enrolled_at: enrollment.enrolled_at,
            last_accessed_at: enrollment.last_accessed_at,
        });
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "data": enrollments
    })))
}

// ----- Completion Workflow Handler -----

/// Record a lesson completion, recompute progress and issue a
/// certificate when the course reaches 100%.
pub async fn complete_lesson(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CompleteLessonRequest>,
) -> Result<impl IntoResponse, LearnError> {
    let engine = ProgressEngine::new(state.conn.clone(), state.config.certificates.clone());
    let outcome = engine
        .complete_lesson(user.user_id, req.course_id, req.lesson_id)
        .await?;

    if let Some(cert) = &outcome.certificate {
        info!(
            "Issued certificate {} for user {} course {}",
            cert.certificate_number, user.user_id, req.course_id
        );
    }

    Ok(Json(CompleteLessonResponse {
        success: true,
        progress_percentage: outcome.progress_percentage,
        certificate_generated: outcome.certificate_generated(),
    }))
}

// ----- Certificate Handlers -----

/// Get the caller's certificates
pub async fn get_certificates(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let certificates = store.certificates_for_user(user.user_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": certificates
    })))
}

/// Publicly verify a certificate by number
pub async fn verify_certificate(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> Result<impl IntoResponse, LearnError> {
    let store = LearnStore::new(state.conn.clone());
    let verification = match store.find_certificate_for_verification(&number).await? {
        Some((cert, student, course, instructor)) => CertificateVerification {
            is_valid: true,
            certificate: Some(VerifiedCertificate {
                certificate_number: cert.certificate_number,
                student_name: student.display_name,
                course_title: course.title,
                instructor_name: instructor.display_name,
                issued_at: cert.issued_at,
                duration_minutes: course.duration_minutes,
                verification_url: cert.verification_url,
            }),
            message: "Certificate is valid".to_string(),
        },
        None => CertificateVerification {
            is_valid: false,
            certificate: None,
            message: "Certificate not found".to_string(),
        },
    };
    Ok(Json(serde_json::json!({
        "success": true,
        "data": verification
    })))
}
