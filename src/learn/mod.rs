//! # Learn Module - Course Progress & Certificates
//!
//! LMS backend for learnserver:
//! - Course catalog management (CRUD operations)
//! - Lesson management with ordering and duration rollup
//! - Enrollment with a cached per-course progress percentage
//! - Idempotent lesson-completion recording
//! - Certificate issuance on 100% completion with public verification
//!
//! ## Architecture
//!
//! - Diesel ORM for database operations
//! - Axum handlers for HTTP routes
//! - Serde for JSON serialization
//! - UUID for unique identifiers
//!
//! Completion handling runs in three steps: record the completion
//! (upsert on the (user, lesson) key), recompute the enrollment's cached
//! percentage from raw counts, and mint a certificate when the course
//! reaches 100%. The recompute and mint steps share one transaction, and
//! the certificate table's (user, course) uniqueness constraint makes
//! concurrent final-lesson submissions converge on a single certificate.

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::shared::state::AppState;

pub mod error;
pub mod handlers;
pub mod progress;
pub mod storage;
pub mod types;

// ============================================================================
// DATABASE SCHEMA
// ============================================================================

diesel::table! {
    learn_users (id) {
        id -> Uuid,
        email -> Text,
        display_name -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    learn_courses (id) {
        id -> Uuid,
        title -> Text,
        description -> Nullable<Text>,
        category -> Text,
        instructor_id -> Uuid,
        duration_minutes -> Int4,
        is_published -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    learn_lessons (id) {
        id -> Uuid,
        course_id -> Uuid,
        title -> Text,
        content -> Nullable<Text>,
        lesson_order -> Int4,
        duration_minutes -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    learn_enrollments (id) {
        id -> Uuid,
        user_id -> Uuid,
        course_id -> Uuid,
        progress_percentage -> Int4,
        enrolled_at -> Timestamptz,
        last_accessed_at -> Timestamptz,
    }
}

diesel::table! {
    learn_lesson_completions (id) {
        id -> Uuid,
        user_id -> Uuid,
        lesson_id -> Uuid,
        completed_at -> Timestamptz,
    }
}

diesel::table! {
    learn_certificates (id) {
        id -> Uuid,
        user_id -> Uuid,
        course_id -> Uuid,
        certificate_number -> Text,
        verification_url -> Text,
        issued_at -> Timestamptz,
    }
}

diesel::joinable!(learn_lessons -> learn_courses (course_id));
diesel::joinable!(learn_lesson_completions -> learn_lessons (lesson_id));
diesel::joinable!(learn_enrollments -> learn_courses (course_id));

diesel::allow_tables_to_appear_in_same_query!(
    learn_users,
    learn_courses,
    learn_lessons,
    learn_enrollments,
    learn_lesson_completions,
    learn_certificates,
);

// ============================================================================
// ROUTE CONFIGURATION
// ============================================================================

/// Configure all Learn module routes
pub fn configure_learn_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Course routes
        .route(
            "/api/learn/courses",
            get(handlers::list_courses).post(handlers::create_course),
        )
        .route(
            "/api/learn/courses/:id",
            get(handlers::get_course)
                .put(handlers::update_course)
                .delete(handlers::delete_course),
        )
        // Lesson routes
        .route(
            "/api/learn/courses/:id/lessons",
            get(handlers::get_lessons).post(handlers::create_lesson),
        )
        .route(
            "/api/learn/lessons/:id",
            put(handlers::update_lesson).delete(handlers::delete_lesson),
        )
        // Enrollment routes
        .route("/api/learn/courses/:id/enroll", post(handlers::enroll))
        .route("/api/learn/enrollments", get(handlers::get_enrollments))
        // Completion workflow (record -> recompute -> issue)
        .route("/progress/complete-lesson", post(handlers::complete_lesson))
        // Certificate routes
        .route("/api/learn/certificates", get(handlers::get_certificates))
        .route(
            "/certificates/verify/:number",
            get(handlers::verify_certificate),
        )
}

/// Simplified configure function for module registration
pub fn configure(router: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    router.merge(configure_learn_routes())
}
