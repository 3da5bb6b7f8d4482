//! Catalog and enrollment persistence.

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use uuid::Uuid;

use crate::learn::error::LearnError;
use crate::learn::types::{
    Certificate, Course, CourseFilters, CreateCourseRequest, CreateLessonRequest, Enrollment,
    Lesson, UpdateCourseRequest, UpdateLessonRequest, User,
};
use crate::learn::{
    learn_certificates, learn_courses, learn_enrollments, learn_lesson_completions, learn_lessons,
    learn_users,
};
use crate::shared::utils::DbPool;

type PooledPg = PooledConnection<ConnectionManager<PgConnection>>;

pub struct LearnStore {
    db: DbPool,
}

impl LearnStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<PooledPg, LearnError> {
        Ok(self.db.get()?)
    }

    // ----- User Operations -----

    pub async fn create_user(&self, email: String, display_name: String) -> Result<User, LearnError> {
        let user = User {
            id: Uuid::new_v4(),
            email,
            display_name,
            created_at: Utc::now(),
        };
        let mut conn = self.conn()?;
        diesel::insert_into(learn_users::table)
            .values(&user)
            .execute(&mut conn)?;
        Ok(user)
    }

    // ----- Course Operations -----

    pub async fn create_course(
        &self,
        req: CreateCourseRequest,
        instructor_id: Uuid,
    ) -> Result<Course, LearnError> {
        if req.title.trim().is_empty() {
            return Err(LearnError::Validation("Course title is required".to_string()));
        }
        let now = Utc::now();
        let course = Course {
            id: Uuid::new_v4(),
            title: req.title,
            description: req.description,
            category: req.category,
            instructor_id,
            duration_minutes: 0,
            is_published: false,
            created_at: now,
            updated_at: now,
        };
        let mut conn = self.conn()?;
        diesel::insert_into(learn_courses::table)
            .values(&course)
            .execute(&mut conn)?;
        Ok(course)
    }

    pub async fn get_course(&self, course_id: Uuid) -> Result<Option<Course>, LearnError> {
        let mut conn = self.conn()?;
        Ok(learn_courses::table
            .filter(learn_courses::id.eq(course_id))
            .first::<Course>(&mut conn)
            .optional()?)
    }

    pub async fn list_courses(&self, filters: CourseFilters) -> Result<Vec<Course>, LearnError> {
        let mut conn = self.conn()?;

        let mut query = learn_courses::table
            .filter(learn_courses::is_published.eq(true))
            .into_boxed();

        if let Some(category) = filters.category {
            query = query.filter(learn_courses::category.eq(category));
        }

        if let Some(search) = filters.search {
            let pattern = format!("%{}%", search.to_lowercase());
            query = query.filter(
                learn_courses::title
                    .ilike(pattern.clone())
                    .or(learn_courses::description.ilike(pattern)),
            );
        }

        query = query.order(learn_courses::created_at.desc());

        if let Some(limit) = filters.limit {
            query = query.limit(limit);
        }

        if let Some(offset) = filters.offset {
            query = query.offset(offset);
        }

        Ok(query.load::<Course>(&mut conn)?)
    }

    pub async fn update_course(
        &self,
        course_id: Uuid,
        req: UpdateCourseRequest,
    ) -> Result<Course, LearnError> {
        let mut conn = self.conn()?;
        diesel::update(learn_courses::table.filter(learn_courses::id.eq(course_id)))
            .set((&req, learn_courses::updated_at.eq(Utc::now())))
            .execute(&mut conn)?;

        learn_courses::table
            .filter(learn_courses::id.eq(course_id))
            .first::<Course>(&mut conn)
            .optional()?
            .ok_or_else(|| LearnError::NotFound("Course not found".to_string()))
    }

    pub async fn delete_course(&self, course_id: Uuid) -> Result<(), LearnError> {
        let mut conn = self.conn()?;

        // Delete related records first
        let lesson_ids: Vec<Uuid> = learn_lessons::table
            .filter(learn_lessons::course_id.eq(course_id))
            .select(learn_lessons::id)
            .load(&mut conn)?;

        diesel::delete(
            learn_lesson_completions::table
                .filter(learn_lesson_completions::lesson_id.eq_any(&lesson_ids)),
        )
        .execute(&mut conn)?;

        diesel::delete(learn_lessons::table.filter(learn_lessons::course_id.eq(course_id)))
            .execute(&mut conn)?;

        diesel::delete(learn_enrollments::table.filter(learn_enrollments::course_id.eq(course_id)))
            .execute(&mut conn)?;

        diesel::delete(
            learn_certificates::table.filter(learn_certificates::course_id.eq(course_id)),
        )
        .execute(&mut conn)?;

        diesel::delete(learn_courses::table.filter(learn_courses::id.eq(course_id)))
            .execute(&mut conn)?;

        Ok(())
    }

    // ----- Lesson Operations -----

    pub async fn create_lesson(
        &self,
        course_id: Uuid,
        req: CreateLessonRequest,
    ) -> Result<Lesson, LearnError> {
        let mut conn = self.conn()?;

        let course_exists: i64 = learn_courses::table
            .filter(learn_courses::id.eq(course_id))
            .count()
            .get_result(&mut conn)?;
        if course_exists == 0 {
            return Err(LearnError::NotFound("Course not found".to_string()));
        }

        // Get next order number
        let max_order: Option<i32> = learn_lessons::table
            .filter(learn_lessons::course_id.eq(course_id))
            .select(diesel::dsl::max(learn_lessons::lesson_order))
            .first(&mut conn)?;

        let now = Utc::now();
        let lesson = Lesson {
            id: Uuid::new_v4(),
            course_id,
            title: req.title,
            content: req.content,
            lesson_order: max_order.unwrap_or(0) + 1,
            duration_minutes: req.duration_minutes.unwrap_or(0),
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(learn_lessons::table)
            .values(&lesson)
            .execute(&mut conn)?;

        self.recalculate_course_duration(&mut conn, course_id)?;

        Ok(lesson)
    }

    pub async fn get_lessons(&self, course_id: Uuid) -> Result<Vec<Lesson>, LearnError> {
        let mut conn = self.conn()?;
        Ok(learn_lessons::table
            .filter(learn_lessons::course_id.eq(course_id))
            .order(learn_lessons::lesson_order.asc())
            .load::<Lesson>(&mut conn)?)
    }

    pub async fn update_lesson(
        &self,
        lesson_id: Uuid,
        req: UpdateLessonRequest,
    ) -> Result<Lesson, LearnError> {
        let mut conn = self.conn()?;
        diesel::update(learn_lessons::table.filter(learn_lessons::id.eq(lesson_id)))
            .set((&req, learn_lessons::updated_at.eq(Utc::now())))
            .execute(&mut conn)?;

        let lesson = learn_lessons::table
            .filter(learn_lessons::id.eq(lesson_id))
            .first::<Lesson>(&mut conn)
            .optional()?
            .ok_or_else(|| LearnError::NotFound("Lesson not found".to_string()))?;

        self.recalculate_course_duration(&mut conn, lesson.course_id)?;

        Ok(lesson)
    }

    pub async fn delete_lesson(&self, lesson_id: Uuid) -> Result<(), LearnError> {
        let mut conn = self.conn()?;

        // Get course_id before deleting
        let lesson: Lesson = learn_lessons::table
            .filter(learn_lessons::id.eq(lesson_id))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| LearnError::NotFound("Lesson not found".to_string()))?;

        diesel::delete(
            learn_lesson_completions::table
                .filter(learn_lesson_completions::lesson_id.eq(lesson_id)),
        )
        .execute(&mut conn)?;

        diesel::delete(learn_lessons::table.filter(learn_lessons::id.eq(lesson_id)))
            .execute(&mut conn)?;

        self.recalculate_course_duration(&mut conn, lesson.course_id)?;
        Ok(())
    }

    fn recalculate_course_duration(
        &self,
        conn: &mut PgConnection,
        course_id: Uuid,
    ) -> Result<(), LearnError> {
        let total_duration: Option<i64> = learn_lessons::table
            .filter(learn_lessons::course_id.eq(course_id))
            .select(diesel::dsl::sum(learn_lessons::duration_minutes))
            .first(conn)?;

        diesel::update(learn_courses::table.filter(learn_courses::id.eq(course_id)))
            .set(learn_courses::duration_minutes.eq(total_duration.unwrap_or(0) as i32))
            .execute(conn)?;

        Ok(())
    }

    // ----- Enrollment Operations -----

    pub async fn enroll(&self, user_id: Uuid, course_id: Uuid) -> Result<Enrollment, LearnError> {
        let mut conn = self.conn()?;

        let course: Option<Course> = learn_courses::table
            .filter(learn_courses::id.eq(course_id))
            .first(&mut conn)
            .optional()?;
        if course.is_none() {
            return Err(LearnError::NotFound("Course not found".to_string()));
        }

        // Re-enrolling returns the existing row
        let existing: Option<Enrollment> = learn_enrollments::table
            .filter(learn_enrollments::user_id.eq(user_id))
            .filter(learn_enrollments::course_id.eq(course_id))
            .first(&mut conn)
            .optional()?;

        if let Some(enrollment) = existing {
            return Ok(enrollment);
        }

        let now = Utc::now();
        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            progress_percentage: 0,
            enrolled_at: now,
            last_accessed_at: now,
        };

        diesel::insert_into(learn_enrollments::table)
            .values(&enrollment)
            .on_conflict((learn_enrollments::user_id, learn_enrollments::course_id))
            .do_nothing()
            .execute(&mut conn)?;

        // A concurrent enroll may have won the insert; the stored row is
        // the source of truth either way.
        Ok(learn_enrollments::table
            .filter(learn_enrollments::user_id.eq(user_id))
            .filter(learn_enrollments::course_id.eq(course_id))
            .first::<Enrollment>(&mut conn)?)
    }

    pub async fn enrollments_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(Enrollment, Course)>, LearnError> {
        let mut conn = self.conn()?;
        Ok(learn_enrollments::table
            .inner_join(learn_courses::table)
            .filter(learn_enrollments::user_id.eq(user_id))
            .order(learn_enrollments::last_accessed_at.desc())
            .load::<(Enrollment, Course)>(&mut conn)?)
    }

    pub async fn completed_lesson_count(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<i64, LearnError> {
        let mut conn = self.conn()?;
        Ok(learn_lesson_completions::table
            .inner_join(learn_lessons::table)
            .filter(learn_lesson_completions::user_id.eq(user_id))
            .filter(learn_lessons::course_id.eq(course_id))
            .count()
            .get_result(&mut conn)?)
    }

    // ----- Certificate Operations -----

    pub async fn certificates_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Certificate>, LearnError> {
        let mut conn = self.conn()?;
        Ok(learn_certificates::table
            .filter(learn_certificates::user_id.eq(user_id))
            .order(learn_certificates::issued_at.desc())
            .load::<Certificate>(&mut conn)?)
    }

    /// Resolve a certificate number to the certificate plus the rows
    /// needed to render a public verification: student, course and
    /// instructor. A miss is `None`, not an error.
    pub async fn find_certificate_for_verification(
        &self,
        certificate_number: &str,
    ) -> Result<Option<(Certificate, User, Course, User)>, LearnError> {
        let mut conn = self.conn()?;

        let cert: Option<Certificate> = learn_certificates::table
            .filter(learn_certificates::certificate_number.eq(certificate_number))
            .first(&mut conn)
            .optional()?;

        let cert = match cert {
            Some(c) => c,
            None => return Ok(None),
        };

        let student: User = learn_users::table
            .filter(learn_users::id.eq(cert.user_id))
            .first(&mut conn)?;

        let course: Course = learn_courses::table
            .filter(learn_courses::id.eq(cert.course_id))
            .first(&mut conn)?;

        let instructor: User = learn_users::table
            .filter(learn_users::id.eq(course.instructor_id))
            .first(&mut conn)?;

        Ok(Some((cert, student, course, instructor)))
    }
}
