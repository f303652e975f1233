use schoolhouse_core::AppError;
use schoolhouse_core::errors::field_error;
use schoolhouse_models::{Course, CreateCourseDto, UserAttributes};
use tracing::{info, instrument};
use validator::{Validate, ValidationErrors};

use crate::store::{StoreError, UserStore};

pub struct CourseService;

impl CourseService {
    /// Field rules, then the teacher reference and the per-discipline
    /// uniqueness of `index`.
    pub async fn validate(
        store: &dyn UserStore,
        dto: &CreateCourseDto,
    ) -> Result<Result<(), ValidationErrors>, AppError> {
        if let Err(errors) = dto.validate() {
            return Ok(Err(errors));
        }

        let mut errors = ValidationErrors::new();

        let teacher = store
            .find_user(dto.teacher_id)
            .await
            .map_err(StoreError::into_app_error)?;
        if !teacher.is_some_and(|user| user.is_teacher()) {
            errors.add("teacher", field_error("not_a_teacher", "must be a teacher"));
        }

        let taken = store
            .course_index_taken(dto.discipline_id, dto.index)
            .await
            .map_err(StoreError::into_app_error)?;
        if taken {
            errors.add("index", field_error("taken", "has already been taken"));
        }

        Ok(if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        })
    }

    #[instrument(skip(store, dto), fields(code = %dto.code))]
    pub async fn create_course(
        store: &dyn UserStore,
        dto: CreateCourseDto,
    ) -> Result<Course, AppError> {
        Self::validate(store, &dto)
            .await?
            .map_err(AppError::validation)?;

        // the unique index still guards against a concurrent insert
        let course = store
            .insert_course(&dto)
            .await
            .map_err(StoreError::into_app_error)?;

        info!(course_id = %course.id, "course created");
        Ok(course)
    }
}
