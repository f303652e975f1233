//! Course and batch models.
//!
//! Courses are ordered within their discipline by `index`, which must be
//! unique per discipline. Batches group students into cohorts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::ids::{BatchId, CourseId, DisciplineId, LevelId, UserId};

#[derive(Serialize, Deserialize, FromRow, Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    pub code: String,
    pub description: String,
    /// Length in weeks.
    pub duration: i32,
    /// Price in the smallest currency unit.
    pub price: i64,
    pub status: String,
    pub index: i32,
    pub discipline_id: DisciplineId,
    pub level_id: LevelId,
    pub teacher_id: UserId,
    pub tag_list: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct CreateCourseDto {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub code: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(range(min = 1))]
    pub duration: i32,
    #[validate(range(min = 0))]
    pub price: i64,
    #[validate(length(min = 1))]
    pub status: String,
    #[validate(range(min = 0))]
    pub index: i32,
    pub discipline_id: DisciplineId,
    pub level_id: LevelId,
    pub teacher_id: UserId,
    /// Comma-separated tags, as typed into the admin form.
    #[serde(default)]
    pub tags: String,
}

impl CreateCourseDto {
    pub fn tag_list(&self) -> Vec<String> {
        parse_tag_list(&self.tags)
    }
}

/// Splits `"ruby, rails,,web "` into `["ruby", "rails", "web"]`.
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Serialize, Deserialize, FromRow, Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: BatchId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto() -> CreateCourseDto {
        CreateCourseDto {
            name: "Rails Fundamentals".to_string(),
            code: "RF-101".to_string(),
            description: "Build web apps".to_string(),
            duration: 8,
            price: 49_900,
            status: "open".to_string(),
            index: 1,
            discipline_id: DisciplineId::new(1),
            level_id: LevelId::new(1),
            teacher_id: UserId::new(10),
            tags: "ruby, rails,,web ".to_string(),
        }
    }

    #[test]
    fn test_valid_course() {
        assert!(dto().validate().is_ok());
    }

    #[test]
    fn test_blank_name_is_invalid() {
        let course = CreateCourseDto {
            name: String::new(),
            ..dto()
        };
        let errors = course.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("name"));
    }

    #[test]
    fn test_zero_duration_is_invalid() {
        let course = CreateCourseDto {
            duration: 0,
            ..dto()
        };
        assert!(course.validate().is_err());
    }

    #[test]
    fn test_tag_list() {
        assert_eq!(dto().tag_list(), vec!["ruby", "rails", "web"]);
        assert!(parse_tag_list("").is_empty());
    }
}
