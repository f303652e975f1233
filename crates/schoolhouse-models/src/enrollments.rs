//! Enrollment records handed over by the enrollment subsystem.
//!
//! The record is an open field map. Only the fields that name a user
//! attribute are projected onto the new student.

use schoolhouse_core::serde::value_as_id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{BatchId, CourseId};
use crate::users::{NewUser, USER_ATTRIBUTES};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrollmentRecord(pub Map<String, Value>);

impl EnrollmentRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn course_id(&self) -> Option<CourseId> {
        self.get("course_id").and_then(value_as_id).map(CourseId::new)
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.get("batch_id").and_then(value_as_id).map(BatchId::new)
    }

    /// The subset of fields that are also user attributes. Null values are
    /// dropped and `*_id` references are normalized to integers.
    pub fn user_attributes(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(key, value)| USER_ATTRIBUTES.contains(&key.as_str()) && !value.is_null())
            .filter_map(|(key, value)| {
                if key.ends_with("_id") {
                    value_as_id(value).map(|id| (key.clone(), Value::from(id)))
                } else {
                    Some((key.clone(), value.clone()))
                }
            })
            .collect()
    }

    /// Applies [`Self::user_attributes`] to an empty draft.
    pub fn to_new_user(&self) -> Result<NewUser, serde_json::Error> {
        serde_json::from_value(Value::Object(self.user_attributes()))
    }
}

impl From<Map<String, Value>> for EnrollmentRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
