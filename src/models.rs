use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "course_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "lesson_content_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Text,
    Quiz,
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: Role,
    pub avatar: Option<String>,
    pub oauth_provider: String,
    #[serde(skip_serializing)]
    pub oauth_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub instructor_id: i32,
    pub category_id: Option<i32>,
    pub price: f64,
    pub thumbnail: Option<String>, // "/uploads/thumbnails/<file>" or an external URL
    pub status: CourseStatus,
    pub is_published: bool,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    pub fn is_visible(&self) -> bool {
        self.status == CourseStatus::Approved && self.is_published
    }
}

/// A course row joined with the names and counts every listing shows.
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct CourseListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub course: Course,
    pub instructor_name: String,
    pub category_name: Option<String>,
    pub students_count: i64,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Module {
    pub id: i32,
    pub course_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Lesson {
    pub id: i32,
    pub module_id: i32,
    pub title: String,
    pub content_type: ContentType,
    pub content_url: Option<String>,
    pub duration: i32,
    pub description: Option<String>,
    pub order: i32,
    pub created_at: DateTime<Utc>,
}

/// One question of a lesson quiz. `correct_answer` holds the option index for
/// multiple choice and 1/0 for true/false; short answers keep their text in `answer`.
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Question {
    pub id: i32,
    pub lesson_id: i32,
    pub question: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub options: sqlx::types::Json<Vec<String>>,
    pub correct_answer: i32,
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct QuizAttempt {
    pub id: i32,
    pub user_id: i32,
    pub lesson_id: i32,
    pub score: i32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Assignment {
    pub id: i32,
    pub lesson_id: i32,
    pub title: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Submission {
    pub id: i32,
    pub assignment_id: i32,
    pub user_id: i32,
    pub submission_url: Option<String>,
    pub submission_text: Option<String>,
    pub submission_file_url: Option<String>,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

/// An assignment as one student sees it: the row plus their own submission state.
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct AssignmentStatus {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub assignment: Assignment,
    pub lesson_title: String,
    pub submission_id: Option<i32>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Enrollment {
    pub id: i32,
    pub user_id: i32,
    pub course_id: i32,
    pub enrolled_at: DateTime<Utc>,
    pub progress: i32,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Review {
    pub id: i32,
    pub course_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn course(status: CourseStatus, is_published: bool) -> Course {
        Course {
            id: 1,
            title: "Rust".into(),
            description: "Ownership".into(),
            instructor_id: 2,
            category_id: None,
            price: 0.0,
            thumbnail: None,
            status,
            is_published,
            rejection_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn visibility_needs_approval_and_publication() {
        assert!(course(CourseStatus::Approved, true).is_visible());
        assert!(!course(CourseStatus::Approved, false).is_visible());
        assert!(!course(CourseStatus::Pending, true).is_visible());
        assert!(!course(CourseStatus::Rejected, true).is_visible());
    }

    #[test]
    fn deadline_check() {
        let now = Utc::now();
        let mut a = Assignment {
            id: 1,
            lesson_id: 1,
            title: "Essay".into(),
            description: "500 words".into(),
            deadline: None,
            created_at: now,
        };
        assert!(!a.deadline_passed(now));
        a.deadline = Some(now - Duration::minutes(1));
        assert!(a.deadline_passed(now));
        a.deadline = Some(now + Duration::minutes(1));
        assert!(!a.deadline_passed(now));
    }

    #[test]
    fn question_type_serializes_as_column_name() {
        let v = serde_json::to_value(QuestionType::MultipleChoice).unwrap();
        assert_eq!(v, "multiple_choice");
        let r: Role = serde_json::from_str("\"instructor\"").unwrap();
        assert_eq!(r, Role::Instructor);
    }
}
