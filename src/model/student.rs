use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type StudentId = u64;
pub type GradeId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(
    example = json!({
        "id": 12,
        "roll_number": "GR03007",
        "name": "Ayesha Rahman",
        "grade_id": 3,
        "parent_contacts": ["+8801712345678"],
        "active": true
    })
)]
pub struct Student {
    pub id: StudentId,
    pub roll_number: String,
    pub name: String,
    pub grade_id: GradeId,
    /// Up to two parent numbers, blanks already dropped.
    pub parent_contacts: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Grade {
    pub id: GradeId,
    pub grade_name: String,
    pub description: Option<String>,
}

/// Row shape of the `students` table.
#[derive(Debug, sqlx::FromRow)]
pub struct StudentRow {
    pub id: u64,
    pub roll_number: String,
    pub student_name: String,
    pub grade_id: u64,
    pub parent_phone1: Option<String>,
    pub parent_phone2: Option<String>,
    pub is_active: bool,
}

impl From<StudentRow> for Student {
    fn from(row: StudentRow) -> Self {
        let parent_contacts = [row.parent_phone1, row.parent_phone2]
            .into_iter()
            .flatten()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        Student {
            id: row.id,
            roll_number: row.roll_number,
            name: row.student_name,
            grade_id: row.grade_id,
            parent_contacts,
            active: row.is_active,
        }
    }
}

/// Roll numbers look like `GR03007`: two-digit grade, three-digit sequence.
pub fn roll_number(grade_id: GradeId, existing_in_grade: u64) -> String {
    format!("GR{:02}{:03}", grade_id, existing_in_grade + 1)
}
