//! Subject descriptors and the domain items an artifact references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Person a protocol is generated for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub gender: Gender,
    pub age: u32,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    #[serde(default)]
    pub allergies: Vec<String>,

    /// `None` means the medication list was never collected
    #[serde(default)]
    pub current_medications: Option<Vec<String>>,
}

impl Subject {
    /// Short description used in generated prose
    pub fn descriptor(&self) -> String {
        format!("{} subject, {} years old", self.gender.adjective(), self.age)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn adjective(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "non-binary",
        }
    }
}

/// One entry of a subject's clinical history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: DateTime<Utc>,
    pub description: String,
    pub kind: HistoryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Exam,
    Diagnosis,
    Procedure,
    Note,
}

/// Administration route of a medication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Oral,
    Injectable,
    Topical,
    Sublingual,
    Other,
}

/// A medication referenced by an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub id: String,
    pub name: String,
    pub active_ingredient: String,

    #[serde(default)]
    pub dosage: String,

    #[serde(default)]
    pub frequency: String,

    #[serde(default)]
    pub duration: String,

    #[serde(default)]
    pub route: Option<Route>,

    #[serde(default)]
    pub instructions: String,

    /// Availability as declared by whoever prescribed the item
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
}

fn default_in_stock() -> bool {
    true
}

impl Medication {
    /// Lowercased, trimmed active ingredient used for interaction lookups
    pub fn normalized_ingredient(&self) -> String {
        self.active_ingredient.trim().to_lowercase()
    }
}

/// A lab exam referenced by an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRequest {
    pub id: String,
    pub kind: ExamKind,
    pub description: String,
    pub requested_at: DateTime<Utc>,
    pub status: ExamStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamKind {
    Blood,
    Hormone,
    Imaging,
    Biopsy,
    Genetic,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    Requested,
    Scheduled,
    Completed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medication_defaults() {
        let json = r#"{"id":"m1","name":"Aspirin","activeIngredient":" Aspirin "}"#;
        let med: Medication = serde_json::from_str(json).unwrap();

        assert!(med.in_stock);
        assert!(med.route.is_none());
        assert_eq!(med.normalized_ingredient(), "aspirin");
    }

    #[test]
    fn test_subject_descriptor() {
        let subject = Subject {
            id: "s1".to_string(),
            name: "Joe".to_string(),
            gender: Gender::Male,
            age: 42,
            history: Vec::new(),
            allergies: Vec::new(),
            current_medications: None,
        };
        assert_eq!(subject.descriptor(), "male subject, 42 years old");
    }
}
