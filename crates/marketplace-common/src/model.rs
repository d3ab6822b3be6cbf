use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row from the project store. Fields are opaque and carried through unchanged;
/// only the title and abstract are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectRecord(pub Map<String, Value>);

impl ProjectRecord {
    /// `project_title`, falling back to `title`. Missing or non-string reads as "".
    pub fn title(&self) -> &str {
        self.first_text(&["project_title", "title"])
    }

    /// `abstract`, falling back to `description`. Missing or non-string reads as "".
    pub fn abstract_text(&self) -> &str {
        self.first_text(&["abstract", "description"])
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn first_text(&self, keys: &[&str]) -> &str {
        keys.iter()
            .filter_map(|k| self.0.get(*k).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .unwrap_or("")
    }
}

impl From<Map<String, Value>> for ProjectRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A project record annotated with its similarity to a search query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: ProjectRecord,
    pub similarity_score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Examiner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Examiner => "examiner",
        }
    }
}

/// Row in the `profiles` table, keyed by the auth provider's user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> ProjectRecord {
        serde_json::from_value(value).expect("object")
    }

    #[test]
    fn test_title_prefers_project_title() {
        let r = record(json!({"project_title": "Voting", "title": "Other"}));
        assert_eq!(r.title(), "Voting");
        let r = record(json!({"title": "Fallback"}));
        assert_eq!(r.title(), "Fallback");
    }

    #[test]
    fn test_abstract_falls_back_to_description() {
        let r = record(json!({"description": "desc"}));
        assert_eq!(r.abstract_text(), "desc");
        let r = record(json!({"abstract": "", "description": "desc"}));
        assert_eq!(r.abstract_text(), "desc");
    }

    #[test]
    fn test_missing_or_non_string_fields_read_empty() {
        let r = record(json!({"title": 42, "id": 7}));
        assert_eq!(r.title(), "");
        assert_eq!(r.abstract_text(), "");
    }

    #[test]
    fn test_scored_record_serializes_flat() {
        let scored = ScoredRecord {
            record: record(json!({"id": 1, "project_title": "A"})),
            similarity_score: 88,
        };
        let v = serde_json::to_value(&scored).unwrap();
        assert_eq!(v, json!({"id": 1, "project_title": "A", "similarity_score": 88}));
    }

    #[test]
    fn test_role_round_trips_lowercase() {
        let role: Role = serde_json::from_value(json!("examiner")).unwrap();
        assert_eq!(role, Role::Examiner);
        assert_eq!(serde_json::to_value(Role::Teacher).unwrap(), json!("teacher"));
        assert!(serde_json::from_value::<Role>(json!("admin")).is_err());
    }
}
