//! Visitors from connect cards and the kanban-style follow-up pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum PipelineStage {
    #[default]
    NewGuest,
    Contacted,
    FollowUp,
    Connected,
    Member,
    Archived,
}

impl PipelineStage {
    /// Board column order
    pub const ALL: [PipelineStage; 6] = [
        PipelineStage::NewGuest,
        PipelineStage::Contacted,
        PipelineStage::FollowUp,
        PipelineStage::Connected,
        PipelineStage::Member,
        PipelineStage::Archived,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::NewGuest => "New Guest",
            PipelineStage::Contacted => "Contacted",
            PipelineStage::FollowUp => "Follow Up",
            PipelineStage::Connected => "Connected",
            PipelineStage::Member => "Member",
            PipelineStage::Archived => "Archived",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::NewGuest => "new_guest",
            PipelineStage::Contacted => "contacted",
            PipelineStage::FollowUp => "follow_up",
            PipelineStage::Connected => "connected",
            PipelineStage::Member => "member",
            PipelineStage::Archived => "archived",
        }
    }

    /// Accepts stored ids ("follow_up") and display labels ("Follow Up")
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "newguest" | "new" => Ok(PipelineStage::NewGuest),
            "contacted" => Ok(PipelineStage::Contacted),
            "followup" => Ok(PipelineStage::FollowUp),
            "connected" => Ok(PipelineStage::Connected),
            "member" => Ok(PipelineStage::Member),
            "archived" => Ok(PipelineStage::Archived),
            _ => Err(ValidationError::UnknownStage(s.to_string())),
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// Unknown stages land in the first column rather than failing the whole list
impl<'de> Deserialize<'de> for PipelineStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|s| PipelineStage::parse(&s).ok())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Visitor {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub stage: PipelineStage,
    pub notes: Option<String>,
    pub visit_date: Option<String>,
    pub assigned_to: Option<String>,
}

impl Visitor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Visitors grouped into stage columns
#[derive(Debug, Clone)]
pub struct PipelineBoard {
    pub columns: Vec<(PipelineStage, Vec<Visitor>)>,
}

impl PipelineBoard {
    /// Every stage gets a column, even when empty. Newest visits first;
    /// visitors without a visit date go last.
    pub fn from_visitors(visitors: &[Visitor]) -> Self {
        let columns = PipelineStage::ALL
            .iter()
            .map(|stage| {
                let mut column: Vec<Visitor> = visitors.iter().filter(|v| v.stage == *stage).cloned().collect();
                column.sort_by(|a, b| match (&a.visit_date, &b.visit_date) {
                    (Some(x), Some(y)) => y.cmp(x),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                });
                (*stage, column)
            })
            .collect();
        Self { columns }
    }

    pub fn column(&self, stage: PipelineStage) -> &[Visitor] {
        self.columns
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// Count of visitors still being followed up (everything but Member/Archived)
    pub fn active_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|(s, _)| !matches!(s, PipelineStage::Member | PipelineStage::Archived))
            .map(|(_, v)| v.len())
            .sum()
    }
}

/// Field patch for moving a visitor to another stage.
/// Returns None when the visitor is already in that stage.
pub fn move_visitor(visitor: &Visitor, target: PipelineStage, now: DateTime<Utc>) -> Option<Map<String, Value>> {
    if visitor.stage == target {
        return None;
    }
    let mut patch = Map::new();
    patch.insert("stage".to_string(), json!(target.as_str()));
    patch.insert("stageUpdatedAt".to_string(), json!(now.to_rfc3339()));
    Some(patch)
}

/// Fields of the stage patch stored as timestamps
pub const STAGE_PATCH_TIMESTAMPS: &[&str] = &["stageUpdatedAt"];

#[cfg(test)]
mod tests {
    use super::*;

    fn visitor(id: &str, stage: PipelineStage, date: Option<&str>) -> Visitor {
        Visitor {
            id: id.to_string(),
            first_name: id.to_string(),
            stage,
            visit_date: date.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_stage_parse_accepts_ids_and_labels() {
        assert_eq!(PipelineStage::parse("follow_up").unwrap(), PipelineStage::FollowUp);
        assert_eq!(PipelineStage::parse("Follow Up").unwrap(), PipelineStage::FollowUp);
        assert_eq!(PipelineStage::parse("NEW GUEST").unwrap(), PipelineStage::NewGuest);
        assert!(matches!(PipelineStage::parse("lost"), Err(ValidationError::UnknownStage(_))));
    }

    #[test]
    fn test_stage_deserialize_unknown_defaults_to_new_guest() {
        let v: Visitor = serde_json::from_str(r#"{"id":"v1","stage":"somewhere"}"#).unwrap();
        assert_eq!(v.stage, PipelineStage::NewGuest);
        let v: Visitor = serde_json::from_str(r#"{"id":"v1","stage":"Contacted"}"#).unwrap();
        assert_eq!(v.stage, PipelineStage::Contacted);
        let v: Visitor = serde_json::from_str(r#"{"id":"v1","stage":null}"#).unwrap();
        assert_eq!(v.stage, PipelineStage::NewGuest);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&PipelineStage::FollowUp).unwrap(), "\"follow_up\"");
        for stage in PipelineStage::ALL {
            assert_eq!(serde_json::to_value(stage).unwrap(), json!(stage.as_str()));
        }
    }

    #[test]
    fn test_board_groups_and_orders() {
        let visitors = vec![
            visitor("a", PipelineStage::NewGuest, Some("2026-01-04")),
            visitor("b", PipelineStage::NewGuest, None),
            visitor("c", PipelineStage::NewGuest, Some("2026-02-01")),
            visitor("d", PipelineStage::Archived, None),
            visitor("e", PipelineStage::Member, None),
        ];
        let board = PipelineBoard::from_visitors(&visitors);
        assert_eq!(board.columns.len(), 6);
        assert_eq!(board.columns.last().map(|(s, _)| *s), Some(PipelineStage::Archived));
        let ids: Vec<&str> = board.column(PipelineStage::NewGuest).iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(board.column(PipelineStage::Contacted).is_empty());
        assert_eq!(board.active_count(), 3);
    }

    #[test]
    fn test_move_visitor() {
        let now = Utc::now();
        let v = visitor("a", PipelineStage::NewGuest, None);
        assert!(move_visitor(&v, PipelineStage::NewGuest, now).is_none());
        let patch = move_visitor(&v, PipelineStage::Contacted, now).unwrap();
        assert_eq!(patch["stage"], json!("contacted"));
        assert_eq!(patch["stageUpdatedAt"], json!(now.to_rfc3339()));
    }
}
