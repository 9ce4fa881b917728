use serde::{Deserialize, Serialize};

use super::person::Member;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Ministry {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub leader_ids: Vec<String>,
    pub member_ids: Vec<String>,
}

impl Ministry {
    /// Membership is recorded on both sides; either one counts
    pub fn includes(&self, member: &Member) -> bool {
        self.member_ids.iter().any(|id| id == &member.id)
            || self.leader_ids.iter().any(|id| id == &member.id)
            || member.in_ministry(&self.id)
    }

    pub fn display_member_count(&self) -> String {
        match self.member_ids.len() {
            1 => "1 member".to_string(),
            n => format!("{} members", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_includes_either_side() {
        let ministry = Ministry {
            id: "choir".to_string(),
            member_ids: vec!["m1".to_string()],
            leader_ids: vec!["m9".to_string()],
            ..Default::default()
        };
        let listed = Member { id: "m1".to_string(), ..Default::default() };
        let tagged = Member { id: "m2".to_string(), ministry_ids: vec!["choir".to_string()], ..Default::default() };
        let leader = Member { id: "m9".to_string(), ..Default::default() };
        let other = Member { id: "m3".to_string(), ..Default::default() };
        assert!(ministry.includes(&listed));
        assert!(ministry.includes(&tagged));
        assert!(ministry.includes(&leader));
        assert!(!ministry.includes(&other));
        assert_eq!(ministry.display_member_count(), "1 member");
    }
}
