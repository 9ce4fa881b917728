use std::collections::HashSet;

use crate::models::{Member, Ministry};

use super::sender::{Channel, Recipient};

/// Which members a broadcast goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientSelection {
    All,
    District(String),
    Ministry(String),
    Members(Vec<String>),
}

impl RecipientSelection {
    /// Resolve the selection against the member list, keeping member order.
    /// An unknown ministry selects nobody.
    pub fn resolve(&self, members: &[Member], ministries: &[Ministry]) -> Vec<Recipient> {
        match self {
            RecipientSelection::All => members.iter().map(Recipient::from).collect(),
            RecipientSelection::District(district_id) => members
                .iter()
                .filter(|m| m.district_id.as_deref() == Some(district_id.as_str()))
                .map(Recipient::from)
                .collect(),
            RecipientSelection::Ministry(ministry_id) => {
                let Some(ministry) = ministries.iter().find(|m| &m.id == ministry_id) else {
                    return Vec::new();
                };
                members
                    .iter()
                    .filter(|m| ministry.includes(m))
                    .map(Recipient::from)
                    .collect()
            }
            RecipientSelection::Members(ids) => {
                let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
                members
                    .iter()
                    .filter(|m| wanted.contains(m.id.as_str()))
                    .map(Recipient::from)
                    .collect()
            }
        }
    }
}

/// Split recipients into those reachable on `channel` and the count of those
/// that are not. Order is preserved.
pub fn partition_eligible(recipients: Vec<Recipient>, channel: Channel) -> (Vec<Recipient>, usize) {
    let before = recipients.len();
    let eligible: Vec<Recipient> = recipients
        .into_iter()
        .filter(|r| channel.identifier(r).is_some())
        .collect();
    let skipped = before - eligible.len();
    (eligible, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, district: Option<&str>, email: Option<&str>) -> Member {
        Member {
            id: id.to_string(),
            first_name: id.to_uppercase(),
            district_id: district.map(str::to_string),
            email: email.map(str::to_string),
            ..Default::default()
        }
    }

    fn roster() -> Vec<Member> {
        vec![
            member("a", Some("d1"), Some("a@example.org")),
            member("b", Some("d2"), None),
            member("c", Some("d1"), Some(" ")),
            member("d", None, Some("d@example.org")),
        ]
    }

    fn ids(recipients: &[Recipient]) -> Vec<&str> {
        recipients.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_resolve_selections() {
        let members = roster();
        let ministries = vec![Ministry { id: "choir".into(), member_ids: vec!["d".into(), "b".into()], ..Default::default() }];

        assert_eq!(ids(&RecipientSelection::All.resolve(&members, &ministries)), vec!["a", "b", "c", "d"]);
        assert_eq!(ids(&RecipientSelection::District("d1".into()).resolve(&members, &ministries)), vec!["a", "c"]);
        assert_eq!(ids(&RecipientSelection::Ministry("choir".into()).resolve(&members, &ministries)), vec!["b", "d"]);
        assert!(RecipientSelection::Ministry("none".into()).resolve(&members, &ministries).is_empty());
        assert_eq!(
            ids(&RecipientSelection::Members(vec!["d".into(), "a".into(), "zz".into()]).resolve(&members, &ministries)),
            vec!["a", "d"]
        );
    }

    #[test]
    fn test_partition_eligible_for_email() {
        let recipients = RecipientSelection::All.resolve(&roster(), &[]);
        let (eligible, skipped) = partition_eligible(recipients, Channel::Email);
        assert_eq!(ids(&eligible), vec!["a", "d"]);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_partition_eligible_for_direct_message() {
        let mut members = roster();
        members[1].user_id = Some("uid-b".into());
        let recipients = RecipientSelection::All.resolve(&members, &[]);
        let (eligible, skipped) = partition_eligible(recipients, Channel::DirectMessage);
        assert_eq!(ids(&eligible), vec!["b"]);
        assert_eq!(skipped, 3);
    }
}
