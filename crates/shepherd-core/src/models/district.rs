//! Districts (pastoral-care groups) and assignment of members to them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::person::Member;

/// Inclusive range of last-name initials, e.g. A..=F
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LetterRange {
    pub start: char,
    pub end: char,
}

impl LetterRange {
    pub fn contains(&self, letter: char) -> bool {
        let letter = letter.to_ascii_uppercase();
        self.start.to_ascii_uppercase() <= letter && letter <= self.end.to_ascii_uppercase()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct District {
    pub id: String,
    pub name: String,
    pub leader_id: Option<String>,
    pub member_ids: Vec<String>,
    pub postal_codes: Vec<String>,
    pub letter_range: Option<LetterRange>,
    pub color: Option<String>,
}

impl District {
    pub fn covers_postal_code(&self, zip5: &str) -> bool {
        self.postal_codes
            .iter()
            .any(|code| code.trim().get(..5).unwrap_or(code.trim()) == zip5)
    }

    pub fn covers_initial(&self, initial: char) -> bool {
        self.letter_range.map(|r| r.contains(initial)).unwrap_or(false)
    }
}

/// How members are matched to districts
#[derive(Debug, Clone)]
pub enum AssignmentStrategy {
    /// Explicit member id -> district id mapping
    Manual(HashMap<String, String>),
    PostalCode,
    Alphabetical,
    /// Follow the district most of the member's family is already in
    Affinity,
}

/// A proposed move of one member into a district
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub member_id: String,
    pub member_name: String,
    pub from: Option<String>,
    pub to: String,
}

/// Propose district assignments. Members already in the proposed district
/// produce no entry; members with no match are left alone.
pub fn assign_districts(
    members: &[Member],
    districts: &[District],
    strategy: &AssignmentStrategy,
) -> Vec<Assignment> {
    let family_majority = match strategy {
        AssignmentStrategy::Affinity => family_majority_districts(members, districts),
        _ => HashMap::new(),
    };

    let mut assignments = Vec::new();
    for member in members {
        let target: Option<&str> = match strategy {
            AssignmentStrategy::Manual(mapping) => match mapping.get(&member.id) {
                Some(district_id) if districts.iter().any(|d| &d.id == district_id) => {
                    Some(district_id.as_str())
                }
                Some(district_id) => {
                    warn!(member = %member.id, district = %district_id, "Unknown district in manual assignment");
                    None
                }
                None => None,
            },
            AssignmentStrategy::PostalCode => member.zip5().and_then(|zip| {
                districts
                    .iter()
                    .find(|d| d.covers_postal_code(&zip))
                    .map(|d| d.id.as_str())
            }),
            AssignmentStrategy::Alphabetical => member.last_initial().and_then(|initial| {
                districts
                    .iter()
                    .find(|d| d.covers_initial(initial))
                    .map(|d| d.id.as_str())
            }),
            AssignmentStrategy::Affinity => member
                .family_id
                .as_ref()
                .and_then(|family| family_majority.get(family))
                .map(String::as_str),
        };

        let Some(target) = target else {
            continue;
        };
        if member.district_id.as_deref() == Some(target) {
            continue;
        }
        assignments.push(Assignment {
            member_id: member.id.clone(),
            member_name: member.full_name(),
            from: member.district_id.clone(),
            to: target.to_string(),
        });
    }

    debug!(count = assignments.len(), ?strategy, "District assignments proposed");
    assignments
}

/// For each family, the district most of its assigned members belong to.
/// Ties go to the lowest district id.
fn family_majority_districts(members: &[Member], districts: &[District]) -> HashMap<String, String> {
    let mut counts: HashMap<&str, BTreeMap<&str, usize>> = HashMap::new();
    for member in members {
        let (Some(family), Some(district)) = (member.family_id.as_deref(), member.district_id.as_deref()) else {
            continue;
        };
        if !districts.iter().any(|d| d.id == district) {
            continue;
        }
        *counts.entry(family).or_default().entry(district).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(family, per_district)| {
            // BTreeMap iterates in id order; keep the first maximum
            let mut best: Option<(&str, usize)> = None;
            for (district, count) in per_district {
                if best.map(|(_, c)| count > c).unwrap_or(true) {
                    best = Some((district, count));
                }
            }
            best.map(|(district, _)| (family.to_string(), district.to_string()))
        })
        .collect()
}
