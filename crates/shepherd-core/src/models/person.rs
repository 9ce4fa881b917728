use serde::{Deserialize, Serialize};

use crate::utils::{cmp_ignore_case, contains_ignore_case, non_blank};

/// A postal address, as resolved from the places autocomplete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Address {
    /// Five-digit ZIP, dropping any +4 suffix
    pub fn zip5(&self) -> Option<String> {
        let digits: String = self
            .postal_code
            .chars()
            .take_while(|c| *c != '-')
            .filter(|c| c.is_ascii_digit())
            .collect();
        if digits.len() >= 5 {
            Some(digits[..5].to_string())
        } else {
            None
        }
    }

    pub fn one_line(&self) -> String {
        let parts: Vec<&str> = [
            self.street.as_str(),
            self.city.as_str(),
            self.state.as_str(),
            self.postal_code.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect();
        parts.join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.one_line().is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Member {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Identity-provider uid when the member has an app account
    pub user_id: Option<String>,
    pub family_id: Option<String>,
    pub district_id: Option<String>,
    pub ministry_ids: Vec<String>,
    pub address: Option<Address>,
    pub status: Option<String>,
    pub role: Option<String>,
}

impl Member {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// "Last, First" for roster listings
    pub fn sort_name(&self) -> String {
        match (self.last_name.is_empty(), self.first_name.is_empty()) {
            (true, _) => self.first_name.clone(),
            (_, true) => self.last_name.clone(),
            _ => format!("{}, {}", self.last_name, self.first_name),
        }
    }

    pub fn email_address(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    pub fn account_uid(&self) -> Option<&str> {
        non_blank(self.user_id.as_deref())
    }

    pub fn zip5(&self) -> Option<String> {
        self.address.as_ref().and_then(Address::zip5)
    }

    pub fn last_initial(&self) -> Option<char> {
        self.last_name
            .trim()
            .chars()
            .next()
            .filter(|c| c.is_alphabetic())
            .map(|c| c.to_ascii_uppercase())
    }

    /// Search across name, email and phone
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }
        contains_ignore_case(&self.full_name(), query)
            || self.email.as_deref().map(|e| contains_ignore_case(e, query)).unwrap_or(false)
            || self.phone.as_deref().map(|p| p.contains(query)).unwrap_or(false)
    }

    pub fn in_ministry(&self, ministry_id: &str) -> bool {
        self.ministry_ids.iter().any(|id| id == ministry_id)
    }
}

/// Sort members by last name, then first name (case-insensitive)
pub fn sort_members(members: &mut [Member]) {
    members.sort_by(|a, b| {
        cmp_ignore_case(&a.last_name, &b.last_name)
            .then_with(|| cmp_ignore_case(&a.first_name, &b.first_name))
    });
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Family {
    pub id: String,
    pub name: String,
    pub member_ids: Vec<String>,
    pub address: Option<Address>,
}

impl Family {
    pub fn display_member_count(&self) -> String {
        match self.member_ids.len() {
            1 => "1 member".to_string(),
            n => format!("{} members", n),
        }
    }
}
