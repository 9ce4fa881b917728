use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::utils::format_cents;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// RFC 3339 start time
    pub start: Option<String>,
    pub end: Option<String>,
    pub location: Option<String>,
    pub ticket_price_cents: Option<i64>,
    pub capacity: Option<u32>,
    pub registered_count: u32,
    pub registration_open: bool,
}

impl Event {
    pub fn is_free(&self) -> bool {
        self.ticket_price_cents.unwrap_or(0) == 0
    }

    pub fn spots_left(&self) -> Option<u32> {
        self.capacity.map(|cap| cap.saturating_sub(self.registered_count))
    }

    pub fn formatted_date(&self) -> String {
        match &self.start {
            Some(date) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
                    dt.format("%b %d, %Y").to_string()
                } else {
                    // Fall back to raw date string
                    date.chars().take(10).collect()
                }
            }
            None => "TBD".to_string(),
        }
    }

    pub fn price_display(&self) -> String {
        if self.is_free() {
            "Free".to_string()
        } else {
            format_cents(self.ticket_price_cents.unwrap_or(0))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum RegistrationStatus {
    #[default]
    Pending,
    Paid,
    Free,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Registration {
    pub id: String,
    pub event_id: String,
    pub member_id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub quantity: u32,
    pub tip_cents: i64,
    pub total_cents: i64,
    pub payment_intent_id: Option<String>,
    pub status: RegistrationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub label: String,
    pub unit_amount_cents: i64,
    pub quantity: u32,
    pub amount_cents: i64,
}

/// Line items for one registration: tickets plus an optional tip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkout {
    pub event_id: String,
    pub quantity: u32,
    pub tip_cents: i64,
    pub line_items: Vec<LineItem>,
}

impl Checkout {
    pub fn build(event: &Event, quantity: u32, tip_cents: i64) -> Result<Self, ValidationError> {
        if quantity == 0 {
            return Err(ValidationError::InvalidQuantity);
        }
        if tip_cents < 0 {
            return Err(ValidationError::NegativeTip);
        }
        let price = event.ticket_price_cents.unwrap_or(0);
        if price < 0 {
            return Err(ValidationError::NegativePrice);
        }
        if !event.registration_open {
            return Err(ValidationError::RegistrationClosed(event.title.clone()));
        }
        if let Some(available) = event.spots_left() {
            if quantity > available {
                return Err(ValidationError::OverCapacity { event: event.title.clone(), available });
            }
        }

        let amount_cents = price
            .checked_mul(i64::from(quantity))
            .filter(|amount| amount.checked_add(tip_cents).is_some())
            .ok_or(ValidationError::AmountTooLarge)?;

        let mut line_items = vec![LineItem {
            label: format!("{} ticket", event.title),
            unit_amount_cents: price,
            quantity,
            amount_cents,
        }];
        if tip_cents > 0 {
            line_items.push(LineItem {
                label: "Tip".to_string(),
                unit_amount_cents: tip_cents,
                quantity: 1,
                amount_cents: tip_cents,
            });
        }

        Ok(Self { event_id: event.id.clone(), quantity, tip_cents, line_items })
    }

    pub fn total_cents(&self) -> i64 {
        self.line_items.iter().map(|item| item.amount_cents).sum()
    }

    /// Free tickets with no tip skip the payment gateway entirely
    pub fn requires_payment(&self) -> bool {
        self.total_cents() > 0
    }

    pub fn to_registration(&self, name: &str, email: Option<&str>, member_id: Option<&str>) -> Registration {
        Registration {
            id: String::new(),
            event_id: self.event_id.clone(),
            member_id: member_id.map(str::to_string),
            name: name.to_string(),
            email: email.map(str::to_string),
            quantity: self.quantity,
            tip_cents: self.tip_cents,
            total_cents: self.total_cents(),
            payment_intent_id: None,
            status: if self.requires_payment() { RegistrationStatus::Pending } else { RegistrationStatus::Free },
        }
    }
}
