//! Payment intent creation for paid event registration.
//!
//! Card collection happens in the hosted payment element; the server-side
//! function only needs the assembled amount to create an intent.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::Checkout;

use super::ApiError;

const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    pub amount: i64,
    pub currency: String,
    pub event_id: String,
    pub quantity: u32,
    pub tip_cents: i64,
    pub email: Option<String>,
}

impl PaymentIntentRequest {
    pub fn from_checkout(checkout: &Checkout, email: Option<&str>) -> Self {
        Self {
            amount: checkout.total_cents(),
            currency: DEFAULT_CURRENCY.to_string(),
            event_id: checkout.event_id.clone(),
            quantity: checkout.quantity,
            tip_cents: checkout.tip_cents,
            email: email.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub client_secret: String,
    #[serde(alias = "id")]
    pub payment_intent_id: String,
}

#[derive(Clone)]
pub struct PaymentsClient {
    client: Client,
    functions_url: String,
    token: Option<String>,
}

impl PaymentsClient {
    pub fn new(client: Client, functions_url: impl Into<String>) -> Self {
        Self {
            client,
            functions_url: functions_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    pub async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> Result<PaymentIntent> {
        let url = format!("{}/createPaymentIntent", self.functions_url);
        let mut builder = self.client.post(&url).json(request);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .context("Failed to send payment intent request")?;

        let response = ApiError::check(response).await?;
        let intent: PaymentIntent = response.json().await.context("Failed to parse payment intent")?;
        info!(
            event_id = %request.event_id,
            amount = request.amount,
            intent = %intent.payment_intent_id,
            "Payment intent created"
        );
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Event;

    #[test]
    fn test_request_from_checkout() {
        let event = Event {
            id: "retreat".to_string(),
            title: "Retreat".to_string(),
            ticket_price_cents: Some(4000),
            registration_open: true,
            ..Default::default()
        };
        let checkout = Checkout::build(&event, 2, 300).unwrap();
        let request = PaymentIntentRequest::from_checkout(&checkout, Some("ada@example.org"));
        assert_eq!(request.amount, 8300);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["eventId"], "retreat");
        assert_eq!(value["tipCents"], 300);
        assert_eq!(value["currency"], "usd");
    }

    #[test]
    fn test_parse_intent_accepts_id_alias() {
        let a: PaymentIntent = serde_json::from_str(r#"{"clientSecret":"cs_1","paymentIntentId":"pi_1"}"#).unwrap();
        let b: PaymentIntent = serde_json::from_str(r#"{"clientSecret":"cs_1","id":"pi_1"}"#).unwrap();
        assert_eq!(a, b);
    }
}
