//! Google Places lookups used to turn free-text addresses into structured
//! components for district assignment.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Address;

use super::ApiError;

pub const DEFAULT_PLACES_URL: &str = "https://maps.googleapis.com/maps/api/place";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prediction {
    pub description: String,
    pub place_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressComponent {
    pub long_name: String,
    pub short_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

impl AddressComponent {
    fn has_type(&self, kind: &str) -> bool {
        self.types.iter().any(|t| t == kind)
    }
}

#[derive(Debug, Deserialize)]
struct AutocompleteResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
    status: String,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    result: Option<DetailsResult>,
    status: String,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResult {
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

/// Places answers HTTP 200 with a status field; anything but OK/ZERO_RESULTS is an error
fn check_status(status: &str, error_message: Option<&str>) -> Result<()> {
    match status {
        "OK" | "ZERO_RESULTS" => Ok(()),
        other => bail!("Places API returned {}: {}", other, error_message.unwrap_or("no details")),
    }
}

/// Reduce Places address components to a street/city/state/postal address
pub fn address_from_components(components: &[AddressComponent]) -> Address {
    let find = |kind: &str| components.iter().find(|c| c.has_type(kind));

    let street_number = find("street_number").map(|c| c.long_name.as_str()).unwrap_or("");
    let route = find("route").map(|c| c.long_name.as_str()).unwrap_or("");
    let street = format!("{} {}", street_number, route).trim().to_string();

    let city = find("locality")
        .or_else(|| find("postal_town"))
        .or_else(|| find("sublocality"))
        .map(|c| c.long_name.clone())
        .unwrap_or_default();

    let state = find("administrative_area_level_1")
        .map(|c| c.short_name.clone())
        .unwrap_or_default();

    let mut postal_code = find("postal_code").map(|c| c.long_name.clone()).unwrap_or_default();
    if let Some(suffix) = find("postal_code_suffix") {
        if !postal_code.is_empty() {
            postal_code = format!("{}-{}", postal_code, suffix.long_name);
        }
    }

    Address { street, city, state, postal_code }
}

#[derive(Clone)]
pub struct PlacesClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PlacesClient {
    pub fn new(client: Client, api_key: String) -> Self {
        Self {
            client,
            base_url: DEFAULT_PLACES_URL.to_string(),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Address predictions for partial input
    pub async fn autocomplete(&self, input: &str) -> Result<Vec<Prediction>> {
        let url = format!("{}/autocomplete/json", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("input", input), ("types", "address"), ("key", self.api_key.as_str())])
            .send()
            .await
            .context("Failed to send autocomplete request")?;

        let response = ApiError::check(response).await?;
        let parsed: AutocompleteResponse = response.json().await.context("Failed to parse autocomplete response")?;
        check_status(&parsed.status, parsed.error_message.as_deref())?;
        debug!(count = parsed.predictions.len(), "Address predictions received");
        Ok(parsed.predictions)
    }

    /// Structured address for a prediction's place id
    pub async fn place_address(&self, place_id: &str) -> Result<Address> {
        let url = format!("{}/details/json", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("place_id", place_id), ("fields", "address_component"), ("key", self.api_key.as_str())])
            .send()
            .await
            .context("Failed to send place details request")?;

        let response = ApiError::check(response).await?;
        let parsed: DetailsResponse = response.json().await.context("Failed to parse place details response")?;
        check_status(&parsed.status, parsed.error_message.as_deref())?;
        let components = parsed.result.map(|r| r.address_components).unwrap_or_default();
        Ok(address_from_components(&components))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_details_response() {
        let json = r#"{
            "result": {"address_components": [
                {"long_name": "1600", "short_name": "1600", "types": ["street_number"]},
                {"long_name": "Amphitheatre Parkway", "short_name": "Amphitheatre Pkwy", "types": ["route"]},
                {"long_name": "Mountain View", "short_name": "Mountain View", "types": ["locality", "political"]},
                {"long_name": "California", "short_name": "CA", "types": ["administrative_area_level_1", "political"]},
                {"long_name": "94043", "short_name": "94043", "types": ["postal_code"]},
                {"long_name": "1351", "short_name": "1351", "types": ["postal_code_suffix"]}
            ]},
            "status": "OK"
        }"#;
        let parsed: DetailsResponse = serde_json::from_str(json).unwrap();
        let address = address_from_components(&parsed.result.unwrap().address_components);
        assert_eq!(
            address,
            Address {
                street: "1600 Amphitheatre Parkway".into(),
                city: "Mountain View".into(),
                state: "CA".into(),
                postal_code: "94043-1351".into(),
            }
        );
        assert_eq!(address.zip5().as_deref(), Some("94043"));
    }

    #[test]
    fn test_address_falls_back_to_postal_town() {
        let components = vec![
            AddressComponent { long_name: "Main St".into(), short_name: "Main St".into(), types: vec!["route".into()] },
            AddressComponent { long_name: "Bath".into(), short_name: "Bath".into(), types: vec!["postal_town".into()] },
        ];
        let address = address_from_components(&components);
        assert_eq!(address.street, "Main St");
        assert_eq!(address.city, "Bath");
        assert_eq!(address.postal_code, "");
    }

    #[test]
    fn test_check_status() {
        assert!(check_status("OK", None).is_ok());
        assert!(check_status("ZERO_RESULTS", None).is_ok());
        let err = check_status("REQUEST_DENIED", Some("bad key")).unwrap_err();
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn test_parse_autocomplete() {
        let json = r#"{"predictions":[{"description":"12 Elm St, Salem, OR, USA","place_id":"abc","types":["street_address"]}],"status":"OK"}"#;
        let parsed: AutocompleteResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.predictions[0].place_id, "abc");
    }
}
