//! Exchange-rate pass-through for the currency converter widget. No caching,
//! no transformation; just the remote table keyed by currency code.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::AppError;

#[derive(Clone)]
pub struct RatesService {
    http: Client,
    api_base: Url,
}

#[derive(Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

impl RatesService {
    pub fn new(http: Client, api_base: Url) -> Self {
        Self { http, api_base }
    }

    pub async fn fetch(&self, base: &str) -> Result<HashMap<String, f64>, AppError> {
        let base = base.trim().to_uppercase();
        if base.len() != 3 || !base.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(AppError::BadRequest(format!(
                "'{base}' is not a currency code"
            )));
        }

        let url = self
            .api_base
            .join(&format!("v6/latest/{base}"))
            .map_err(|err| AppError::Config(format!("invalid rates endpoint: {err}")))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("rate fetch failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "rate provider returned {}",
                response.status()
            )));
        }

        let parsed: RatesResponse = response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("rate table unreadable: {err}")))?;
        Ok(parsed.rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_currency_codes_before_any_request() {
        let service = RatesService::new(
            Client::new(),
            Url::parse("https://example.invalid/").expect("url"),
        );
        assert!(matches!(
            service.fetch("US").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service.fetch("12$").await,
            Err(AppError::BadRequest(_))
        ));
    }
}
