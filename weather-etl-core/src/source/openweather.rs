use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response};

use crate::error::{PipelineError, Result, truncate_body};

use super::WeatherSource;

const CURRENT_WEATHER_PATH: &str = "/data/2.5/weather";

#[derive(Clone)]
pub struct OpenWeatherSource {
    base_url: String,
    city: String,
    api_key: String,
    http: Client,
}

impl OpenWeatherSource {
    pub fn new(base_url: String, city: String, api_key: String, http: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            city,
            api_key,
            http,
        }
    }

    fn url(&self) -> String {
        format!("{}{CURRENT_WEATHER_PATH}", self.base_url)
    }

    /// The request URL carries the API key, so errors are stripped of it.
    async fn get(&self) -> Result<Response> {
        self.http
            .get(self.url())
            .query(&[("q", self.city.as_str()), ("appid", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(e.without_url()))
    }
}

impl std::fmt::Debug for OpenWeatherSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherSource")
            .field("base_url", &self.base_url)
            .field("city", &self.city)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherSource {
    fn describe(&self) -> String {
        format!("{}?q={}", self.url(), self.city)
    }

    async fn probe(&self) -> Result<()> {
        let res = self.get().await?;
        let status = res.status();

        if status.is_success() {
            Ok(())
        } else {
            Err(PipelineError::NotReady(format!("status {status}")))
        }
    }

    async fn extract(&self) -> Result<serde_json::Value> {
        let res = self.get().await?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| PipelineError::Unreachable(e.without_url()))?;

        debug!("OpenWeather response ({status}): {}", truncate_body(&body));

        if !status.is_success() {
            return Err(PipelineError::Status { status, body: truncate_body(&body) });
        }

        serde_json::from_str(&body).map_err(PipelineError::MalformedResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_ignores_trailing_slash() {
        let source = OpenWeatherSource::new(
            "https://api.openweathermap.org/".into(),
            "boston".into(),
            "KEY".into(),
            Client::new(),
        );
        assert_eq!(source.url(), "https://api.openweathermap.org/data/2.5/weather");
    }

    #[tokio::test]
    async fn unreachable_endpoint_error_omits_api_key() {
        let source = OpenWeatherSource::new(
            "http://127.0.0.1:1".into(),
            "boston".into(),
            "SUPERSECRETKEY".into(),
            Client::new(),
        );

        let err = source.probe().await.unwrap_err();
        assert!(matches!(err, PipelineError::Unreachable(_)));
        assert!(!err.to_string().contains("SUPERSECRETKEY"));
        assert!(!format!("{err:?}").contains("SUPERSECRETKEY"));

        let err = source.extract().await.unwrap_err();
        assert!(!err.to_string().contains("SUPERSECRETKEY"));
    }
}
