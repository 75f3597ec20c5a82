use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::directory::{Facility, Profile};
use uuid::Uuid;

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.clone(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("API error ({}): {}", status, text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", text),
                404 => anyhow!("Resource not found: {}", text),
                409 => anyhow!("Unique constraint violation: {}", text),
                _ => anyhow!("API error ({}): {}", status, text),
            });
        }

        // `Prefer: return=minimal` answers with an empty body.
        if text.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }

        Ok(serde_json::from_str::<T>(&text)?)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_profile(&self, user_id: Uuid, auth_token: &str) -> Result<Option<Profile>> {
        let path = format!("/rest/v1/profiles?id=eq.{}&limit=1", user_id);
        let rows: Vec<Profile> = self.request(Method::GET, &path, Some(auth_token), None).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn get_facility(&self, facility_id: Uuid, auth_token: &str) -> Result<Option<Facility>> {
        let path = format!("/rest/v1/facilities?id=eq.{}&limit=1", facility_id);
        let rows: Vec<Facility> = self.request(Method::GET, &path, Some(auth_token), None).await?;
        Ok(rows.into_iter().next())
    }
}

/// `Prefer` header asking PostgREST to echo the affected rows.
pub fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

/// `Prefer` header for an upsert that merges on the `on_conflict` columns.
pub fn upsert_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Prefer",
        HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};
    use wiremock::matchers::{header, method, path};

    fn config_for(url: &str) -> AppConfig {
        let mut config = AppConfig::from_env();
        config.supabase_url = url.to_string();
        config.supabase_anon_key = "anon".to_string();
        config
    }

    #[tokio::test]
    async fn sends_prefer_header_and_parses_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/reminders"))
            .and(|request: &Request| {
                request.headers.get("Prefer").map(|value| value.as_bytes())
                    == Some(b"resolution=merge-duplicates,return=representation".as_slice())
            })
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": 1 }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let rows: Vec<Value> = client
            .request_with_headers(
                Method::POST,
                "/rest/v1/reminders",
                Some("token"),
                Some(json!({ "id": 1 })),
                Some(upsert_representation()),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn empty_body_deserializes_to_unit() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/reminders"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let result: Result<()> = client
            .request(Method::PATCH, "/rest/v1/reminders?id=eq.1", None, Some(json!({})))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn error_status_becomes_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(401).set_body_string("jwt expired"))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let err = client
            .request::<Vec<Value>>(Method::GET, "/rest/v1/appointments", Some("t"), None)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Authentication error"));
    }

    #[tokio::test]
    async fn missing_profile_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let profile = client.get_profile(Uuid::new_v4(), "t").await.unwrap();

        assert!(profile.is_none());
    }

    #[tokio::test]
    async fn facility_row_is_parsed() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/rest/v1/facilities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": id,
                "name": "Mwanza Clinic",
                "address": null,
                "contact_number": "+255700000000"
            }])))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&config_for(&server.uri()));
        let facility = client.get_facility(id, "t").await.unwrap().unwrap();

        assert_eq!(facility.name, "Mwanza Clinic");
        assert!(facility.services.is_empty());
    }
}
