use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::time::sleep;
use url::Url;

use crate::config::Config;
use crate::error::ControlError;
use crate::observability::Logger;
use crate::protocol::{
    InstanceParameters, PatchRequest, ServiceInstance, ServiceInstancePage, TokenResponse,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Thin client over the OAuth token endpoint and the Service Manager API.
#[derive(Clone)]
pub struct ServiceManagerClient {
    http: Client,
    client_id: String,
    client_secret: String,
    token_url: Url,
    base: Url,
    max_retries: u32,
    logger: Logger,
}

impl ServiceManagerClient {
    pub fn new(config: &Config, logger: Logger) -> Result<Self, ControlError> {
        let http = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ControlError::http("client setup", e))?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_url: config.token_url.clone(),
            base: config.service_manager_url.clone(),
            max_retries: config.max_retries,
            logger,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("hana-autostart/", env!("CARGO_PKG_VERSION"))
    }

    /// Builds `{base}/v1/service_instances[/segments...]`, keeping any path
    /// prefix on the base URL.
    pub fn instances_url(&self, segments: &[&str]) -> Result<Url, ControlError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ControlError::config("SERVICE_MANAGER_URL cannot be a base URL"))?
            .pop_if_empty()
            .extend(["v1", "service_instances"])
            .extend(segments);
        Ok(url)
    }

    pub async fn fetch_token(&self) -> Result<String, ControlError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let token: TokenResponse = self
            .send_with_retry("token request", || {
                self.http
                    .post(self.token_url.clone())
                    .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                    .form(&form)
            })
            .await?;
        self.logger.debug(
            "Access token obtained",
            Some(&json!({"expires_in": token.expires_in})),
        );
        Ok(token.access_token)
    }

    pub async fn find_instance(&self, token: &str, name: &str) -> Result<ServiceInstance, ControlError> {
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.instances_url(&[])?;
            if let Some(t) = &page_token {
                url.query_pairs_mut().append_pair("token", t);
            }
            let page: ServiceInstancePage = self
                .send_with_retry("list instances", || {
                    self.http.get(url.clone()).bearer_auth(token)
                })
                .await?;
            self.logger.debug(
                "Fetched instance page",
                Some(&json!({"items": page.items.len(), "has_more": page.next_token().is_some()})),
            );

            if let Some(inst) = page.find(name) {
                return Ok(inst.clone());
            }
            match page.next_token() {
                Some(next) => page_token = Some(next.to_string()),
                None => return Err(ControlError::InstanceNotFound(name.to_string())),
            }
        }
    }

    pub async fn instance_parameters(
        &self,
        token: &str,
        instance_id: &str,
    ) -> Result<InstanceParameters, ControlError> {
        let url = self.instances_url(&[instance_id, "parameters"])?;
        self.send_with_retry("instance parameters", || {
            self.http.get(url.clone()).bearer_auth(token)
        })
        .await
    }

    /// Never retried: a repeated PATCH while the first one is being applied
    /// is rejected by the API with 422.
    pub async fn set_service_stopped(
        &self,
        token: &str,
        instance_id: &str,
        stopped: bool,
    ) -> Result<(), ControlError> {
        const CONTEXT: &str = "update instance";
        let url = self.instances_url(&[instance_id])?;
        let resp = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(&PatchRequest::service_stopped(stopped))
            .send()
            .await
            .map_err(|e| ControlError::http(CONTEXT, e))?;
        check_status(CONTEXT, resp).await?;
        Ok(())
    }

    async fn send_with_retry<T, F>(&self, context: &'static str, build: F) -> Result<T, ControlError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = match build().send().await {
                Ok(resp) => decode(context, resp).await,
                Err(e) => Err(ControlError::http(context, e)),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * 2_u64.pow(attempt));
                    self.logger.warn(
                        "Transient failure, retrying",
                        Some(&json!({
                            "context": context,
                            "error": e.to_string(),
                            "attempt": attempt,
                            "backoff_ms": backoff.as_millis() as u64,
                        })),
                    );
                    sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}

async fn check_status(context: &'static str, resp: Response) -> Result<Response, ControlError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ControlError::Status { context, status, body })
}

async fn decode<T: DeserializeOwned>(context: &'static str, resp: Response) -> Result<T, ControlError> {
    let resp = check_status(context, resp).await?;
    let bytes = resp.bytes().await.map_err(|e| ControlError::http(context, e))?;
    serde_json::from_slice(&bytes).map_err(|e| ControlError::decode(context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{BehaviourArgs, ConnectionArgs};
    use crate::observability::Level;
    use httpmock::MockServer;

    fn client_for(server: &MockServer, prefix: &str, max_retries: u32) -> ServiceManagerClient {
        let conn = ConnectionArgs {
            client_id: Some("sb-client".into()),
            client_secret: Some("s3cret".into()),
            token_url: Some(server.url("/oauth/token")),
            service_manager_url: Some(server.url(prefix)),
            instance_name: Some("hana-dev".into()),
        };
        let behaviour = BehaviourArgs {
            max_retries,
            ..BehaviourArgs::default()
        };
        let config = Config::from_args(&conn, &behaviour).unwrap();
        ServiceManagerClient::new(&config, Logger::new("run-test".into(), Level::Error)).unwrap()
    }

    #[test]
    fn instance_urls_keep_prefix_and_encode_ids() {
        let server = MockServer::start();
        let client = client_for(&server, "/sm/", 0);
        let url = client.instances_url(&["a b", "parameters"]).unwrap();
        assert_eq!(url.path(), "/sm/v1/service_instances/a%20b/parameters");

        let client = client_for(&server, "", 0);
        assert_eq!(client.instances_url(&[]).unwrap().path(), "/v1/service_instances");
    }

    #[tokio::test]
    async fn token_is_requested_with_client_credentials_form() -> Result<(), ControlError> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .path("/oauth/token")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("grant_type=client_credentials&client_id=sb-client&client_secret=s3cret");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"tok-1","token_type":"bearer","expires_in":43199}"#);
        });

        let token = client_for(&server, "", 0).fetch_token().await?;
        assert_eq!(token, "tok-1");
        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn token_failure_surfaces_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").path("/oauth/token");
            then.status(401).body("Bad credentials");
        });

        let err = client_for(&server, "", 0).fetch_token().await.unwrap_err();
        match err {
            ControlError::Status { status, body, .. } => {
                assert_eq!(status.as_u16(), 401);
                assert_eq!(body, "Bad credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn token_without_access_token_is_decode_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").path("/oauth/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"token_type":"bearer"}"#);
        });

        let err = client_for(&server, "", 0).fetch_token().await.unwrap_err();
        assert!(matches!(err, ControlError::Decode { .. }));
    }

    #[tokio::test]
    async fn finds_instance_with_bearer_auth() -> Result<(), ControlError> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET")
                .path("/v1/service_instances")
                .header("authorization", "Bearer tok-1");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"items":[{"id":"i-0","name":"other"},{"id":"i-1","name":"x","context":{"instance_name":"hana-dev"}}]}"#);
        });

        let inst = client_for(&server, "", 0).find_instance("tok-1", "hana-dev").await?;
        assert_eq!(inst.id, "i-1");
        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn missing_instance_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/v1/service_instances");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"num_items":0}"#);
        });

        let err = client_for(&server, "", 0)
            .find_instance("tok-1", "hana-dev")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InstanceNotFound(ref n) if n == "hana-dev"));
    }

    #[tokio::test]
    async fn reads_parameters() -> Result<(), ControlError> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET")
                .path("/v1/service_instances/i-1/parameters")
                .header("authorization", "Bearer tok-1");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"data":{"serviceStopped":true,"edition":"cloud"}}"#);
        });

        let params = client_for(&server, "", 0).instance_parameters("tok-1", "i-1").await?;
        assert_eq!(params.service_stopped(), Some(true));
        assert_eq!(params.requested_operation(), None);
        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn patch_sends_service_stopped_flag() -> Result<(), ControlError> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("PATCH")
                .path("/v1/service_instances/i-1")
                .header("authorization", "Bearer tok-1")
                .json_body_includes(r#"{"parameters":{"data":{"serviceStopped":false}}}"#);
            then.status(202).body("{}");
        });

        client_for(&server, "", 0).set_service_stopped("tok-1", "i-1", false).await?;
        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn patch_rejection_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("PATCH").path("/v1/service_instances/i-1");
            then.status(422).body(r#"{"error":"ConcurrentOperationInProgress"}"#);
        });

        let err = client_for(&server, "", 0)
            .set_service_stopped("tok-1", "i-1", true)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Status { ref status, .. } if status.as_u16() == 422));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET").path("/v1/service_instances/i-1/parameters");
            then.status(503).body("unavailable");
        });

        let err = client_for(&server, "", 2)
            .instance_parameters("tok-1", "i-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Status { ref status, .. } if status.as_u16() == 503));
        mock.assert_calls(3);
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() -> Result<(), ControlError> {
        let server = MockServer::start_async().await;
        let mut unavailable = server
            .mock_async(|when, then| {
                when.method("GET").path("/v1/service_instances/i-1/parameters");
                then.status(503).body("unavailable");
            })
            .await;
        let client = client_for(&server, "", 2);

        // The first retry backs off for 200ms, long enough to swap the mock.
        let recover = async {
            while unavailable.calls_async().await == 0 {
                sleep(Duration::from_millis(10)).await;
            }
            unavailable.delete_async().await;
            server
                .mock_async(|when, then| {
                    when.method("GET").path("/v1/service_instances/i-1/parameters");
                    then.status(200)
                        .header("content-type", "application/json")
                        .body(r#"{"data":{"serviceStopped":false}}"#);
                })
                .await
        };
        let (params, healthy) = tokio::join!(client.instance_parameters("tok-1", "i-1"), recover);

        assert_eq!(params?.service_stopped(), Some(false));
        healthy.assert_calls_async(1).await;
        Ok(())
    }

    #[tokio::test]
    async fn patch_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("PATCH").path("/v1/service_instances/i-1");
            then.status(503).body("unavailable");
        });

        let err = client_for(&server, "", 3)
            .set_service_stopped("tok-1", "i-1", false)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn lookup_follows_page_token() -> Result<(), ControlError> {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method("GET")
                .path("/v1/service_instances")
                .query_param_missing("token");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"items":[{"id":"i-0","name":"other"}],"token":"next1"}"#);
        });
        let second = server.mock(|when, then| {
            when.method("GET")
                .path("/v1/service_instances")
                .query_param("token", "next1");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"items":[{"id":"i-1","name":"hana-dev"}]}"#);
        });

        let inst = client_for(&server, "", 0).find_instance("tok-1", "hana-dev").await?;
        assert_eq!(inst.id, "i-1");
        first.assert_calls(1);
        second.assert_calls(1);
        Ok(())
    }

    #[tokio::test]
    async fn last_page_without_match_is_not_found() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET")
                .path("/v1/service_instances")
                .query_param_missing("token");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"items":[{"id":"i-0","name":"other"}],"token":"next1"}"#);
        });
        let second = server.mock(|when, then| {
            when.method("GET")
                .path("/v1/service_instances")
                .query_param("token", "next1");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"items":[],"token":""}"#);
        });

        let err = client_for(&server, "", 0)
            .find_instance("tok-1", "hana-dev")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InstanceNotFound(_)));
        second.assert_calls(1);
    }
}
