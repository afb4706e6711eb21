//! HTTP client for the deferred job transport.
//!
//! # Wire contract
//!
//! ```text
//! POST   {base}/v1/jobs        {"callbackUrl", "delaySeconds", "body"}  -> 2xx {"jobId"}
//! DELETE {base}/v1/jobs/{id}                                            -> 2xx | 404
//! ```
//!
//! Both calls carry `Authorization: Bearer {token}`. On delivery the transport
//! POSTs `body` to `callbackUrl` with `X-Job-Signature` over the raw bytes, and
//! retries until it receives a 2xx.

use crate::config::SchedulerConfig;
use boxoffice_core::{BoxFuture, JobId, JobScheduler, RollbackPayload, SchedulerError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRequest<'a> {
    callback_url: &'a str,
    delay_seconds: u64,
    body: &'a RollbackPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    job_id: String,
}

/// [`JobScheduler`] backed by the job transport's HTTP API.
#[derive(Clone)]
pub struct HttpJobScheduler {
    client: Client,
    base_url: String,
    token: String,
    callback_url: String,
}

impl HttpJobScheduler {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Transport` if the HTTP client cannot be built.
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            callback_url: config.callback_url.clone(),
        })
    }

    async fn schedule_job(
        &self,
        payload: &RollbackPayload,
        delay: Duration,
    ) -> Result<JobId, SchedulerError> {
        let response = self
            .client
            .post(format!("{}/v1/jobs", self.base_url))
            .bearer_auth(&self.token)
            .json(&ScheduleRequest {
                callback_url: &self.callback_url,
                delay_seconds: delay.as_secs(),
                body: payload,
            })
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .json::<ScheduleResponse>()
                .await
                .map_err(|e| SchedulerError::Transport(format!("malformed response: {e}")))?;
            return Ok(JobId::new(body.job_id));
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(SchedulerError::Rejected(format!("{status}: {message}")))
        } else {
            Err(SchedulerError::Transport(format!("{status}: {message}")))
        }
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<bool, SchedulerError> {
        let response = self
            .client
            .delete(format!("{}/v1/jobs/{}", self.base_url, job_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(SchedulerError::Transport(format!("{status}: {message}")))
            }
        }
    }
}

impl JobScheduler for HttpJobScheduler {
    fn schedule(
        &self,
        payload: &RollbackPayload,
        delay: Duration,
    ) -> BoxFuture<'_, Result<JobId, SchedulerError>> {
        let payload = payload.clone();
        Box::pin(async move { self.schedule_job(&payload, delay).await })
    }

    fn cancel(&self, job_id: &JobId) -> BoxFuture<'_, Result<bool, SchedulerError>> {
        let job_id = job_id.clone();
        Box::pin(async move { self.cancel_job(&job_id).await })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{delete, post};
    use axum::{Json, Router};
    use boxoffice_core::{CheckoutId, TierId};
    use serde_json::{Value, json};

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer test-token")
    }

    async fn fake_transport() -> String {
        let app = Router::new()
            .route(
                "/v1/jobs",
                post(|headers: HeaderMap, Json(request): Json<Value>| async move {
                    if !authorized(&headers) {
                        return (AxumStatus::UNAUTHORIZED, Json(json!({})));
                    }
                    if request["body"]["quantity"] == 0 {
                        return (AxumStatus::BAD_REQUEST, Json(json!({"error": "empty"})));
                    }
                    let job_id = format!(
                        "job-{}-{}",
                        request["body"]["checkoutId"].as_str().unwrap_or(""),
                        request["delaySeconds"]
                    );
                    (AxumStatus::CREATED, Json(json!({ "jobId": job_id })))
                }),
            )
            .route(
                "/v1/jobs/:id",
                delete(|Path(id): Path<String>| async move {
                    if id.starts_with("job-") {
                        AxumStatus::NO_CONTENT
                    } else {
                        AxumStatus::NOT_FOUND
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn scheduler(base_url: String, token: &str) -> HttpJobScheduler {
        HttpJobScheduler::new(&SchedulerConfig {
            base_url,
            token: token.to_string(),
            callback_url: "http://boxoffice/api/jobs/rollback".to_string(),
            request_timeout: 5,
        })
        .unwrap()
    }

    fn payload(quantity: u32) -> RollbackPayload {
        RollbackPayload {
            checkout_id: CheckoutId::parse("co-7").unwrap(),
            tier: TierId::parse("VIP").unwrap(),
            quantity,
        }
    }

    #[tokio::test]
    async fn schedules_and_cancels_jobs() {
        let scheduler = scheduler(fake_transport().await, "test-token");

        let job = scheduler
            .schedule(&payload(2), Duration::from_secs(900))
            .await
            .unwrap();
        assert_eq!(job.as_str(), "job-co-7-900");

        assert!(scheduler.cancel(&job).await.unwrap());
        assert!(!scheduler.cancel(&JobId::new("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn client_errors_are_rejections() {
        let base_url = fake_transport().await;

        let bad_token = scheduler(base_url.clone(), "wrong");
        let err = bad_token
            .schedule(&payload(1), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Rejected(_)));

        let err = scheduler(base_url, "test-token")
            .schedule(&payload(0), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Rejected(_)));
    }

    #[tokio::test]
    async fn unreachable_transport_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = scheduler(format!("http://{addr}"), "test-token")
            .schedule(&payload(1), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Transport(_)));
    }
}
