//! API routes

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use volley_core::CampaignSupervisor;
use volley_storage::store::RecordStore;

use crate::handlers::{campaigns, health, logs};

/// Shared handler state
pub struct AppState {
    pub supervisor: CampaignSupervisor,
    pub store: Arc<dyn RecordStore>,
}

/// Create the control API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let campaign_routes = Router::new()
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/resume", post(campaigns::resume_campaign))
        .route("/:campaign_id/stop", post(campaigns::stop_campaign))
        .route("/:campaign_id/status", get(campaigns::campaign_status));

    let log_routes = Router::new()
        .route("/", get(logs::list_logs))
        .route("/", delete(logs::clear_logs))
        .route("/export", get(logs::export_logs));

    Router::new()
        .route("/health", get(health::health))
        .nest("/campaigns", campaign_routes)
        .nest("/logs", log_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum_test::TestServer;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::time::Duration;
    use volley_common::config::DispatchConfig;
    use volley_core::{CredentialCodec, Mailer, OutboundEmail};
    use volley_storage::store::{NewCampaign, NewReceiver, NewSender, NewTemplate};
    use volley_storage::MemoryStore;

    struct OkMailer;

    #[async_trait]
    impl Mailer for OkMailer {
        async fn send(&self, _email: &OutboundEmail) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn codec() -> CredentialCodec {
        CredentialCodec::new(&STANDARD.encode([7u8; 32])).unwrap()
    }

    fn test_server(store: Arc<MemoryStore>) -> TestServer {
        let supervisor = CampaignSupervisor::new(
            store.clone(),
            Arc::new(OkMailer),
            Arc::new(volley_core::NullNotifier),
            codec(),
            DispatchConfig {
                max_attempts: 2,
                backoff_base_secs: 0,
                send_delay_secs: 0,
                pause_poll_secs: 0,
            },
        );
        let state = Arc::new(AppState {
            supervisor,
            store: store as Arc<dyn RecordStore>,
        });
        TestServer::new(create_router(state)).unwrap()
    }

    /// Campaign with one receiver, an active template and one sender
    async fn seed(store: &MemoryStore) -> uuid::Uuid {
        let campaign = store
            .create_campaign(NewCampaign {
                name: "launch".to_string(),
            })
            .await
            .unwrap();
        store
            .add_receiver(NewReceiver {
                campaign_id: campaign.id,
                address: "r@example.com".to_string(),
            })
            .await
            .unwrap();
        let template = store
            .create_template(NewTemplate {
                name: "t".to_string(),
                subject: "Hi".to_string(),
                html_body: "<p>Hi</p>".to_string(),
                plain_body: None,
            })
            .await
            .unwrap();
        store.activate_template(template.id).await.unwrap();
        store
            .create_sender(NewSender {
                address: "out@example.com".to_string(),
                password_encrypted: codec().encode("pw").unwrap(),
                sending_limit: 10,
            })
            .await
            .unwrap();
        campaign.id
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = test_server(Arc::new(MemoryStore::new()));
        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_start_unknown_campaign_is_404() {
        let server = test_server(Arc::new(MemoryStore::new()));
        let response = server
            .post(&format!("/campaigns/{}/start", uuid::Uuid::new_v4()))
            .await;
        response.assert_status(axum::http::StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_start_without_receivers_is_422() {
        let store = Arc::new(MemoryStore::new());
        let campaign = store
            .create_campaign(NewCampaign {
                name: "empty".to_string(),
            })
            .await
            .unwrap();
        let template = store
            .create_template(NewTemplate {
                name: "t".to_string(),
                subject: "Hi".to_string(),
                html_body: "<p>Hi</p>".to_string(),
                plain_body: None,
            })
            .await
            .unwrap();
        store.activate_template(template.id).await.unwrap();

        let server = test_server(store);
        let response = server
            .post(&format!("/campaigns/{}/start", campaign.id))
            .await;
        response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"], "precondition_failed");
    }

    #[tokio::test]
    async fn test_start_runs_to_completion_and_logs() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;
        let server = test_server(store.clone());

        let response = server.post(&format!("/campaigns/{}/start", id)).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "running");

        // Poll the status endpoint until the runner finishes.
        let mut status = String::new();
        for _ in 0..500 {
            let response = server.get(&format!("/campaigns/{}/status", id)).await;
            response.assert_status_ok();
            let progress: Value = response.json();
            status = progress["status"].as_str().unwrap_or_default().to_string();
            if status == "completed" {
                assert_eq!(progress["emails_sent"], 1);
                assert_eq!(progress["emails_pending"], 0);
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(status, "completed");

        let response = server.get("/logs").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["count"].as_u64().unwrap() >= 2);

        let response = server.get("/logs/export").await;
        response.assert_status_ok();
        let csv = response.text();
        assert!(csv.starts_with(
            "timestamp,level,message,sender_address,receiver_address,status,error_reason"
        ));

        let response = server.delete("/logs").await;
        response.assert_status_ok();
        let response = server.get("/logs").await;
        let body: Value = response.json();
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_negative_log_limit_returns_empty_not_error() {
        let server = test_server(Arc::new(MemoryStore::new()));
        let response = server.get("/logs").add_query_param("limit", -5).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["count"], 0);

        let response = server.get("/logs/export").add_query_param("limit", -5).await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_pause_completed_campaign_is_not_applied() {
        let store = Arc::new(MemoryStore::new());
        let id = seed(&store).await;
        let server = test_server(store.clone());

        server
            .post(&format!("/campaigns/{}/start", id))
            .await
            .assert_status_ok();
        for _ in 0..500 {
            let campaign = store.campaign(id).await.unwrap().unwrap();
            if campaign.status == "completed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let response = server.post(&format!("/campaigns/{}/pause", id)).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["applied"], false);
        assert_eq!(body["campaign"]["status"], "completed");
    }
}
