//! Webhook server: Telegram's update route plus a liveness route on `/`.

use std::convert::Infallible;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use teloxide::prelude::*;
use teloxide::update_listeners::{webhooks, UpdateListener};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("setWebhook failed: {0}")]
    Setup(#[from] teloxide::RequestError),

    #[error("failed to bind webhook listener: {0}")]
    Bind(#[from] std::io::Error),
}

async fn alive() -> Json<Value> {
    Json(json!({ "ok": true, "info": "Bot webhook alive" }))
}

/// `GET /` answering that the process is up.
pub fn health_router() -> Router {
    Router::new().route("/", get(alive))
}

/// Mount the liveness route next to the update route unless the update
/// route already owns `/`.
pub fn with_health(updates: Router, update_path: &str) -> Router {
    if update_path == "/" {
        updates
    } else {
        updates.merge(health_router())
    }
}

/// Register the webhook, retrying with exponential backoff since Telegram
/// may refuse `setWebhook` right after a deploy, then serve it.
pub async fn listen(bot: Bot, webhook: &WebhookConfig) -> Result<impl UpdateListener<Err = Infallible>, WebhookError> {
    let mut attempt = 1;
    let mut backoff = webhook.setup_backoff;
    let (mut listener, stop_flag, updates) = loop {
        let options = webhooks::Options::new(webhook.listen_addr, webhook.url.clone())
            .max_connections(webhook.max_connections);

        match webhooks::axum_to_router(bot.clone(), options).await {
            Ok(parts) => {
                info!("Webhook set: {}", webhook.url);
                break parts;
            }
            Err(e) if attempt < webhook.setup_attempts => {
                warn!("Failed to set webhook (attempt {}/{}): {e}", attempt, webhook.setup_attempts);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => {
                error!("Giving up on webhook after {} attempts", attempt);
                return Err(e.into());
            }
        }
    };

    let app = with_health(updates, webhook.url.path());
    let tcp = tokio::net::TcpListener::bind(webhook.listen_addr).await?;
    let stop_token = listener.stop_token();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(tcp, app).with_graceful_shutdown(stop_flag).await {
            error!("Webhook server error: {e}");
            stop_token.stop();
        }
    });

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serve(app: Router) -> std::net::SocketAddr {
        let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(tcp, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_root_reports_alive() {
        let addr = serve(health_router()).await;

        let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert!(response.status().is_success());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "ok": true, "info": "Bot webhook alive" }));
    }

    #[tokio::test]
    async fn test_health_sits_next_to_update_route() {
        let updates = Router::new().route("/hook", get(|| async { "updates" }));
        let addr = serve(with_health(updates, "/hook")).await;

        let root: Value = reqwest::get(format!("http://{addr}/")).await.unwrap().json().await.unwrap();
        assert_eq!(root["ok"], json!(true));
        let hook = reqwest::get(format!("http://{addr}/hook")).await.unwrap().text().await.unwrap();
        assert_eq!(hook, "updates");
    }

    #[tokio::test]
    async fn test_update_route_on_root_is_kept() {
        let updates = Router::new().route("/", get(|| async { "updates" }));
        let addr = serve(with_health(updates, "/")).await;

        let body = reqwest::get(format!("http://{addr}/")).await.unwrap().text().await.unwrap();
        assert_eq!(body, "updates");
    }
}
