use std::sync::Arc;

use log::{debug, warn};
use rocket::http::{ContentType, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{post, State};
use serde::Serialize;

use crate::dispatch::Dispatcher;
use crate::webhook;

/// Response body for the webhook endpoint
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Receive one webhook delivery from the media server.
///
/// The sender does not consume the response body meaningfully, so
/// dispatch-level failures still answer 200; only an unparseable body or
/// `payload` field is a client error.
#[post("/webhook", data = "<body>")]
pub fn receive_webhook(
    content_type: Option<&ContentType>,
    body: String,
    dispatcher: &State<Arc<Dispatcher>>,
) -> Result<Json<WebhookResponse>, Custom<Json<WebhookResponse>>> {
    let content_type = content_type.map(|ct| ct.to_string());

    let event = match webhook::normalize(&body, content_type.as_deref()) {
        Ok(event) => event,
        Err(e) => {
            warn!("Rejecting webhook delivery: {}", e);
            return Err(Custom(
                Status::BadRequest,
                Json(WebhookResponse {
                    status: "error",
                    message: Some(e.to_string()),
                }),
            ));
        }
    };

    debug!(
        "Received {:?} event for '{}' (media type '{}')",
        event.kind, event.account, event.media_type
    );
    dispatcher.dispatch(&event);

    Ok(Json(WebhookResponse {
        status: "success",
        message: None,
    }))
}
