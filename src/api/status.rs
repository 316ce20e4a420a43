use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{get, State};
use serde::Serialize;

use crate::dispatch::Dispatcher;

/// Authentication state for one configured user
#[derive(Serialize)]
pub struct UserStatus {
    pub account: String,
    pub authenticated: bool,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub users: Vec<UserStatus>,
}

/// Report the configured users and whether each one holds a Last.fm session
#[get("/status")]
pub fn get_status(dispatcher: &State<Arc<Dispatcher>>) -> Json<StatusResponse> {
    let users = dispatcher
        .user_status()
        .into_iter()
        .map(|(account, authenticated)| UserStatus {
            account,
            authenticated,
        })
        .collect();

    Json(StatusResponse { users })
}
