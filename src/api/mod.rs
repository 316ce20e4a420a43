pub mod status;
pub mod webhook;

use std::sync::Arc;

use log::info;
use rocket::{routes, Build, Rocket};

use crate::dispatch::Dispatcher;

/// Assemble the Rocket instance hosting the webhook endpoint
pub fn build_rocket(figment: rocket::figment::Figment, dispatcher: Arc<Dispatcher>) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(dispatcher)
        .mount("/", routes![webhook::receive_webhook, status::get_status])
}

/// Start the Rocket server and block until it shuts down
pub async fn start_rocket_server(
    dispatcher: Arc<Dispatcher>,
    port: u16,
) -> Result<(), rocket::Error> {
    let figment = rocket::Config::figment()
        .merge(("port", port))
        .merge(("address", "0.0.0.0"))
        .merge(("ident", "plexfm"))
        // Plex attaches the full item metadata to each delivery
        .merge(("limits.string", "64KiB"));

    info!("Starting webhook server on port {}", port);

    build_rocket(figment, dispatcher).launch().await?;

    Ok(())
}
