use std::{thread, time::Duration};

use dogstatsd_client::{ClientBuilder, ClientError};
use tracing::{info, warn};

fn main() {
    tracing_subscriber::fmt::init();

    let client = ClientBuilder::default()
        .with_remote_address("tcp://localhost:8126")
        .expect("failed to parse remote address")
        .with_telegraf(true)
        .with_global_tags(["host=example"])
        .with_error_handler(|e: ClientError| warn!(error = %e, "DogStatsD client error."))
        .build()
        .expect("failed to build DogStatsD client");

    for i in 0..100 {
        client
            .gauge_with("queue_depth", i)
            .tags(["queue:ingest"])
            .callback(|result| {
                if let Ok(bytes) = result {
                    info!(bytes, "Sent gauge.");
                }
            })
            .send()
            .unwrap();
        thread::sleep(Duration::from_millis(100));
    }

    client.close_with(|| info!("Client closed."));
    thread::sleep(Duration::from_millis(100));
}
