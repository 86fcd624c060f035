use std::{thread, time::Duration};

use dogstatsd_client::{CheckStatus, ChildOptions, ClientBuilder, EventAlertType};
use rand::Rng;

fn main() {
    tracing_subscriber::fmt::init();

    let client = ClientBuilder::default()
        .with_remote_address("localhost:9125")
        .expect("failed to parse remote address")
        .with_prefix("example.")
        .with_global_tags(["env:dev"])
        .with_max_buffer_size(1432)
        .build()
        .expect("failed to build DogStatsD client");

    client.increment("started").unwrap();
    client
        .event_with("Example started", "Sending metrics in a loop.")
        .alert_type(EventAlertType::Info)
        .send()
        .unwrap();

    let server = client.child_client(ChildOptions::new().with_global_tags(["system:foo"]));
    let mut rng = rand::rng();

    // Loop over and over, pretending to do some work.
    loop {
        server.increment("server_loops").unwrap();
        let work_ms = rng.random_range(1..20);
        server.time("server_loop_work", || thread::sleep(Duration::from_millis(work_ms)));

        if rand::random_bool(0.75) {
            server.increment_with("lucky_iterations").sample_rate(0.5).send().unwrap();
        }

        client.check("alive", CheckStatus::Ok).unwrap();
    }
}
