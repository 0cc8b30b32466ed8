//! Example: batching, aggregating and submitting measurements.
//!
//! Reads credentials from `LIBRATO_USER` and `LIBRATO_TOKEN`, then:
//! - Queues legacy gauges with a source
//! - Rolls up request latencies with an aggregator on a 60s period
//! - Submits tagged measurements that inherit connection tags
//!
//! Run with: `cargo run -p librato --example batch_submit`

use librato::{
    AggregatorOptions, Connection, ConnectionConfig, QueueOptions, RetryPolicy, SubmitOptions,
    tags,
};

fn main() -> librato::Result<()> {
    let (Ok(user), Ok(token)) = (std::env::var("LIBRATO_USER"), std::env::var("LIBRATO_TOKEN"))
    else {
        eprintln!("set LIBRATO_USER and LIBRATO_TOKEN to run this example");
        std::process::exit(1);
    };

    let config = ConnectionConfig::new(user, token)
        .with_retry(RetryPolicy::bounded(5))
        .with_tags(tags([("app", "batch_submit")]));
    let conn = Connection::new(config);

    // Latencies are rolled up locally; one summary per metric is sent.
    let mut latency = conn.new_aggregator(
        AggregatorOptions::default()
            .with_source("example")
            .with_period(60),
    );
    for ms in [12.0, 15.5, 9.8, 22.1, 13.4] {
        latency.add("request.latency", ms);
    }

    conn.with_queue(QueueOptions::default(), |q| {
        for (room, temp) in [("kitchen", 21.5), ("garage", 12.0), ("attic", 27.3)] {
            q.add("temperature", temp, SubmitOptions::default().with_source(room))?;
        }
        q.add_tagged(
            "cpu.load",
            0.42,
            SubmitOptions::default().with_tags(tags([("host", "web1")])),
        )?;
        q.add_aggregator(&mut latency)?;
        println!("submitting {} measurements", q.len());
        Ok(())
    })?;

    println!("done");
    Ok(())
}
