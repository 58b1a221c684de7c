//! Fires a burst of concurrent lookups at a provider backed by an in-memory fixture and prints how many remote calls
//! it took.
//!
//! `RUST_LOG=instance_dns_resolver=debug cargo run --example burst`

use futures::future::join_all;
use instance_dns_resolver::{
    lookup::{
        FixtureLookup,
        Instance,
        Reservation,
    },
    InstanceDnsProvider,
    ProviderConfig,
};
use std::{
    sync::Arc,
    time::Duration,
};

#[tokio::main]
async fn main() {
    color_eyre::install().expect("color_eyre init");
    tracing_subscriber::fmt::init();

    let reservations = (1..=500)
        .map(|i| Reservation {
            instances: vec![Instance::new(format!("i-{i:04}"), format!("ip-10-0-{}-{}.ec2.internal", i / 250, i % 250))],
        })
        .collect();
    let lookup = FixtureLookup::new(reservations).with_latency(Duration::from_millis(100));

    let provider = Arc::new(InstanceDnsProvider::new(ProviderConfig::default(), lookup.clone()).expect("default config"));
    provider.start_batch_processing();

    let tasks = (1..=500).map(|i| {
        let provider = provider.clone();
        tokio::spawn(async move { provider.private_dns_name(&format!("i-{:04}", i % 250 + 1)).await })
    });
    let results = join_all(tasks).await;
    let resolved = results.iter().filter(|it| matches!(it, Ok(Ok(_)))).count();

    println!("resolved {resolved} requests with {} lookup calls", lookup.calls());
    println!("batch sizes: {:?}", lookup.batch_sizes().await);
    println!("{}", serde_json::to_string_pretty(&provider.stats()).expect("stats json"));

    provider.shutdown().await;
}
