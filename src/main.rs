#[macro_use]
extern crate tracing;

use clap::Parser;
use eyre::{
    bail,
    Result,
};
use futures::future::join_all;
use instance_dns_resolver::{
    config::ProviderArgs,
    lookup::{
        FixtureLookup,
        HttpLookup,
        InstanceLookup,
    },
    InstanceDnsProvider,
    ProviderConfig,
};
use std::{
    path::PathBuf,
    time::Duration,
};

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Resolve instance ids through the batching provider.
    Resolve(ArgsResolve),
    /// Call the lookup api once, bypassing cache and batching.
    Describe(ArgsDescribe),
}

#[derive(clap::Args)]
struct ArgsLookup {
    #[clap(
        long,
        env = "INSTANCE_LOOKUP_ENDPOINT",
        help = "HTTP endpoint answering describe-instances requests",
        conflicts_with = "instances_file"
    )]
    endpoint: Option<String>,

    #[clap(long, env = "INSTANCE_LOOKUP_API_TOKEN", help = "Bearer token for the lookup endpoint")]
    api_token: Option<String>,

    #[clap(
        long,
        env = "INSTANCE_LOOKUP_TIMEOUT",
        help = "Timeout for a single lookup call",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    lookup_timeout: Duration,

    #[clap(long, help = "YAML/JSON file with reservations to serve lookups from")]
    instances_file: Option<PathBuf>,

    #[clap(
        long,
        help = "Simulated latency of lookups served from --instances-file",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    simulated_latency: Duration,
}

#[derive(clap::Args)]
struct ArgsResolve {
    #[clap(flatten)]
    lookup: ArgsLookup,

    #[clap(flatten)]
    provider: ProviderArgs,

    #[clap(long, help = "Print provider stats as JSON when done")]
    stats: bool,

    #[clap(required = true)]
    instance_ids: Vec<String>,
}

#[derive(clap::Args)]
struct ArgsDescribe {
    #[clap(flatten)]
    lookup: ArgsLookup,

    #[clap(required = true)]
    instance_ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Args::parse() {
        Args::Resolve(args) => {
            let config = ProviderConfig::try_from(args.provider)?;
            match lookup_from_args(&args.lookup).await? {
                Lookup::Http(lookup) => resolve(config, lookup, args.instance_ids, args.stats).await?,
                Lookup::Fixture(lookup) => resolve(config, lookup, args.instance_ids, args.stats).await?,
            }
        }
        Args::Describe(args) => {
            let reservations = match lookup_from_args(&args.lookup).await? {
                Lookup::Http(lookup) => lookup.describe_instances(&args.instance_ids).await?,
                Lookup::Fixture(lookup) => lookup.describe_instances(&args.instance_ids).await?,
            };
            println!("{}", serde_json::to_string_pretty(&reservations)?);
        }
    }

    Ok(())
}

enum Lookup {
    Http(HttpLookup),
    Fixture(FixtureLookup),
}

async fn lookup_from_args(args: &ArgsLookup) -> Result<Lookup> {
    match (&args.endpoint, &args.instances_file) {
        (Some(endpoint), _) => Ok(Lookup::Http(HttpLookup::new(
            endpoint,
            args.api_token.clone(),
            args.lookup_timeout,
        )?)),
        (None, Some(path)) => Ok(Lookup::Fixture(
            FixtureLookup::from_file(path).await?.with_latency(args.simulated_latency),
        )),
        (None, None) => bail!("must specify either --endpoint or --instances-file"),
    }
}

async fn resolve<L: InstanceLookup>(
    config: ProviderConfig,
    lookup: L,
    instance_ids: Vec<String>,
    print_stats: bool,
) -> Result<()> {
    let provider = InstanceDnsProvider::new(config, lookup)?;
    provider.start_batch_processing();

    info!("Resolving {} instances", instance_ids.len());

    let results = join_all(instance_ids.iter().map(|id| provider.private_dns_name(id))).await;

    let mut failed = 0;
    for (id, result) in instance_ids.iter().zip(results) {
        match result {
            Ok(name) => println!("{id} {name}"),
            Err(err) => {
                failed += 1;
                println!("{id} error: {err}");
            }
        }
    }

    provider.shutdown().await;

    if print_stats {
        println!("{}", serde_json::to_string_pretty(&provider.stats())?);
    }

    if failed > 0 {
        bail!("{failed} of {} instances could not be resolved", instance_ids.len());
    }

    Ok(())
}
