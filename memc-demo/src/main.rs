//! # memcache Walkthrough
//!
//! Purpose: Drive one endpoint through every basic command and print the
//! server's item count after each phase, as a smoke test for a live server.
//!
//! Usage: `memc-demo [host:port] [--config <file.json>]`
//!
//! ## Design Principles
//! 1. **Fixed Workload**: Ten keys `00000001`..`00000010`, value = index.
//! 2. **Loud Failures**: Any command error aborts the run with context.

use std::env;

use anyhow::{bail, Context, Result};
use memc_client::{ClientConfig, MemcacheClient};
use memc_common::{Endpoint, Expiry};
use tracing::info;
use tracing_subscriber::EnvFilter;

const KEY_COUNT: usize = 10;
const EXPIRY: Expiry = Expiry::from_secs(180);

struct DemoArgs {
    endpoint: Option<Endpoint>,
    config: Option<String>,
}

impl DemoArgs {
    fn from_args() -> Result<Self> {
        let mut endpoint = None;
        let mut config = None;
        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config = Some(args.next().context("--config needs a file path")?);
                }
                flag if flag.starts_with("--") => bail!("unknown option {flag}"),
                raw => {
                    let parsed = raw
                        .parse::<Endpoint>()
                        .with_context(|| format!("invalid endpoint {raw:?}"))?;
                    endpoint = Some(parsed);
                }
            }
        }
        Ok(DemoArgs { endpoint, config })
    }

    fn client_config(self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_json_file(path)
                .with_context(|| format!("loading {path}"))?,
            None => ClientConfig::default(),
        };
        if let Some(endpoint) = self.endpoint {
            config.endpoints = vec![endpoint];
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = DemoArgs::from_args()?.client_config()?;
    run(config)
}

fn run(config: ClientConfig) -> Result<()> {
    println!("connecting...");
    let client = MemcacheClient::with_config(config).context("building client")?;
    let host = client.endpoints().first().cloned().context("no endpoint configured")?;
    print_count(&client, &host)?;

    println!("flushing...");
    client.flush_all(&host).context("flush_all")?;
    print_count(&client, &host)?;

    println!("setting...");
    for (key, value) in workload() {
        client.set(&host, key.as_bytes(), value.as_bytes(), EXPIRY).context("set")?;
        client.add(&host, key.as_bytes(), value.as_bytes(), EXPIRY).context("add")?;
        client.replace(&host, key.as_bytes(), value.as_bytes(), EXPIRY).context("replace")?;
    }
    print_count(&client, &host)?;

    println!("getting...");
    for (key, _) in workload() {
        client.get(&host, key.as_bytes()).context("get")?;
    }
    print_count(&client, &host)?;

    println!("incrementing...");
    for (key, _) in workload() {
        client.incr(&host, key.as_bytes(), 1).context("incr")?;
        client.decr(&host, key.as_bytes(), 1).context("decr")?;
    }
    print_count(&client, &host)?;

    println!("removing...");
    for (key, _) in workload() {
        client.delete(&host, key.as_bytes()).context("delete")?;
    }
    print_count(&client, &host)?;

    let metrics = client.metrics();
    info!(
        requests = metrics.requests_total,
        misses = metrics.misses_total,
        errors = metrics.errors_total,
        mean_us = metrics.latency.mean().as_micros() as u64,
        "done"
    );
    client.close_idle(&host)?;
    Ok(())
}

fn workload() -> impl Iterator<Item = (String, String)> {
    (1..=KEY_COUNT).map(|idx| (format!("{idx:08}"), idx.to_string()))
}

fn print_count(client: &MemcacheClient, host: &Endpoint) -> Result<()> {
    let stats = client.stats(host).context("stats")?;
    match stats.get("curr_items") {
        Some(count) => println!("count: {count}"),
        None => println!("count: -"),
    }
    Ok(())
}
