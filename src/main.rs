use std::time::Instant;

use tracing_subscriber::EnvFilter;

use oxid_query_stats::config::QueryStatsConfig;
use oxid_query_stats::doc;
use oxid_query_stats::query_stats::{QueryStats, RequestContext, SnapshotOptions};
use oxid_query_stats::shape::{HmacKey, QueryRequest};
use oxid_query_stats::types::{Namespace, Value};

// Feeds a few queries through the service and prints what got collected.
// Configured through QUERYSTATS_* environment variables (or a QUERYSTATS_CONFIG toml file).
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("OxidSQL - Query Stats");

    let config = QueryStatsConfig::from_env()?;
    let stats = QueryStats::new(&config)?;
    let orders = Namespace::new("shop", "orders");

    for i in 0..20 {
        let request = if i % 3 == 0 {
            QueryRequest::aggregate(orders.clone(), doc! {
                "pipeline" => vec![
                    Value::from(doc! { "$match" => doc! { "status" => "open", "total" => doc! { "$gt" => i } } }),
                    Value::from(doc! { "$group" => doc! { "_id" => "$customer", "n" => doc! { "$sum" => 1 } } })
                ]
            })
        } else {
            QueryRequest::find(orders.clone(), doc! {
                "filter" => doc! { "customer" => format!("c{}", i) },
                "sort" => doc! { "created" => -1 },
                "limit" => i
            })
        };
        let mut ctx = RequestContext::with_application_name("demo");
        let start = Instant::now();
        stats.register_request(&request, &mut ctx);
        stats.finalize(&mut ctx, start.elapsed().as_micros() as u64, (i % 5) as u64);
    }

    for entry in stats.snapshot(&SnapshotOptions::default())? {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    }
    // Same entries with every identifier replaced, using a throwaway key unless one is configured
    let key = match config.hmac_key()? {
        Some(key) => key,
        None => HmacKey::generate()
    };
    for entry in stats.snapshot(&SnapshotOptions::redacted(key))? {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    }
    println!("{}", serde_json::to_string_pretty(&stats.metrics())?);
    Ok(())
}
