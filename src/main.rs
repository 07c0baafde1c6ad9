//! rpc-meter - instrumented RPC client demo
//!
//! Composition root: serves a small route-guide style service in-process,
//! dials it through the instrumented connection, drives a few concurrent
//! callers, and prints the collected metrics in Prometheus format.

use bytes::Bytes;
use rpc_meter::adapters::outbound::{InProcessDialer, InProcessServer, PrometheusMetricsSink};
use rpc_meter::{
    load_config, CallOptions, Code, DialOptions, InstrumentedConnection, RpcChannel, RpcStatus,
    StreamDescriptor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

const GET_FEATURE: &str = "/routeguide.RouteGuide/GetFeature";
const LIST_FEATURES: &str = "/routeguide.RouteGuide/ListFeatures";

fn route_guide() -> InProcessServer {
    InProcessServer::new()
        .unary(GET_FEATURE, |point| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            // Points whose first byte is zero have no feature.
            match point.first() {
                Some(0) | None => Err(RpcStatus::new(Code::NotFound, "no feature at point")),
                Some(_) => Ok(point),
            }
        })
        .stream(LIST_FEATURES, |stream| async move {
            for i in 0..5u8 {
                stream.send(Bytes::from(vec![i])).await?;
            }
            Ok(())
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting rpc-meter target={} calls={} concurrency={}",
        cfg.target,
        cfg.calls,
        cfg.concurrency
    );

    // ===== COMPOSITION ROOT =====

    let dialer = InProcessDialer::new();
    dialer.register(&cfg.target, route_guide());

    let sink = Arc::new(PrometheusMetricsSink::new(cfg.instance.clone()));

    let mut dial_options = DialOptions {
        block: cfg.dial_block,
        ..Default::default()
    };
    if let Some(timeout) = cfg.dial_timeout() {
        dial_options = dial_options.with_timeout(timeout);
    }

    let conn = Arc::new(
        InstrumentedConnection::dial(&dialer, &cfg.target, &dial_options, sink.clone()).await?,
    );

    let mut workers = Vec::with_capacity(cfg.concurrency as usize);
    for worker_id in 0..cfg.concurrency {
        let conn = conn.clone();
        let calls = cfg.calls;
        workers.push(tokio::spawn(async move {
            let opts = CallOptions::default().with_timeout(Duration::from_secs(10));
            for i in 0..calls {
                let point = Bytes::from(vec![(i % 8) as u8, worker_id as u8]);
                if let Err(e) = conn.invoke(GET_FEATURE, point, &opts).await {
                    tracing::debug!("worker {} GetFeature: {}", worker_id, e);
                }
            }

            let mut stream = conn
                .new_stream(&StreamDescriptor::server_streaming("ListFeatures"), LIST_FEATURES, &opts)
                .await?;
            let mut features = 0;
            while stream.recv().await?.is_some() {
                features += 1;
            }
            tracing::info!("worker {} listed {} features", worker_id, features);
            Ok::<(), RpcStatus>(())
        }));
    }

    for worker in workers {
        if let Err(e) = worker.await? {
            tracing::error!("worker failed: {}", e);
        }
    }

    conn.close().await?;

    let stats = conn.registry().stats();
    tracing::info!(
        "registered {} method metric groups ({} failed)",
        stats.registered,
        stats.failed
    );

    print!("{}", sink.export_prometheus());

    Ok(())
}
