use hyper::{
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use prometheus::{Encoder, HistogramVec, IntCounterVec, TextEncoder};

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec};

lazy_static! {
    static ref CYCLE_COUNTER: IntCounterVec = register_int_counter_vec!(
        "site_agent_reconcile_cycles_total",
        "Number of reconciliation cycles run, by offering and lane.",
        &["offering", "lane", "outcome"]
    )
    .unwrap();
    static ref CYCLE_DURATION: HistogramVec = register_histogram_vec!(
        "site_agent_reconcile_cycle_duration_seconds",
        "Reconciliation cycle latency in seconds, by offering and lane.",
        &["offering", "lane"]
    )
    .unwrap();
}

/// Lane identifiers used as the `lane` label value. Matches the processor
/// names in `crate::processors`.
pub const LANE_ORDERS: &str = "orders";
pub const LANE_MEMBERSHIP: &str = "membership";
pub const LANE_REPORTS: &str = "reports";

/// Records one completed reconciliation cycle. Called by the supervisor
/// after each `process_offering` pass, success or failure.
pub fn record_cycle(offering: &str, lane: &str, succeeded: bool, elapsed: std::time::Duration) {
    let outcome = if succeeded { "ok" } else { "error" };
    CYCLE_COUNTER.with_label_values(&[offering, lane, outcome]).inc();
    CYCLE_DURATION
        .with_label_values(&[offering, lane])
        .observe(elapsed.as_secs_f64());
}

async fn serve_req(_req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    let response = Response::builder()
        .status(200)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .unwrap();
    Ok(response)
}

/// Runs the prometheus metrics server on the given port.
pub async fn run_server(port: u16) {
    let addr = ([0, 0, 0, 0], port).into();
    tracing::info!(%addr, "metrics server listening");

    let serve_future = Server::bind(&addr).serve(make_service_fn(|_| async {
        Ok::<_, hyper::Error>(service_fn(serve_req))
    }));

    if let Err(err) = serve_future.await {
        tracing::error!(error = %err, "metrics server error");
    }
}
