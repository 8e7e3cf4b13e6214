//! Axum web surface rendering a price history chart from stored records.
//!
//! Read-only collaborator of the ingestion core: it consumes the store's
//! trailing-window query and turns it into a Plotly time-series page. The
//! chart transform itself is a pure function over already-validated rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gasprices_core::StoredRecord;
use gasprices_store::Store;
use tokio::net::TcpListener;

pub const CRATE_NAME: &str = "gasprices-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
}

#[derive(Template)]
#[template(path = "chart.html")]
struct ChartTemplate {
    days: u32,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/prices/{days}", get(chart_page_handler))
        .route("/prices/{days}/data", get(chart_data_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(store: Store, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(AppState { store })).await?;
    Ok(())
}

async fn chart_page_handler(Path(days): Path<u32>) -> Response {
    match (ChartTemplate { days }).render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err)),
    }
}

async fn chart_data_handler(
    State(state): State<Arc<AppState>>,
    Path(days): Path<u32>,
) -> Response {
    match state.store.query_range(days).await {
        Ok(rows) => Json(chart_payload(&rows)).into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err}")),
    )
        .into_response()
}

/// Builds the Plotly payload: one line trace per (station, fuel) with the
/// source-reported update time on x and the price on y. Absent prices are
/// skipped; rows are grouped deterministically.
pub fn chart_payload(rows: &[StoredRecord]) -> serde_json::Value {
    let mut traces: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();

    for row in rows {
        let Some(updated) = row.record.last_updated else {
            continue;
        };
        let station = row
            .record
            .station
            .as_deref()
            .unwrap_or(row.record.name.as_str());
        let stamp = updated.format("%Y-%m-%dT%H:%M:%S").to_string();
        for (fuel, price) in [
            ("Gas", row.record.gas),
            ("Diesel", row.record.diesel),
            ("LPG", row.record.lpg),
        ] {
            if let Some(price) = price {
                traces
                    .entry(format!("{station} {fuel}"))
                    .or_default()
                    .push((stamp.clone(), price));
            }
        }
    }

    let data: Vec<serde_json::Value> = traces
        .into_iter()
        .map(|(name, mut points)| {
            points.sort_by(|a, b| a.0.cmp(&b.0));
            let x: Vec<&String> = points.iter().map(|(t, _)| t).collect();
            let y: Vec<f64> = points.iter().map(|(_, p)| *p).collect();
            serde_json::json!({
                "type": "scatter",
                "mode": "lines+markers",
                "name": name,
                "x": x,
                "y": y,
            })
        })
        .collect();

    serde_json::json!({
        "data": data,
        "layout": {
            "title": "Fuel Prices Over Time",
            "xaxis": { "title": "reported at" },
            "yaxis": { "title": "price" },
        }
    })
}
