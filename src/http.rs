//! HTTP query interface.
//!
//! - `GET /getTilts?time=T` - every device heard after `T`, keyed by color label
//! - `GET /getTilt?color=C&time=T` - one device, or 404 when not heard after `T`
//! - `GET /?refresh=N` - status page, optionally refreshing every `N` seconds
//!
//! Handlers only read snapshots of the device store.

use crate::label::{self, LabelMap};
use crate::query::{self, TiltStatus};
use crate::registry::ColorLabel;
use crate::store::{self, SharedStore};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

/// State shared by all handlers.
#[derive(Debug)]
pub struct HttpState {
    pub store: SharedStore,
    pub labels: LabelMap,
}

#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    time: Option<String>,
    color: Option<String>,
    refresh: Option<String>,
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/getTilts", get(get_tilts))
        .route("/getTilt", get(get_tilt))
        .with_state(state)
}

async fn get_tilts(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<QueryParams>,
) -> Json<BTreeMap<String, TiltStatus>> {
    let watermark = query::parse_watermark(params.time.as_deref());
    let store = store::lock(&state.store);
    Json(query::all_since(&store, watermark))
}

async fn get_tilt(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<QueryParams>,
) -> Response {
    let watermark = query::parse_watermark(params.time.as_deref());
    let label = params
        .color
        .as_deref()
        .and_then(|c| c.parse::<ColorLabel>().ok());

    let status = label.and_then(|label| {
        let store = store::lock(&state.store);
        query::one_since(&store, label, watermark)
    });

    match status {
        Some(status) => Json(status).into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn index(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<QueryParams>,
) -> Html<String> {
    let refresh = params
        .refresh
        .as_deref()
        .and_then(|r| r.trim().parse::<u32>().ok());
    let snapshots = store::lock(&state.store).heard_since(0);

    let mut html = String::from("<html><head><title>Tilt Relay</title>");
    if let Some(seconds) = refresh {
        let _ = write!(html, "<meta http-equiv=\"refresh\" content=\"{seconds}\">");
    }
    html.push_str("</head><body><h1>Tilt Relay</h1><ul>");

    for snapshot in &snapshots {
        let Some(reading) = snapshot.state.reading else {
            continue;
        };
        let variant = snapshot.identity.variant();
        let scaled = reading.scaled(variant);
        let heard = DateTime::from_timestamp(snapshot.state.last_heard, 0)
            .map(|t| t.with_timezone(&Local).format("%a %b %e %H:%M:%S %Y").to_string())
            .unwrap_or_default();
        let name = label::display_name(&snapshot.identity.label, &state.labels);

        let _ = write!(
            html,
            "<li>{} : {:.*} sg, {:.*}&deg;F {}</li>",
            escape(&name),
            variant.gravity_decimals(),
            scaled.gravity,
            variant.temperature_decimals(),
            scaled.temperature,
            heard
        );
    }

    html.push_str("</ul></body></html>");
    Html(html)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
