use crate::routes::Page;
use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ServiceInfo {
    service: &'static str,
    description: &'static str,
    detection_classes: Vec<String>,
    confidence_threshold: f32,
    modes: Vec<Mode>,
}

#[derive(Serialize)]
pub struct Mode {
    page: &'static str,
    path: &'static str,
}

pub async fn home(State(state): State<SharedState>) -> impl IntoResponse {
    state.metrics.record_request("home");

    Json(ServiceInfo {
        service: "ppe_detection",
        description: "Detects personal protective equipment (helmets and safety \
                      vests) on construction workers in images, videos and live \
                      webcam feeds.",
        detection_classes: state.labels.names(),
        confidence_threshold: state.pipeline.confidence_threshold,
        modes: Page::ALL
            .iter()
            .map(|p| Mode {
                page: p.name(),
                path: p.path(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::shared_state;

    #[tokio::test]
    async fn home_lists_all_pages_and_classes() {
        let response = home(State(shared_state())).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
