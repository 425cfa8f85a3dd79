//! Server-Sent Events endpoint: one run per request

use crate::server::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use duet_agent::ModelBackend;
use duet_core::{RoleModels, Task};
use duet_orchestrator::EventPublisher;
use duet_sandbox::Sandbox;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{info, warn};

/// Sentinel record closing every stream
const DONE: &str = "[DONE]";

/// Body of `POST /api/tdd`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TddRequest {
    pub task: String,
    #[serde(default)]
    pub planner_model: Option<String>,
    #[serde(default)]
    pub implementer_model: Option<String>,
}

impl TddRequest {
    /// Request models over the server defaults, ignoring blank overrides
    fn models(&self, defaults: &RoleModels) -> RoleModels {
        let pick = |requested: &Option<String>, default: &str| {
            requested
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        RoleModels::new(
            pick(&self.planner_model, &defaults.planner),
            pick(&self.implementer_model, &defaults.implementer),
        )
    }
}

/// POST /api/tdd - runs the loop and streams its events
pub async fn tdd_handler<M, S>(
    State(app): State<SharedState<M, S>>,
    Json(request): Json<TddRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<serde_json::Value>)>
where
    M: ModelBackend + 'static,
    S: Sandbox + 'static,
{
    let description = request.task.trim();
    if description.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "task must not be empty" })),
        ));
    }

    let task = Task::new(description);
    let models = request.models(&app.default_models);
    info!(planner = %models.planner, implementer = %models.implementer, "Starting run over SSE");

    let (publisher, mut events) = EventPublisher::channel(app.event_buffer);
    let runner = app.clone();
    tokio::spawn(async move {
        let report = runner.orchestrator.run(task, models, &publisher).await;
        if report.cancelled {
            warn!(run_id = %report.run_id, "Client disconnected before the run finished");
        }
    });

    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => warn!("Failed to serialize {} event: {}", event.kind(), e),
            }
        }
        yield Ok(Event::default().data(DONE));
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_field_names() {
        let request: TddRequest = serde_json::from_str(
            r#"{"task": "t", "plannerModel": "a/p", "implementerModel": "b/i"}"#,
        )
        .unwrap();
        assert_eq!(request.planner_model.as_deref(), Some("a/p"));
        assert_eq!(request.implementer_model.as_deref(), Some("b/i"));
    }

    #[test]
    fn test_blank_overrides_fall_back() {
        let request: TddRequest =
            serde_json::from_str(r#"{"task": "t", "plannerModel": " "}"#).unwrap();
        let models = request.models(&RoleModels::new("dp", "di"));
        assert_eq!(models, RoleModels::new("dp", "di"));
    }
}
