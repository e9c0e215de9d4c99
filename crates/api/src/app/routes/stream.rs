//! Direct streaming completions over server-sent events.
//!
//! Unlike jobs, nothing is persisted: the provider's fragments are forwarded
//! as `chunk` events, followed by one `usage` event. Failures after the
//! first byte are reported as an `error` event.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{rejection::JsonRejection, Extension},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use promptq_llm::{CompletionStream, StreamEvent, StreamRequest};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

type EventSender = UnboundedSender<Result<SseEvent, Infallible>>;

/// POST /stream
pub async fn stream_completion(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<StreamRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    let started = Instant::now();
    let upstream = match services.dispatcher.stream(&request).await {
        Ok(s) => s,
        Err(e) => return errors::provider_error_to_response(e),
    };
    debug!(principal = %principal.principal(), model = %request.model, "stream started");

    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();
    tokio::spawn(forward(upstream, tx, started));

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

/// Pump provider events into the SSE channel until the stream ends, fails,
/// or the client goes away.
async fn forward(mut upstream: CompletionStream, tx: EventSender, started: Instant) {
    while let Some(item) = upstream.next().await {
        let event = match item {
            Ok(StreamEvent::Fragment(text)) => SseEvent::default().event("chunk").data(text),
            Ok(StreamEvent::Done(usage)) => {
                let duration = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
                let payload = json!({
                    "promptTokens": usage.prompt_tokens,
                    "completionTokens": usage.completion_tokens,
                    "totalTokens": usage.total_tokens,
                    "duration": duration,
                });
                let _ = tx.send(Ok(SseEvent::default().event("usage").data(payload.to_string())));
                return;
            }
            Err(e) => {
                warn!(error = %e, "stream failed after start");
                let payload = json!({ "error": e.to_string() });
                let _ = tx.send(Ok(SseEvent::default().event("error").data(payload.to_string())));
                return;
            }
        };
        if tx.send(Ok(event)).is_err() {
            debug!("stream client disconnected");
            return;
        }
    }
}
