//! `GET /api/events` — the Server-Sent-Events stream.
//!
//! Keeps the teacher's `api::websocket` idiom of subscribing to a shared bus
//! and forwarding frames inside a dedicated stream, swapped from a
//! WebSocket upgrade onto axum's native SSE support per the wire format in
//! §6 (`data: <json>\n\n` frames, 30s keepalive comments).

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::api::state::ApiState;
use crate::events::{EventBus, Frame};
use std::sync::Arc;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Wraps a subscriber's receiver so dropping the stream (client disconnect)
/// releases its queue from the bus within the same tick.
struct SubscriberStream {
    inner: ReceiverStream<Frame>,
    events: Arc<EventBus>,
    id: u64,
}

impl Stream for SubscriberStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|opt| opt.map(|frame| Ok(Event::default().data(frame))))
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        self.events.unsubscribe_id(self.id);
    }
}

pub async fn events_stream(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.events.subscribe();
    let stream = SubscriberStream {
        id: subscription.id(),
        events: Arc::clone(&state.events),
        inner: ReceiverStream::new(subscription.receiver),
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("keepalive"))
}
