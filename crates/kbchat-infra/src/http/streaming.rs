//! SSE reply stream to [`FragmentStream`] adapter.
//!
//! The back-end frames every assistant text fragment as one SSE event
//! (`data: {fragment}\n\n`) and ends a successful reply with
//! `data: [DONE]`. Framing rules:
//!
//! 1. Each event's data is yielded as one fragment, in arrival order.
//! 2. `[DONE]` ends the sequence successfully; anything after it is ignored.
//! 3. A body that ends without `[DONE]` is a failure: the back-end dropped
//!    the connection mid-reply and has not persisted the assistant message.
//! 4. A transport error mid-body is a failure.

use std::fmt;

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use tracing::debug;

use kbchat_core::backend::FragmentStream;
use kbchat_types::error::ApiError;

use super::types::{DONE_MARKER, error_from_status, error_from_transport};

/// Dispatch a send-message request and stream back the reply fragments.
///
/// Lazy: the request is sent on first poll, and dropping the stream closes
/// the connection.
pub fn create_fragment_stream(request: reqwest::RequestBuilder) -> FragmentStream {
    Box::pin(async_stream::stream! {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                yield Err(error_from_transport(e));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            yield Err(error_from_status(status.as_u16(), &body));
            return;
        }

        let mut fragments = parse_fragments(response.bytes_stream(), error_from_transport);
        while let Some(fragment) = fragments.next().await {
            yield fragment;
        }
    })
}

/// Parse an SSE byte stream into reply fragments.
pub fn parse_fragments<S, B, E>(bytes: S, map_transport: fn(E) -> ApiError) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut events = Box::pin(bytes.eventsource());
        let mut count = 0usize;

        while let Some(event) = events.next().await {
            match event {
                Ok(event) if event.data == DONE_MARKER => return,
                Ok(event) => {
                    count += 1;
                    yield Ok(event.data);
                }
                Err(EventStreamError::Transport(e)) => {
                    yield Err(map_transport(e));
                    return;
                }
                Err(e) => {
                    yield Err(ApiError::Stream(e.to_string()));
                    return;
                }
            }
        }

        debug!(fragments = count, "Reply stream ended without terminator");
        yield Err(ApiError::IncompleteStream);
    })
}
