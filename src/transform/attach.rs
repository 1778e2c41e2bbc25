//! Request-id propagation within a thread's active UDF span.
//!
//! Only boundary events reliably carry a request id. Per `(run, node, tid)`,
//! events are scanned in `(ts, lineno)` order carrying the id of the last
//! `UDF_START`; steps and the closing `UDF_STOP` without an id inherit it,
//! and `UDF_STOP` ends the span.
//!
//! Overlapping spans are not modelled: a second `UDF_START` before a stop
//! replaces the active id.

use crate::pipeline::compute::{Event, EventKind};

/// Fold state for one thread's timeline.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpanState {
    pub active_request_id: Option<String>,
}

impl SpanState {
    /// Advance over one event, filling its request id if needed.
    pub fn step(&mut self, mut event: Event) -> Event {
        let own = event
            .request_id
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        match event.event {
            EventKind::UdfStart => {
                if let Some(rid) = own {
                    self.active_request_id = Some(rid);
                }
            }
            EventKind::Step => {
                if own.is_none() {
                    event.request_id = self.active_request_id.clone();
                }
            }
            EventKind::UdfStop => {
                if own.is_none() {
                    event.request_id = self.active_request_id.take();
                }
                self.active_request_id = None;
            }
        }
        event
    }
}

/// Attach request ids over a thread-ordered sequence.
pub fn attach_thread(events: impl IntoIterator<Item = Event>) -> Vec<Event> {
    let mut state = SpanState::default();
    events.into_iter().map(|e| state.step(e)).collect()
}

/// Attach request ids across a whole event table.
///
/// Output is ordered by `(run, node, tid, ts, lineno)`; the input is not
/// required to be sorted.
pub fn attach_steps_to_requests(events: &[Event]) -> Vec<Event> {
    let mut sorted = events.to_vec();
    sorted.sort_by(|a, b| {
        a.run
            .cmp(&b.run)
            .then_with(|| a.node.cmp(&b.node))
            .then(a.tid.cmp(&b.tid))
            .then(a.ts.cmp(&b.ts))
            .then(a.lineno.cmp(&b.lineno))
    });

    let mut out = Vec::with_capacity(sorted.len());
    for thread in sorted.chunk_by(|a, b| a.run == b.run && a.node == b.node && a.tid == b.tid) {
        out.extend(attach_thread(thread.iter().cloned()));
    }
    out
}
