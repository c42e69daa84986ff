//! Per-endpoint queue of downlink requests for queue-mode clients.
//!
//! Entries are grouped into sequences. A plain enqueue opens a new sequence at
//! the tail; enqueueing with an existing sequence id appends to that sequence,
//! ahead of anything queued after it. Reordering moves whole sequences, so
//! entries of one sequence always stay together and in insertion order.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use lwm2m_core::{DownlinkRequest, RequestTicket};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{QueueError, Result};

/// Identifier of a sequence, unique across the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(u64);

impl SequenceId {
    /// Raw sequence number.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Not in a queue.
    Unknown,
    /// Waiting for the client to be reachable.
    Enqueued,
    /// Being sent.
    Processing,
    /// Sent while the client was asleep; will be retried.
    Deferred,
    /// Send expiration passed before delivery.
    TtlElapsed,
    /// Delivered and answered.
    Executed,
}

impl RequestState {
    fn can_become(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Enqueued, Processing)
                | (Enqueued, TtlElapsed)
                | (Deferred, Processing)
                | (Deferred, TtlElapsed)
                | (Processing, Executed)
                | (Processing, Deferred)
                | (Processing, TtlElapsed)
        )
    }

    /// Waiting for delivery.
    pub fn is_pending(self) -> bool {
        matches!(self, RequestState::Enqueued | RequestState::Deferred)
    }
}

/// A downlink request waiting in the queue.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    endpoint: String,
    ticket: RequestTicket,
    request: DownlinkRequest,
    enqueued_at: Instant,
    send_expiration: Instant,
    keep_expiration: Instant,
    state: RequestState,
    sequence: Option<SequenceId>,
}

impl QueuedRequest {
    /// Creates a request expiring `send_ttl` and `keep_ttl` after `now`.
    pub fn new(
        endpoint: impl Into<String>,
        ticket: RequestTicket,
        request: DownlinkRequest,
        now: Instant,
        send_ttl: Duration,
        keep_ttl: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            ticket,
            request,
            enqueued_at: now,
            send_expiration: now + send_ttl,
            keep_expiration: now + keep_ttl,
            state: RequestState::Unknown,
            sequence: None,
        }
    }

    /// Target client endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ticket identifying the request.
    pub fn ticket(&self) -> &RequestTicket {
        &self.ticket
    }

    /// The request to send.
    pub fn request(&self) -> &DownlinkRequest {
        &self.request
    }

    /// Time the request was queued.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Deadline for sending.
    pub fn send_expiration(&self) -> Instant {
        self.send_expiration
    }

    /// Deadline for removal once expired.
    pub fn keep_expiration(&self) -> Instant {
        self.keep_expiration
    }

    /// Current request state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Sequence holding this request, once enqueued.
    pub fn sequence(&self) -> Option<SequenceId> {
        self.sequence
    }
}

#[derive(Debug, Default)]
struct EndpointQueue {
    order: Vec<SequenceId>,
    sequences: HashMap<SequenceId, Vec<QueuedRequest>>,
}

impl EndpointQueue {
    fn locate(&self, ticket: &RequestTicket) -> Option<(SequenceId, usize)> {
        self.order.iter().find_map(|sequence| {
            self.sequences
                .get(sequence)?
                .iter()
                .position(|entry| &entry.ticket == ticket)
                .map(|index| (*sequence, index))
        })
    }

    fn position(&self, sequence: SequenceId) -> Option<usize> {
        self.order.iter().position(|s| *s == sequence)
    }

    fn entries(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.order
            .iter()
            .filter_map(|sequence| self.sequences.get(sequence))
            .flatten()
    }

    fn entry_mut(&mut self, ticket: &RequestTicket) -> Option<&mut QueuedRequest> {
        let (sequence, index) = self.locate(ticket)?;
        self.sequences.get_mut(&sequence)?.get_mut(index)
    }

    fn remove_empty_sequences(&mut self) {
        let sequences = &mut self.sequences;
        sequences.retain(|_, entries| !entries.is_empty());
        self.order.retain(|sequence| sequences.contains_key(sequence));
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Outcome of [`RequestQueue::sweep_expired`].
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Requests whose send expiration passed before delivery.
    pub expired: Vec<(String, RequestTicket)>,
    /// Requests removed because their keep expiration passed.
    pub removed: Vec<(String, RequestTicket)>,
}

/// Queues of all endpoints.
#[derive(Debug, Default)]
pub struct RequestQueue {
    endpoints: HashMap<String, EndpointQueue>,
    last_sequence: u64,
}

impl RequestQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `request` as a new sequence at the tail of its endpoint's queue.
    pub fn enqueue(&mut self, mut request: QueuedRequest) -> Result<SequenceId> {
        self.check_enqueueable(&request)?;
        self.last_sequence += 1;
        let sequence = SequenceId(self.last_sequence);
        request.state = RequestState::Enqueued;
        request.sequence = Some(sequence);

        debug!(endpoint = %request.endpoint, ticket = %request.ticket, sequence = %sequence, "request enqueued");
        let queue = self.endpoints.entry(request.endpoint.clone()).or_default();
        queue.order.push(sequence);
        queue.sequences.insert(sequence, vec![request]);
        Ok(sequence)
    }

    /// Appends `request` to an existing sequence of its endpoint.
    pub fn enqueue_in_sequence(
        &mut self,
        mut request: QueuedRequest,
        sequence: SequenceId,
    ) -> Result<()> {
        self.check_enqueueable(&request)?;
        let entries = self
            .endpoints
            .get_mut(&request.endpoint)
            .and_then(|queue| queue.sequences.get_mut(&sequence))
            .ok_or_else(|| QueueError::UnknownSequence {
                endpoint: request.endpoint.clone(),
                sequence,
            })?;
        request.state = RequestState::Enqueued;
        request.sequence = Some(sequence);
        debug!(endpoint = %request.endpoint, ticket = %request.ticket, sequence = %sequence, "request appended to sequence");
        entries.push(request);
        Ok(())
    }

    fn check_enqueueable(&self, request: &QueuedRequest) -> Result<()> {
        if request.state != RequestState::Unknown {
            return Err(QueueError::NotEnqueueable {
                ticket: request.ticket.clone(),
                state: request.state,
            });
        }
        let duplicate = self
            .endpoints
            .get(&request.endpoint)
            .is_some_and(|queue| queue.locate(&request.ticket).is_some());
        if duplicate {
            return Err(QueueError::AlreadyEnqueued {
                ticket: request.ticket.clone(),
            });
        }
        Ok(())
    }

    /// Requests of `endpoint` in delivery order.
    pub fn requests(&self, endpoint: &str) -> Vec<&QueuedRequest> {
        self.endpoints
            .get(endpoint)
            .map(|queue| queue.entries().collect())
            .unwrap_or_default()
    }

    /// Sequences of `endpoint` in delivery order.
    pub fn sequences(&self, endpoint: &str) -> Vec<SequenceId> {
        self.endpoints
            .get(endpoint)
            .map(|queue| queue.order.clone())
            .unwrap_or_default()
    }

    /// Queued request by ticket.
    pub fn get(&self, endpoint: &str, ticket: &RequestTicket) -> Option<&QueuedRequest> {
        let queue = self.endpoints.get(endpoint)?;
        let (sequence, index) = queue.locate(ticket)?;
        queue.sequences.get(&sequence)?.get(index)
    }

    /// Endpoints with at least one queued request.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    /// Requests queued for one endpoint.
    pub fn len(&self, endpoint: &str) -> usize {
        self.endpoints
            .get(endpoint)
            .map(|queue| queue.entries().count())
            .unwrap_or(0)
    }

    /// True when no endpoint has queued requests.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// First request of `endpoint` waiting for delivery.
    pub fn next_deliverable(&self, endpoint: &str) -> Option<&QueuedRequest> {
        self.endpoints
            .get(endpoint)?
            .entries()
            .find(|entry| entry.state.is_pending())
    }

    /// Marks the next deliverable request as processing and returns what to send.
    pub fn start_processing(&mut self, endpoint: &str) -> Option<(RequestTicket, DownlinkRequest)> {
        let ticket = self.next_deliverable(endpoint)?.ticket.clone();
        let entry = self.endpoints.get_mut(endpoint)?.entry_mut(&ticket)?;
        entry.state = RequestState::Processing;
        Some((ticket, entry.request.clone()))
    }

    /// Moves a request to `state`, returning its previous state.
    pub fn set_state(
        &mut self,
        endpoint: &str,
        ticket: &RequestTicket,
        state: RequestState,
    ) -> Result<RequestState> {
        let entry = self
            .endpoints
            .get_mut(endpoint)
            .and_then(|queue| queue.entry_mut(ticket))
            .ok_or_else(|| unknown_request(endpoint, ticket))?;
        let previous = entry.state;
        if !previous.can_become(state) {
            return Err(QueueError::InvalidTransition {
                ticket: ticket.clone(),
                from: previous,
                to: state,
            });
        }
        entry.state = state;
        Ok(previous)
    }

    /// Moves the sequence holding `ticket` one step towards the head.
    pub fn move_up(&mut self, endpoint: &str, ticket: &RequestTicket) -> Result<()> {
        let sequence = self.sequence_of(endpoint, ticket)?;
        self.move_sequence_up(endpoint, sequence)
    }

    /// Moves the sequence holding `ticket` one step towards the tail.
    pub fn move_down(&mut self, endpoint: &str, ticket: &RequestTicket) -> Result<()> {
        let sequence = self.sequence_of(endpoint, ticket)?;
        self.move_sequence_down(endpoint, sequence)
    }

    /// Moves the sequence holding `ticket` to the head.
    pub fn move_top(&mut self, endpoint: &str, ticket: &RequestTicket) -> Result<()> {
        let sequence = self.sequence_of(endpoint, ticket)?;
        self.move_sequence_top(endpoint, sequence)
    }

    /// Moves the sequence holding `ticket` to the tail.
    pub fn move_bottom(&mut self, endpoint: &str, ticket: &RequestTicket) -> Result<()> {
        let sequence = self.sequence_of(endpoint, ticket)?;
        self.move_sequence_bottom(endpoint, sequence)
    }

    /// Swaps the sequence with the one ahead of it.
    pub fn move_sequence_up(&mut self, endpoint: &str, sequence: SequenceId) -> Result<()> {
        let (order, position) = self.order_mut(endpoint, sequence)?;
        if position > 0 {
            order.swap(position, position - 1);
        }
        Ok(())
    }

    /// Swaps the sequence with the one behind it.
    pub fn move_sequence_down(&mut self, endpoint: &str, sequence: SequenceId) -> Result<()> {
        let (order, position) = self.order_mut(endpoint, sequence)?;
        if position + 1 < order.len() {
            order.swap(position, position + 1);
        }
        Ok(())
    }

    /// Moves the sequence ahead of every other.
    pub fn move_sequence_top(&mut self, endpoint: &str, sequence: SequenceId) -> Result<()> {
        let (order, position) = self.order_mut(endpoint, sequence)?;
        let moved = order.remove(position);
        order.insert(0, moved);
        Ok(())
    }

    /// Moves the sequence behind every other.
    pub fn move_sequence_bottom(&mut self, endpoint: &str, sequence: SequenceId) -> Result<()> {
        let (order, position) = self.order_mut(endpoint, sequence)?;
        let moved = order.remove(position);
        order.push(moved);
        Ok(())
    }

    /// Removes a request without executing it. Its sequence goes away once empty.
    pub fn drop_request(&mut self, endpoint: &str, ticket: &RequestTicket) -> Option<QueuedRequest> {
        let queue = self.endpoints.get_mut(endpoint)?;
        let (sequence, index) = queue.locate(ticket)?;
        let removed = queue.sequences.get_mut(&sequence)?.remove(index);
        queue.remove_empty_sequences();
        if queue.is_empty() {
            self.endpoints.remove(endpoint);
        }
        debug!(endpoint, ticket = %ticket, "request dropped");
        Some(removed)
    }

    /// Removes a whole sequence without executing it.
    pub fn drop_sequence(&mut self, endpoint: &str, sequence: SequenceId) -> Vec<QueuedRequest> {
        let Some(queue) = self.endpoints.get_mut(endpoint) else {
            return Vec::new();
        };
        let removed = queue.sequences.remove(&sequence).unwrap_or_default();
        queue.order.retain(|s| *s != sequence);
        if queue.is_empty() {
            self.endpoints.remove(endpoint);
        }
        debug!(endpoint, sequence = %sequence, count = removed.len(), "sequence dropped");
        removed
    }

    /// Removes an executed request. The returned copy is back to [`RequestState::Unknown`].
    pub fn unqueue_request(
        &mut self,
        endpoint: &str,
        ticket: &RequestTicket,
    ) -> Result<QueuedRequest> {
        let state = self
            .get(endpoint, ticket)
            .map(|entry| entry.state)
            .ok_or_else(|| unknown_request(endpoint, ticket))?;
        if state != RequestState::Executed {
            return Err(QueueError::InvalidTransition {
                ticket: ticket.clone(),
                from: state,
                to: RequestState::Unknown,
            });
        }
        let mut removed = self
            .drop_request(endpoint, ticket)
            .ok_or_else(|| unknown_request(endpoint, ticket))?;
        removed.state = RequestState::Unknown;
        removed.sequence = None;
        Ok(removed)
    }

    /// Removes everything queued for `endpoint`.
    pub fn remove_all(&mut self, endpoint: &str) -> Vec<QueuedRequest> {
        self.endpoints
            .remove(endpoint)
            .map(|mut queue| {
                let order = std::mem::take(&mut queue.order);
                order
                    .into_iter()
                    .filter_map(|sequence| queue.sequences.remove(&sequence))
                    .flatten()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Applies expirations at `now`.
    ///
    /// Pending requests past their send expiration become [`RequestState::TtlElapsed`].
    /// Requests past their keep expiration are removed, unless being processed.
    pub fn sweep_expired(&mut self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        for (endpoint, queue) in self.endpoints.iter_mut() {
            for entries in queue.sequences.values_mut() {
                entries.retain_mut(|entry| {
                    if entry.state.is_pending() && now >= entry.send_expiration {
                        entry.state = RequestState::TtlElapsed;
                        report.expired.push((endpoint.clone(), entry.ticket.clone()));
                    }
                    let finished = matches!(
                        entry.state,
                        RequestState::TtlElapsed | RequestState::Executed
                    );
                    if finished && now >= entry.keep_expiration {
                        report.removed.push((endpoint.clone(), entry.ticket.clone()));
                        false
                    } else {
                        true
                    }
                });
            }
            queue.remove_empty_sequences();
        }
        self.endpoints.retain(|_, queue| !queue.is_empty());
        if !report.expired.is_empty() || !report.removed.is_empty() {
            debug!(
                expired = report.expired.len(),
                removed = report.removed.len(),
                "queue expiration sweep"
            );
        }
        report
    }

    fn sequence_of(&self, endpoint: &str, ticket: &RequestTicket) -> Result<SequenceId> {
        self.endpoints
            .get(endpoint)
            .and_then(|queue| queue.locate(ticket))
            .map(|(sequence, _)| sequence)
            .ok_or_else(|| unknown_request(endpoint, ticket))
    }

    fn order_mut(
        &mut self,
        endpoint: &str,
        sequence: SequenceId,
    ) -> Result<(&mut Vec<SequenceId>, usize)> {
        let queue = self
            .endpoints
            .get_mut(endpoint)
            .ok_or_else(|| unknown_sequence(endpoint, sequence))?;
        let position = queue
            .position(sequence)
            .ok_or_else(|| unknown_sequence(endpoint, sequence))?;
        Ok((&mut queue.order, position))
    }
}

fn unknown_request(endpoint: &str, ticket: &RequestTicket) -> QueueError {
    QueueError::UnknownRequest {
        endpoint: endpoint.to_string(),
        ticket: ticket.clone(),
    }
}

fn unknown_sequence(endpoint: &str, sequence: SequenceId) -> QueueError {
    QueueError::UnknownSequence {
        endpoint: endpoint.to_string(),
        sequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwm2m_core::DownlinkOperation;
    use proptest::prelude::*;

    const EP: &str = "dev-1";

    fn request(ticket: &str, now: Instant) -> QueuedRequest {
        QueuedRequest::new(
            EP,
            RequestTicket::from(ticket),
            DownlinkRequest::new(DownlinkOperation::Read, "/3/0/0"),
            now,
            Duration::from_secs(60),
            Duration::from_secs(120),
        )
    }

    fn order(queue: &RequestQueue) -> Vec<String> {
        queue
            .requests(EP)
            .iter()
            .map(|entry| entry.ticket().to_string())
            .collect()
    }

    mod enqueue {
        use super::*;

        #[test]
        fn test_sequence_append_precedes_later_sequences() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            let a = queue.enqueue(request("A", now)).unwrap();
            let b = queue.enqueue(request("B", now)).unwrap();
            queue.enqueue_in_sequence(request("C", now), a).unwrap();

            assert_ne!(a, b);
            assert_eq!(order(&queue), vec!["A", "C", "B"]);
            assert_eq!(queue.sequences(EP), vec![a, b]);
            assert_eq!(queue.get(EP, &"C".into()).unwrap().sequence(), Some(a));
        }

        #[test]
        fn test_fresh_sequence_ids() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            let first = queue.enqueue(request("A", now)).unwrap();
            let second = queue.enqueue(request("B", now)).unwrap();
            assert!(second.value() > first.value());
            assert_eq!(first.value(), 1);
        }

        #[test]
        fn test_duplicate_enqueue_is_illegal() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            queue.enqueue(request("A", now)).unwrap();
            let err = queue.enqueue(request("A", now)).unwrap_err();
            assert!(matches!(err, QueueError::AlreadyEnqueued { .. }));
            assert_eq!(queue.len(EP), 1);
        }

        #[test]
        fn test_enqueue_already_enqueued_copy_is_illegal() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            queue.enqueue(request("A", now)).unwrap();
            let copy = queue.get(EP, &"A".into()).unwrap().clone();
            let mut other = RequestQueue::new();
            assert!(matches!(
                other.enqueue(copy),
                Err(QueueError::NotEnqueueable { .. })
            ));
        }

        #[test]
        fn test_unknown_sequence() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            let err = queue
                .enqueue_in_sequence(request("A", now), SequenceId(99))
                .unwrap_err();
            assert!(matches!(err, QueueError::UnknownSequence { .. }));
        }
    }

    mod states {
        use super::*;

        #[test]
        fn test_processing_then_executed_then_unqueue() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            queue.enqueue(request("A", now)).unwrap();

            let (ticket, _) = queue.start_processing(EP).unwrap();
            assert_eq!(ticket.as_str(), "A");
            assert!(queue.next_deliverable(EP).is_none());
            queue
                .set_state(EP, &ticket, RequestState::Executed)
                .unwrap();
            let removed = queue.unqueue_request(EP, &ticket).unwrap();
            assert_eq!(removed.state(), RequestState::Unknown);
            assert!(queue.is_empty());
        }

        #[test]
        fn test_deferred_keeps_position() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            queue.enqueue(request("A", now)).unwrap();
            queue.enqueue(request("B", now)).unwrap();

            let (ticket, _) = queue.start_processing(EP).unwrap();
            queue
                .set_state(EP, &ticket, RequestState::Deferred)
                .unwrap();
            assert_eq!(queue.next_deliverable(EP).unwrap().ticket().as_str(), "A");
        }

        #[test]
        fn test_invalid_transitions() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            queue.enqueue(request("A", now)).unwrap();
            let ticket = RequestTicket::from("A");
            assert!(matches!(
                queue.set_state(EP, &ticket, RequestState::Executed),
                Err(QueueError::InvalidTransition { .. })
            ));
            assert!(matches!(
                queue.unqueue_request(EP, &ticket),
                Err(QueueError::InvalidTransition { .. })
            ));
            assert!(matches!(
                queue.set_state(EP, &"missing".into(), RequestState::Processing),
                Err(QueueError::UnknownRequest { .. })
            ));
        }
    }

    mod reorder {
        use super::*;

        fn three_sequences() -> (RequestQueue, Vec<SequenceId>) {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            let s1 = queue.enqueue(request("r1", now)).unwrap();
            queue.enqueue_in_sequence(request("r2", now), s1).unwrap();
            let s2 = queue.enqueue(request("r3", now)).unwrap();
            let s3 = queue.enqueue(request("r4", now)).unwrap();
            (queue, vec![s1, s2, s3])
        }

        #[test]
        fn test_move_request_up_over_sequence() {
            let (mut queue, _) = three_sequences();
            queue.move_up(EP, &"r3".into()).unwrap();
            assert_eq!(order(&queue), vec!["r3", "r1", "r2", "r4"]);
        }

        #[test]
        fn test_move_request_moves_its_sequence() {
            let (mut queue, _) = three_sequences();
            queue.move_down(EP, &"r2".into()).unwrap();
            assert_eq!(order(&queue), vec!["r3", "r1", "r2", "r4"]);
            queue.move_bottom(EP, &"r1".into()).unwrap();
            assert_eq!(order(&queue), vec!["r3", "r4", "r1", "r2"]);
            queue.move_top(EP, &"r4".into()).unwrap();
            assert_eq!(order(&queue), vec!["r4", "r3", "r1", "r2"]);
        }

        #[test]
        fn test_move_sequence_at_edges_is_noop() {
            let (mut queue, sequences) = three_sequences();
            queue.move_sequence_up(EP, sequences[0]).unwrap();
            queue.move_sequence_down(EP, sequences[2]).unwrap();
            assert_eq!(order(&queue), vec!["r1", "r2", "r3", "r4"]);
        }

        #[test]
        fn test_move_sequence_top_and_bottom() {
            let (mut queue, sequences) = three_sequences();
            queue.move_sequence_top(EP, sequences[2]).unwrap();
            assert_eq!(order(&queue), vec!["r4", "r1", "r2", "r3"]);
            queue.move_sequence_bottom(EP, sequences[0]).unwrap();
            assert_eq!(order(&queue), vec!["r4", "r3", "r1", "r2"]);
        }

        #[test]
        fn test_move_unknown() {
            let (mut queue, _) = three_sequences();
            assert!(matches!(
                queue.move_up(EP, &"nope".into()),
                Err(QueueError::UnknownRequest { .. })
            ));
            assert!(matches!(
                queue.move_sequence_top("other", SequenceId(1)),
                Err(QueueError::UnknownSequence { .. })
            ));
        }
    }

    mod removal {
        use super::*;

        #[test]
        fn test_drop_request_removes_empty_sequence() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            let s1 = queue.enqueue(request("A", now)).unwrap();
            let s2 = queue.enqueue(request("B", now)).unwrap();
            assert!(queue.drop_request(EP, &"A".into()).is_some());
            assert_eq!(queue.sequences(EP), vec![s2]);
            assert!(queue.drop_request(EP, &"A".into()).is_none());
            assert!(matches!(
                queue.enqueue_in_sequence(request("C", now), s1),
                Err(QueueError::UnknownSequence { .. })
            ));
        }

        #[test]
        fn test_drop_sequence() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            let s1 = queue.enqueue(request("A", now)).unwrap();
            queue.enqueue_in_sequence(request("B", now), s1).unwrap();
            queue.enqueue(request("C", now)).unwrap();
            let dropped = queue.drop_sequence(EP, s1);
            assert_eq!(dropped.len(), 2);
            assert_eq!(order(&queue), vec!["C"]);
        }

        #[test]
        fn test_remove_all_in_order() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            let s1 = queue.enqueue(request("A", now)).unwrap();
            queue.enqueue(request("B", now)).unwrap();
            queue.enqueue_in_sequence(request("C", now), s1).unwrap();
            let removed: Vec<String> = queue
                .remove_all(EP)
                .iter()
                .map(|entry| entry.ticket().to_string())
                .collect();
            assert_eq!(removed, vec!["A", "C", "B"]);
            assert!(queue.is_empty());
            assert!(queue.endpoints().is_empty());
        }

        #[test]
        fn test_sweep_expired() {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            queue.enqueue(request("A", now)).unwrap();
            queue.enqueue(request("B", now)).unwrap();
            let (ticket, _) = queue.start_processing(EP).unwrap();
            assert_eq!(ticket.as_str(), "A");

            let report = queue.sweep_expired(now + Duration::from_secs(30));
            assert!(report.expired.is_empty());

            let report = queue.sweep_expired(now + Duration::from_secs(61));
            assert_eq!(report.expired, vec![(EP.to_string(), "B".into())]);
            assert_eq!(
                queue.get(EP, &"B".into()).unwrap().state(),
                RequestState::TtlElapsed
            );
            assert!(queue.next_deliverable(EP).is_none());

            let report = queue.sweep_expired(now + Duration::from_secs(121));
            assert_eq!(report.removed, vec![(EP.to_string(), "B".into())]);
            // Processing entries are left alone.
            assert_eq!(order(&queue), vec!["A"]);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue,
        Append(usize),
        MoveUp(usize),
        MoveDown(usize),
        MoveTop(usize),
        MoveBottom(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Enqueue),
            (0usize..8).prop_map(Op::Append),
            (0usize..8).prop_map(Op::MoveUp),
            (0usize..8).prop_map(Op::MoveDown),
            (0usize..8).prop_map(Op::MoveTop),
            (0usize..8).prop_map(Op::MoveBottom),
        ]
    }

    proptest! {
        #[test]
        fn prop_sequences_stay_contiguous_and_ordered(ops in proptest::collection::vec(op(), 1..40)) {
            let now = Instant::now();
            let mut queue = RequestQueue::new();
            let mut members: Vec<(SequenceId, Vec<String>)> = Vec::new();
            let mut next = 0usize;

            for op in ops {
                match op {
                    Op::Enqueue => {
                        let ticket = format!("t{}", next);
                        next += 1;
                        let sequence = queue.enqueue(request(&ticket, now)).unwrap();
                        members.push((sequence, vec![ticket]));
                    }
                    Op::Append(i) if !members.is_empty() => {
                        let ticket = format!("t{}", next);
                        next += 1;
                        let slot = i % members.len();
                        queue.enqueue_in_sequence(request(&ticket, now), members[slot].0).unwrap();
                        members[slot].1.push(ticket);
                    }
                    Op::MoveUp(i) | Op::MoveDown(i) | Op::MoveTop(i) | Op::MoveBottom(i)
                        if !members.is_empty() =>
                    {
                        let slot = i % members.len();
                        let ticket = RequestTicket::new(members[slot].1[0].clone());
                        match op {
                            Op::MoveUp(_) => queue.move_up(EP, &ticket).unwrap(),
                            Op::MoveDown(_) => queue.move_down(EP, &ticket).unwrap(),
                            Op::MoveTop(_) => queue.move_top(EP, &ticket).unwrap(),
                            _ => queue.move_bottom(EP, &ticket).unwrap(),
                        }
                    }
                    _ => {}
                }
            }

            let delivered = order(&queue);
            prop_assert_eq!(delivered.len(), next);
            for sequence in queue.sequences(EP) {
                let expected = &members.iter().find(|(s, _)| *s == sequence).unwrap().1;
                let start = delivered.iter().position(|t| t == &expected[0]).unwrap();
                prop_assert_eq!(&delivered[start..start + expected.len()], expected.as_slice());
            }
        }
    }
}
