use crate::config::DEFAULT_CANDIDATE_CAP;
use crate::message::IceCandidate;
use crate::transport::{TransportError, TransportHandle};
use std::collections::VecDeque;
use std::mem;

/// Remote candidates that arrived before a remote description, in arrival order.
///
/// The buffer is bounded; pushing onto a full buffer evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct CandidateBuffer {
    entries: VecDeque<IceCandidate>,
    cap: usize,
}

/// Result of flushing a buffer into a transport.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    pub applied: usize,
    pub rejected: Vec<(IceCandidate, TransportError)>,
}

impl Default for CandidateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_CANDIDATE_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            entries: VecDeque::with_capacity(cap.min(DEFAULT_CANDIDATE_CAP)),
            cap,
        }
    }

    /// Appends a candidate. Returns the evicted candidate when the buffer was full.
    pub fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        let evicted = if self.entries.len() >= self.cap {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(candidate);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn iter(&self) -> impl Iterator<Item = &IceCandidate> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Applies every buffered candidate in arrival order and empties the buffer.
    ///
    /// A rejected candidate does not stop the drain; rejections are collected
    /// in the outcome for the caller to report.
    pub async fn drain_into(&mut self, transport: &dyn TransportHandle) -> DrainOutcome {
        let entries = mem::take(&mut self.entries);
        let mut outcome = DrainOutcome::default();
        for candidate in entries {
            match transport.add_remote_candidate(&candidate).await {
                Ok(()) => outcome.applied += 1,
                Err(err) => outcome.rejected.push((candidate, err)),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SessionDescription;
    use crate::mock::{MockTransport, TransportCall};
    use crate::peer_id::PeerId;
    use crate::transport::PeerTransport;
    use crate::config::TransportConfig;
    use tokio::sync::mpsc;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"), Some(0))
    }

    #[test]
    fn push_keeps_arrival_order() {
        let mut buffer = CandidateBuffer::new();
        for n in 1..=3 {
            assert!(buffer.push(candidate(n)).is_none());
        }
        let order: Vec<_> = buffer.iter().cloned().collect();
        assert_eq!(order, vec![candidate(1), candidate(2), candidate(3)]);
    }

    #[test]
    fn full_buffer_evicts_oldest() {
        let mut buffer = CandidateBuffer::with_cap(2);
        buffer.push(candidate(1));
        buffer.push(candidate(2));
        let evicted = buffer.push(candidate(3));
        assert_eq!(evicted, Some(candidate(1)));
        assert_eq!(buffer.len(), 2);
        let order: Vec<_> = buffer.iter().cloned().collect();
        assert_eq!(order, vec![candidate(2), candidate(3)]);
    }

    #[test]
    fn zero_cap_is_clamped() {
        let mut buffer = CandidateBuffer::with_cap(0);
        assert_eq!(buffer.cap(), 1);
        buffer.push(candidate(1));
        assert_eq!(buffer.push(candidate(2)), Some(candidate(1)));
    }

    #[tokio::test]
    async fn drain_applies_in_order_and_continues_past_rejections() {
        let peer = PeerId::from("AB3X9");
        let transport = MockTransport::new();
        transport.reject_candidate(&candidate(2).candidate);
        let (events, _rx) = mpsc::unbounded_channel();
        let handle = transport
            .create(&peer, &TransportConfig::default(), events)
            .await
            .unwrap();
        handle
            .set_remote_description(&SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let mut buffer = CandidateBuffer::new();
        for n in 1..=3 {
            buffer.push(candidate(n));
        }
        let outcome = buffer.drain_into(handle.as_ref()).await;

        assert!(buffer.is_empty());
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0, candidate(2));

        let applied: Vec<_> = transport
            .calls(&peer)
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AddRemoteCandidate(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![candidate(1), candidate(2), candidate(3)]);
    }
}
