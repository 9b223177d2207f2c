use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::warn;

use crate::clock::PresentationClock;
use crate::media::TimeUnit;
use crate::topology::Topology;

/// Identifies one pull through one topology.
#[derive(Debug, Clone)]
pub struct RequestPacket {
    pub packet_number: i64,
    pub request_time: TimeUnit,
    /// The topology that issued the request; completions for a dropped
    /// topology are discarded
    pub topology: Weak<Topology>,
}

impl RequestPacket {
    pub fn new(topology: &Arc<Topology>, request_time: TimeUnit) -> Self {
        Self {
            packet_number: topology.next_packet_number(),
            request_time,
            topology: Arc::downgrade(topology),
        }
    }

    pub fn topology(&self) -> Option<Arc<Topology>> {
        self.topology.upgrade()
    }

    pub fn clock(&self) -> Option<Arc<PresentationClock>> {
        self.topology().map(|t| t.clock().clone())
    }
}

/// Reorders per-packet entries so they can be consumed in packet order.
///
/// Entries may arrive out of order; only the entry numbered `first` can be
/// taken, after which `first` advances.
#[derive(Debug)]
pub struct RequestQueue<T> {
    first_packet_number: i64,
    last_packet_number: i64,
    requests: VecDeque<Option<T>>,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> RequestQueue<T> {
    pub fn new(first_packet_number: i64) -> Self {
        Self {
            first_packet_number,
            last_packet_number: first_packet_number,
            requests: VecDeque::new(),
        }
    }

    pub fn first_packet_number(&self) -> i64 {
        self.first_packet_number
    }

    pub fn last_packet_number(&self) -> i64 {
        self.last_packet_number
    }

    /// Number of slots between the floor and the highest pushed packet.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Store the entry for `packet_number`, which must not be below the floor.
    ///
    /// Release builds drop such an entry instead of panicking.
    pub fn push(&mut self, packet_number: i64, request: T) {
        debug_assert!(
            packet_number >= self.first_packet_number,
            "packet {} pushed below queue floor {}",
            packet_number,
            self.first_packet_number
        );
        if packet_number < self.first_packet_number {
            warn!(
                "Ignoring packet {} below queue floor {}",
                packet_number, self.first_packet_number
            );
            return;
        }
        let index = (packet_number - self.first_packet_number) as usize;
        if index >= self.requests.len() {
            self.requests.resize_with(index + 1, || None);
        }
        self.requests[index] = Some(request);
        self.last_packet_number = self.last_packet_number.max(packet_number);
    }

    /// The entry at the floor, if it has arrived.
    pub fn get(&self) -> Option<&T> {
        self.requests.front().and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, packet_number: i64) -> Option<&mut T> {
        if packet_number < self.first_packet_number {
            return None;
        }
        let index = (packet_number - self.first_packet_number) as usize;
        self.requests.get_mut(index).and_then(Option::as_mut)
    }

    /// Take the entry at the floor and advance the floor.
    pub fn pop(&mut self) -> Option<T> {
        if self.get().is_none() {
            return None;
        }
        self.first_packet_number += 1;
        self.requests.pop_front().flatten()
    }

    /// Advance the floor past a slot that may never arrive.
    pub fn skip(&mut self) -> Option<T> {
        if self.requests.is_empty() {
            return None;
        }
        self.first_packet_number += 1;
        self.requests.pop_front().flatten()
    }
}
