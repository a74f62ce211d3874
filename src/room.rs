//! Shared broadcast hub.
//!
//! The room keeps:
//! - The set of registered participants
//! - The most recent broadcast frames, replayed to newcomers
//! - A live member count that admission control can read without the lock
//!
//! Membership, history and fan-out all happen under a single mutex, so a
//! joiner never sees half-updated history and a broadcast never iterates a
//! half-updated member set.

use crate::protocol::Frame;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Number of broadcast frames kept for replay.
pub const MAX_RECENT_FRAMES: usize = 100;

/// Anything that can sit in the room and receive frames.
pub trait Participant: Send + Sync {
    /// Stable display name, fixed for the participant's lifetime.
    fn name(&self) -> &str;

    /// Queue a frame for this participant.
    ///
    /// Called with the room lock held, so it must not block.
    fn deliver(&self, frame: &Frame);
}

/// Display name for a peer: `"<ip> <port>"`.
pub fn display_name(peer: SocketAddr) -> String {
    format!("{} {}", peer.ip(), peer.port())
}

struct RoomState {
    members: Vec<Arc<dyn Participant>>,
    history: VecDeque<Frame>,
}

impl RoomState {
    fn position(&self, participant: &Arc<dyn Participant>) -> Option<usize> {
        self.members
            .iter()
            .position(|member| Arc::ptr_eq(member, participant))
    }

    fn broadcast(&self, frame: &Frame) {
        for member in &self.members {
            member.deliver(frame);
        }
    }
}

/// The single chat room of a server process.
pub struct Room {
    state: Mutex<RoomState>,
    member_count: AtomicUsize,
    capacity: usize,
}

impl Room {
    /// Create an empty room admitting at most `capacity` members.
    pub fn new(capacity: usize) -> Self {
        Room {
            state: Mutex::new(RoomState {
                members: Vec::new(),
                history: VecDeque::with_capacity(MAX_RECENT_FRAMES + 1),
            }),
            member_count: AtomicUsize::new(0),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a participant.
    ///
    /// Prior members get a join announcement, the joiner gets a welcome and
    /// then the replayed history. Returns `false` if it was already a member.
    pub fn join(&self, participant: Arc<dyn Participant>) -> bool {
        let mut state = self.lock();
        if state.position(&participant).is_some() {
            return false;
        }

        self.member_count.fetch_add(1, Ordering::SeqCst);

        let name = participant.name();
        state.broadcast(&Frame::clamped(&format!("user {name} joined the chat")));
        participant.deliver(&Frame::clamped(&format!("Welcome, user {name}!")));

        state.members.push(Arc::clone(&participant));
        for frame in &state.history {
            participant.deliver(frame);
        }

        debug!(name, members = state.members.len(), "Participant joined");
        true
    }

    /// Remove a participant and announce it to the remaining members.
    ///
    /// Returns `false` (and announces nothing) if it was not a member.
    pub fn leave(&self, participant: &Arc<dyn Participant>) -> bool {
        let mut state = self.lock();
        let Some(idx) = state.position(participant) else {
            return false;
        };

        state.members.swap_remove(idx);
        self.member_count.fetch_sub(1, Ordering::SeqCst);

        let name = participant.name();
        state.broadcast(&Frame::clamped(&format!("user {name} left the chat")));

        debug!(name, members = state.members.len(), "Participant left");
        true
    }

    /// Broadcast a frame to every member, sender included, and record it.
    pub fn deliver(&self, frame: Frame) {
        let mut state = self.lock();
        state.broadcast(&frame);

        state.history.push_back(frame);
        while state.history.len() > MAX_RECENT_FRAMES {
            state.history.pop_front();
        }
    }

    /// Live member count, readable without the room lock.
    pub fn current_member_count(&self) -> usize {
        self.member_count.load(Ordering::SeqCst)
    }

    /// Whether another member may be admitted.
    pub fn has_capacity(&self) -> bool {
        self.current_member_count() < self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently held for replay.
    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }
}
