//! Subscribe state machine
//!
//! Shared by both ends of a subscription: the subscriber tracks its
//! outgoing request in a [`SubscribeEntry`], the publisher tracks the
//! request it resolved in a `PeerSubscription` built on the same
//! [`SubscribeMachine`].
//!
//! ```text
//! Requested ─┬─► Resolved ─► Active ─► Ended
//!            │       └─────────────────► Ended
//!            └─► Rejected
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::protocol::{DeliveryCursor, ObjectHeaders, ObjectStatus, SubscribeFilter};
use crate::registry::TrackHash;

/// Objects held per subscription while an earlier group stream is open
pub const MAX_HELD_OBJECTS: usize = 256;

/// Lifecycle of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeState {
    Requested,
    Resolved,
    Active,
    Rejected,
    Ended,
}

/// Transition rules and deadlines
#[derive(Debug, Clone)]
pub struct SubscribeMachine {
    state: SubscribeState,
    /// Response deadline while Requested, expiry while Resolved/Active
    deadline: Option<Instant>,
}

impl SubscribeMachine {
    pub fn new(response_deadline: Option<Instant>) -> Self {
        Self {
            state: SubscribeState::Requested,
            deadline: response_deadline,
        }
    }

    pub fn state(&self) -> SubscribeState {
        self.state
    }

    /// Requested → Resolved; `expires` of zero means no expiry
    pub fn resolve(&mut self, expires: Duration, now: Instant) -> Result<(), SubscribeState> {
        if self.state != SubscribeState::Requested {
            return Err(self.state);
        }
        self.state = SubscribeState::Resolved;
        self.deadline = (!expires.is_zero()).then(|| now + expires);
        Ok(())
    }

    /// Requested → Rejected
    pub fn reject(&mut self) -> Result<(), SubscribeState> {
        if self.state != SubscribeState::Requested {
            return Err(self.state);
        }
        self.state = SubscribeState::Rejected;
        self.deadline = None;
        Ok(())
    }

    /// Resolved → Active (first admitted object); a no-op when already Active
    pub fn activate(&mut self) -> Result<(), SubscribeState> {
        match self.state {
            SubscribeState::Resolved => {
                self.state = SubscribeState::Active;
                Ok(())
            }
            SubscribeState::Active => Ok(()),
            other => Err(other),
        }
    }

    /// Resolved/Active → Ended
    pub fn end(&mut self) -> Result<(), SubscribeState> {
        match self.state {
            SubscribeState::Resolved | SubscribeState::Active => {
                self.state = SubscribeState::Ended;
                self.deadline = None;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Whether objects may be delivered
    pub fn accepts_objects(&self) -> bool {
        matches!(self.state, SubscribeState::Resolved | SubscribeState::Active)
    }

    /// Response deadline passed while Requested
    pub fn response_overdue(&self, now: Instant) -> bool {
        self.state == SubscribeState::Requested && self.deadline.is_some_and(|d| now >= d)
    }

    /// Expiry passed while Resolved/Active
    pub fn expired(&self, now: Instant) -> bool {
        self.accepts_objects() && self.deadline.is_some_and(|d| now >= d)
    }
}

/// Why an incoming object was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRejection {
    /// Subscription not Resolved or Active
    NotReady,
    /// Duplicate or older than the delivery cursor
    OutOfOrder,
}

/// Outcome for one object offered to a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admitted {
    Deliver(ObjectHeaders, Bytes),
    Dropped(ObjectHeaders, ObjectRejection),
}

/// Orders objects that arrive on several group streams
///
/// While the stream of group `g` is open, objects of groups after `g` are
/// held. They are released in (group, object) order once that stream
/// finishes or carries EndOfGroup.
#[derive(Debug, Default)]
pub struct GroupGate {
    open: BTreeSet<u64>,
    held: BTreeMap<(u64, u64), (ObjectHeaders, Bytes)>,
}

impl GroupGate {
    /// Lowest group whose stream is still open
    pub fn lowest_open(&self) -> Option<u64> {
        self.open.first().copied()
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    fn blocks(&self, group_id: u64) -> bool {
        self.lowest_open().is_some_and(|lowest| group_id > lowest)
    }
}

/// Outgoing subscription (this endpoint is the subscriber)
#[derive(Debug)]
pub struct SubscribeEntry {
    pub subscribe_id: u64,
    pub hash: TrackHash,
    pub priority: u8,
    pub filter: SubscribeFilter,
    pub machine: SubscribeMachine,
    pub cursor: DeliveryCursor,
    pub gate: GroupGate,
}

impl SubscribeEntry {
    pub fn new(
        subscribe_id: u64,
        hash: TrackHash,
        priority: u8,
        filter: SubscribeFilter,
        response_deadline: Instant,
    ) -> Self {
        Self {
            subscribe_id,
            hash,
            priority,
            filter,
            machine: SubscribeMachine::new(Some(response_deadline)),
            cursor: DeliveryCursor::new(),
            gate: GroupGate::default(),
        }
    }

    /// Validate an incoming object against state and cursor
    ///
    /// On success the cursor has advanced and the subscription is Active.
    pub fn admit(&mut self, headers: &ObjectHeaders) -> Result<(), ObjectRejection> {
        if !self.machine.accepts_objects() {
            return Err(ObjectRejection::NotReady);
        }
        if !self.cursor.admit(headers.group_id, headers.object_id) {
            return Err(ObjectRejection::OutOfOrder);
        }
        self.machine.activate().map_err(|_| ObjectRejection::NotReady)
    }

    /// A stream carrying `group_id` started; groups behind the cursor are ignored
    pub fn open_group(&mut self, group_id: u64) {
        let stale = self.cursor.last().is_some_and(|(last, _)| group_id < last);
        if !stale {
            self.gate.open.insert(group_id);
        }
    }

    /// The stream carrying `group_id` ended; release what it held back
    pub fn close_group(&mut self, group_id: u64, out: &mut Vec<Admitted>) {
        if self.gate.open.remove(&group_id) {
            self.release(out);
        }
    }

    /// Offer one object; deliverable objects are appended to `out` in order
    pub fn offer(&mut self, headers: ObjectHeaders, payload: Bytes, out: &mut Vec<Admitted>) {
        if !self.machine.accepts_objects() {
            out.push(Admitted::Dropped(headers, ObjectRejection::NotReady));
            return;
        }

        let group_id = headers.group_id;
        while self.gate.blocks(group_id) && self.gate.held.len() >= MAX_HELD_OBJECTS {
            // Stop waiting for the oldest open group
            self.gate.open.pop_first();
            self.release(out);
        }
        if self.gate.blocks(group_id) {
            self.gate.held.insert((group_id, headers.object_id), (headers, payload));
            return;
        }

        self.admit_into(headers, payload, out);
        self.release(out);
    }

    fn admit_into(&mut self, headers: ObjectHeaders, payload: Bytes, out: &mut Vec<Admitted>) {
        match self.admit(&headers) {
            Ok(()) => {
                if matches!(headers.status, ObjectStatus::EndOfGroup | ObjectStatus::EndOfTrack) {
                    self.gate.open.remove(&headers.group_id);
                }
                out.push(Admitted::Deliver(headers, payload));
            }
            Err(rejection) => out.push(Admitted::Dropped(headers, rejection)),
        }
    }

    fn release(&mut self, out: &mut Vec<Admitted>) {
        loop {
            let ready = match (self.gate.held.first_key_value(), self.gate.lowest_open()) {
                (Some((&(group_id, _), _)), Some(lowest)) => group_id <= lowest,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !ready {
                break;
            }
            let Some((_, (headers, payload))) = self.gate.held.pop_first() else {
                break;
            };
            self.admit_into(headers, payload, out);
        }
    }
}
