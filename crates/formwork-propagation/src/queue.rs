//! Five-band priority queue of update requests.
//!
//! Requests are served by `(priority, enqueue order)`. At most one request
//! per target entity is pending at any time; later work for the same target
//! is merged into it or supersedes it.
//!
//! Supersede and promotion leave the old id behind in its band. Such stale
//! ids are skipped on pop, and the bands are compacted once stale ids
//! outnumber waiting requests, so band storage stays within twice the
//! number of waiting requests plus one.

use std::collections::{HashMap, VecDeque};

use formwork_core::EntityRef;

use crate::request::{ChangePayload, Priority, RequestId, RequestState, UpdateRequest};

#[derive(Debug, Default)]
pub struct UpdateQueue {
    bands: [VecDeque<RequestId>; 5],
    requests: HashMap<RequestId, UpdateRequest>,
    pending: HashMap<EntityRef, RequestId>,
    /// Ids left in a band whose request was withdrawn or moved.
    stale: usize,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request. A request already pending for the same target is
    /// superseded and returned.
    pub fn push(&mut self, request: UpdateRequest) -> Option<UpdateRequest> {
        let displaced = self.supersede(&request.target);
        self.bands[request.priority.band()].push_back(request.id);
        self.pending.insert(request.target.clone(), request.id);
        self.requests.insert(request.id, request);
        displaced
    }

    /// The pending request for `target`, if any.
    pub fn pending_for(&self, target: &EntityRef) -> Option<&UpdateRequest> {
        self.pending.get(target).and_then(|id| self.requests.get(id))
    }

    pub fn get(&self, id: RequestId) -> Option<&UpdateRequest> {
        self.requests.get(&id)
    }

    /// Withdraw the pending request for `target`, marking it superseded.
    pub fn supersede(&mut self, target: &EntityRef) -> Option<UpdateRequest> {
        let id = self.pending.remove(target)?;
        let mut request = self.requests.remove(&id)?;
        request.state = RequestState::Superseded;
        self.mark_stale();
        Some(request)
    }

    /// Fold new work into the pending request for `target`.
    ///
    /// The request keeps its queue position unless `priority` is more urgent,
    /// in which case it moves to the back of that band. A recompute payload
    /// replaces an older recompute payload; other payloads are left alone.
    pub fn merge(
        &mut self,
        target: &EntityRef,
        priority: Priority,
        payload: ChangePayload,
    ) -> Option<RequestId> {
        let id = *self.pending.get(target)?;
        let request = self.requests.get_mut(&id)?;
        if matches!(request.payload, ChangePayload::Recompute { .. })
            && matches!(payload, ChangePayload::Recompute { .. })
        {
            request.payload = payload;
        }
        if priority < request.priority {
            // The stale entry in the old band is skipped on pop.
            request.priority = priority;
            self.bands[priority.band()].push_back(id);
            self.mark_stale();
        }
        Some(id)
    }

    fn mark_stale(&mut self) {
        self.stale += 1;
        self.compact();
    }

    fn compact(&mut self) {
        if self.stale > self.requests.len() {
            let requests = &self.requests;
            for band in Priority::ALL {
                self.bands[band.band()]
                    .retain(|id| requests.get(id).is_some_and(|r| r.priority == band));
            }
            self.stale = 0;
        }
    }

    /// Ids held across all bands, stale ones included.
    pub fn band_storage(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    /// Remove and return the next request to serve.
    pub fn pop(&mut self) -> Option<UpdateRequest> {
        for band in Priority::ALL {
            while let Some(id) = self.bands[band.band()].pop_front() {
                let live = self
                    .requests
                    .get(&id)
                    .is_some_and(|r| r.priority == band);
                if !live {
                    self.stale = self.stale.saturating_sub(1);
                    continue;
                }
                let request = self.requests.remove(&id)?;
                self.pending.remove(&request.target);
                self.compact();
                return Some(request);
            }
        }
        None
    }

    /// Requests still waiting.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Number of waiting requests in one band.
    pub fn band_len(&self, priority: Priority) -> usize {
        self.requests
            .values()
            .filter(|r| r.priority == priority)
            .count()
    }
}
