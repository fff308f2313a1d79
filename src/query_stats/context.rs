use std::sync::Arc;

use crate::shape::{ShapeDescriptor, ShapeKey, ShapeKeyHash};

/// A registration waiting for its request to finish. Carries the key so finalizing never
/// has to rebuild it, and sums up latency and results over every batch of a cursor.
#[derive(Debug, Clone)]
pub struct PendingQueryStats {
    hash: ShapeKeyHash,
    key: Arc<ShapeKey>,
    descriptor: Arc<ShapeDescriptor>,
    exec_micros: u64,
    docs_returned: u64
}

impl PendingQueryStats {
    pub(crate) fn new(key: Arc<ShapeKey>, descriptor: Arc<ShapeDescriptor>) -> Self {
        PendingQueryStats { hash: key.hash(), key, descriptor, exec_micros: 0, docs_returned: 0 }
    }

    pub fn hash(&self) -> ShapeKeyHash {
        self.hash
    }

    pub fn key(&self) -> &Arc<ShapeKey> {
        &self.key
    }

    pub fn descriptor(&self) -> &Arc<ShapeDescriptor> {
        &self.descriptor
    }

    pub fn exec_micros(&self) -> u64 {
        self.exec_micros
    }

    pub fn docs_returned(&self) -> u64 {
        self.docs_returned
    }

    pub(crate) fn accumulate(&mut self, exec_micros: u64, docs_returned: u64) {
        self.exec_micros = self.exec_micros.saturating_add(exec_micros);
        self.docs_returned = self.docs_returned.saturating_add(docs_returned);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Registered,
    Finalized
}

/// Per request state. Dropping a registered context records nothing.
#[derive(Debug, Default)]
pub struct RequestContext {
    application_name: Option<String>,
    pending: Option<PendingQueryStats>,
    finalized: bool
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application_name(name: impl Into<String>) -> Self {
        RequestContext { application_name: Some(name.into()), ..Self::default() }
    }

    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    pub fn state(&self) -> RequestState {
        match (&self.pending, self.finalized) {
            (_, true) => RequestState::Finalized,
            (Some(_), false) => RequestState::Registered,
            (None, false) => RequestState::Idle
        }
    }

    pub fn pending(&self) -> Option<&PendingQueryStats> {
        self.pending.as_ref()
    }

    /// Adds the cost of one batch. Ignored unless the request is registered.
    pub fn record_batch(&mut self, exec_micros: u64, docs_returned: u64) {
        if let Some(pending) = &mut self.pending {
            pending.accumulate(exec_micros, docs_returned);
        }
    }

    /// Detaches the registration, e.g. when a cursor outlives the request that opened it.
    /// The context is idle afterwards.
    pub fn hand_off(&mut self) -> Option<PendingQueryStats> {
        self.pending.take()
    }

    /// Continues a registration handed off by an earlier request. The key is not rebuilt.
    pub fn resume(&mut self, pending: PendingQueryStats) {
        self.finalized = false;
        self.pending = Some(pending);
    }

    pub(crate) fn attach(&mut self, pending: PendingQueryStats) {
        self.pending = Some(pending);
    }

    pub(crate) fn take_for_finalize(&mut self) -> Option<PendingQueryStats> {
        let pending = self.pending.take()?;
        self.finalized = true;
        Some(pending)
    }
}
