//! Opaque CRDT engine wrapper
//!
//! One engine per cached document. Merge logic is owned by yrs; this
//! wrapper only exposes the operations the sync handshake and relay
//! need: apply update bytes, encode the full state, encode a delta
//! against a client-supplied state vector.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

/// CRDT state for one document.
///
/// Mutation serializes on an internal mutex, which is never held across
/// an await point; concurrent updates for the same document apply in
/// some order and converge by the engine's merge property.
pub struct DocEngine {
    doc: Mutex<Doc>,
}

impl DocEngine {
    /// Fresh empty state.
    pub fn new() -> Self {
        Self {
            doc: Mutex::new(Doc::new()),
        }
    }

    /// Reconstruct state from previously stored update bytes.
    pub fn from_update(bytes: &[u8]) -> Result<Self> {
        let engine = Self::new();
        engine.apply_update(bytes)?;
        Ok(engine)
    }

    /// Apply an update from a peer, mutating the state in place.
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update)
            .map_err(|e: yrs::encoding::read::Error| Error::Engine(e.to_string()))?;
        let doc = self.doc.lock();
        let mut txn = doc.transact_mut();
        txn.apply_update(decoded);
        Ok(())
    }

    /// Full state encoded against the empty state vector: a new client
    /// fast-forwards from nothing.
    pub fn encode_full(&self) -> Vec<u8> {
        let doc = self.doc.lock();
        let txn = doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Delta bringing a client with the given state vector up to date.
    pub fn encode_since(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(state_vector)
            .map_err(|e: yrs::encoding::read::Error| Error::Engine(e.to_string()))?;
        let doc = self.doc.lock();
        let txn = doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// This replica's state vector.
    pub fn state_vector(&self) -> Vec<u8> {
        let doc = self.doc.lock();
        let txn = doc.transact();
        txn.state_vector().encode_v1()
    }
}

impl Default for DocEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DocEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocEngine").finish_non_exhaustive()
    }
}
