// SPDX-License-Identifier: GPL-3.0-or-later

//! State variables — a named, fixed-size memory region replicated
//! master→slaves each frame when flagged AUTO (§3, §4.2).

use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use crate::error::CoordinatorError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateVarFlags: u8 {
        const AUTO = 1 << 0;
    }
}

/// A tuple (tag, memory region, length, flags). The same tag is assumed
/// registered on master and every slave against equally-sized backing
/// storage (§3).
#[derive(Clone)]
pub struct StateVar {
    pub tag: i32,
    pub flags: StateVarFlags,
    storage: Arc<Mutex<Vec<u8>>>,
}

impl StateVar {
    /// Registers a state variable over an owned buffer of `len` bytes.
    pub fn new(tag: i32, len: usize, flags: StateVarFlags) -> Self {
        StateVar {
            tag,
            flags,
            storage: Arc::new(Mutex::new(vec![0u8; len])),
        }
    }

    /// Registers a state variable over caller-supplied shared storage,
    /// so the application can keep writing to the same buffer it reads
    /// application state from.
    pub fn from_shared(tag: i32, storage: Arc<Mutex<Vec<u8>>>, flags: StateVarFlags) -> Self {
        StateVar { tag, flags, storage }
    }

    pub fn len(&self) -> usize {
        self.storage.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write(&self, data: &[u8]) -> Result<(), CoordinatorError> {
        let mut buf = self.storage.lock().unwrap();
        if buf.len() != data.len() {
            return Err(CoordinatorError::StateVarLengthMismatch(
                self.tag,
                buf.len(),
                data.len(),
            ));
        }
        buf.copy_from_slice(data);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.storage.lock().unwrap().clone()
    }

    /// Copies an incoming STATE push payload into this variable's
    /// backing storage. A length mismatch is a recoverable error (§7
    /// tier 3): logged, message dropped, caller continues.
    pub fn copy_in(&self, payload: &[u8]) -> Result<(), CoordinatorError> {
        self.write(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_snapshot_round_trip() {
        let var = StateVar::new(7, 4, StateVarFlags::AUTO);
        var.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(var.snapshot(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let var = StateVar::new(7, 4, StateVarFlags::AUTO);
        assert!(var.write(&[1, 2, 3]).is_err());
    }
}
