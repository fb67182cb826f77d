//! The cross-process writer gate (§4.A, §9 "Semaphore-as-writer-gate
//! across OS processes"). Serialises writes to one catalog file across
//! cooperating OS processes using a named OS file lock, with reentrancy
//! tracked per-process so a writer already holding the gate can acquire
//! it again (e.g. a helper that begins its own immediate transaction
//! while already inside one) without deadlocking itself.
//!
//! This is *not* a reader-writer lock: there is exactly one holder across
//! all cooperating processes at a time.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

pub struct WriterGate {
    lock_path: PathBuf,
    file: Mutex<Option<File>>,
    depth: Mutex<u32>,
}

impl WriterGate {
    pub fn new(catalog_path: &Path) -> Self {
        let lock_path = catalog_path.with_extension("gate");
        Self {
            lock_path,
            file: Mutex::new(None),
            depth: Mutex::new(0),
        }
    }

    /// Acquire the gate, blocking until available. Reentrant: nested
    /// acquisitions from the same process succeed immediately.
    pub fn acquire(&self) -> std::io::Result<GateGuard<'_>> {
        let mut depth = self.depth.lock().unwrap();
        if *depth == 0 {
            let mut file_slot = self.file.lock().unwrap();
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&self.lock_path)?;
            file.lock_exclusive()?;
            *file_slot = Some(file);
        }
        *depth += 1;
        Ok(GateGuard { gate: self })
    }

    fn release(&self) {
        let mut depth = self.depth.lock().unwrap();
        *depth -= 1;
        if *depth == 0 {
            let mut file_slot = self.file.lock().unwrap();
            if let Some(file) = file_slot.take() {
                let _ = fs2::FileExt::unlock(&file);
            }
        }
    }
}

pub struct GateGuard<'a> {
    gate: &'a WriterGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_acquire_does_not_deadlock() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = WriterGate::new(&tmp.path().join("source.db"));
        let outer = gate.acquire().unwrap();
        let inner = gate.acquire().unwrap();
        drop(inner);
        drop(outer);
    }

    #[test]
    fn sequential_acquisitions_both_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = WriterGate::new(&tmp.path().join("source.db"));
        {
            let _g = gate.acquire().unwrap();
        }
        {
            let _g = gate.acquire().unwrap();
        }
    }
}
