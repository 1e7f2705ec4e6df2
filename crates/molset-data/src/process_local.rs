// ProcessLocal — one lazily opened handle per OS process
//
// A dataset object can reach a worker process by copy (serialization, or a
// Clone made before dispatch). Native file handles must not follow it: each
// process opens its own. The registry is therefore keyed by process id, never
// by object identity, and an entry recorded under another pid is treated as
// absent.
//
// State per process:  UNOPENED --first access--> OPEN --later access--> OPEN
// Handles are never closed here; they drop with the last copy of the
// registry that holds them.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use molset_core::Result;

/// Source of the current process identity.
pub type IdentityFn = fn() -> u32;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// The OS id of the calling process.
pub fn current_process_id() -> u32 {
    std::process::id()
}

/// Identity of one opened handle: the process that opened it plus a serial
/// number unique within that process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId {
    pub pid: u32,
    pub serial: u64,
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pid, self.serial)
    }
}

/// A handle together with the identity it was opened under.
#[derive(Debug)]
pub struct ProcessHandle<H> {
    id: HandleId,
    inner: H,
}

impl<H> ProcessHandle<H> {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn get(&self) -> &H {
        &self.inner
    }
}

impl<H> Deref for ProcessHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.inner
    }
}

/// Registry mapping process id to that process's handle.
pub struct ProcessLocal<H> {
    identity: IdentityFn,
    handles: Mutex<HashMap<u32, Arc<ProcessHandle<H>>>>,
}

impl<H> ProcessLocal<H> {
    /// An empty registry identified by [`current_process_id`].
    pub fn new() -> Self {
        Self::with_identity(current_process_id)
    }

    /// An empty registry with a custom identity source.
    ///
    /// Lets a single test process play the part of several workers.
    pub fn with_identity(identity: IdentityFn) -> Self {
        Self {
            identity,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Identity of the calling process as this registry sees it.
    pub fn process_id(&self) -> u32 {
        (self.identity)()
    }

    /// The calling process's handle, if it has opened one.
    pub fn current(&self) -> Option<Arc<ProcessHandle<H>>> {
        let pid = self.process_id();
        self.handles.lock().get(&pid).cloned()
    }

    /// Return the calling process's handle, opening it with `open` on first
    /// use.
    ///
    /// The lock is held while `open` runs, so concurrent first calls from
    /// threads of one process open exactly one handle. A failed `open`
    /// leaves the process in the unopened state; the next call tries again.
    pub fn get_or_try_open<F>(&self, open: F) -> Result<Arc<ProcessHandle<H>>>
    where
        F: FnOnce() -> Result<H>,
    {
        let pid = self.process_id();
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(&pid) {
            return Ok(handle.clone());
        }

        // Entries carried over from another process are unusable here.
        let stale = handles.len();
        if stale > 0 {
            warn!(pid, stale, "dropping handles inherited from other processes");
            handles.clear();
        }

        let inner = open()?;
        let id = HandleId {
            pid,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
        };
        debug!(handle = %id, "opened process-local handle");

        let handle = Arc::new(ProcessHandle { id, inner });
        handles.insert(pid, handle.clone());
        Ok(handle)
    }

    /// Number of recorded entries, including ones inherited from other
    /// processes and not yet pruned.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

impl<H> Default for ProcessLocal<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies the entries as they are, the way a forked child would inherit
/// them. They stay reachable only under their original pid.
impl<H> Clone for ProcessLocal<H> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity,
            handles: Mutex::new(self.handles.lock().clone()),
        }
    }
}

impl<H> fmt::Debug for ProcessLocal<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<HandleId> = self.handles.lock().values().map(|h| h.id).collect();
        f.debug_struct("ProcessLocal").field("handles", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::AtomicUsize;

    thread_local! {
        static FAKE_PID: Cell<u32> = const { Cell::new(100) };
    }

    fn fake_pid() -> u32 {
        FAKE_PID.with(|p| p.get())
    }

    fn become_process(pid: u32) {
        FAKE_PID.with(|p| p.set(pid));
    }

    #[test]
    fn starts_unopened() {
        let reg: ProcessLocal<String> = ProcessLocal::new();
        assert!(reg.is_empty());
        assert!(reg.current().is_none());
        assert_eq!(reg.process_id(), std::process::id());
    }

    #[test]
    fn same_process_reuses_handle() {
        let reg = ProcessLocal::new();
        let opens = AtomicUsize::new(0);
        let open = || -> Result<String> {
            opens.fetch_add(1, Ordering::SeqCst);
            Ok(String::from("handle"))
        };

        let a = reg.get_or_try_open(open).unwrap();
        let b = reg
            .get_or_try_open(|| -> Result<String> { panic!("must not reopen") })
            .unwrap();
        assert_eq!(a.id(), b.id());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(a.id().pid, std::process::id());
    }

    #[test]
    fn copied_registry_opens_fresh_handle_in_other_process() {
        become_process(100);
        let parent = ProcessLocal::with_identity(fake_pid);
        let parent_handle = parent.get_or_try_open(|| Ok(1u8)).unwrap();

        // The worker receives a copy that still holds the parent's entry.
        let worker = parent.clone();
        assert_eq!(worker.len(), 1);

        become_process(200);
        assert!(worker.current().is_none());
        let worker_handle = worker.get_or_try_open(|| Ok(2u8)).unwrap();

        assert_ne!(parent_handle.id(), worker_handle.id());
        assert!(!Arc::ptr_eq(&parent_handle, &worker_handle));
        assert_eq!(worker_handle.id().pid, 200);
        assert_eq!(*worker_handle.get(), 2);
        // the inherited entry was pruned
        assert_eq!(worker.len(), 1);

        // The parent's own copy is untouched.
        become_process(100);
        assert_eq!(parent.current().unwrap().id(), parent_handle.id());
    }

    #[test]
    fn two_workers_from_one_parent_get_distinct_handles() {
        become_process(1);
        let dataset_registry: ProcessLocal<u8> = ProcessLocal::with_identity(fake_pid);
        let a = dataset_registry.clone();
        let b = dataset_registry.clone();

        become_process(11);
        let ha = a.get_or_try_open(|| Ok(0)).unwrap();
        become_process(12);
        let hb = b.get_or_try_open(|| Ok(0)).unwrap();

        assert_ne!(ha.id(), hb.id());
        assert_ne!(ha.id().pid, hb.id().pid);
    }

    #[test]
    fn failed_open_stays_unopened() {
        let reg: ProcessLocal<u8> = ProcessLocal::new();
        let err = reg.get_or_try_open(|| Err(molset_core::Error::msg("boom")));
        assert!(err.is_err());
        assert!(reg.is_empty());
        assert!(reg.get_or_try_open(|| Ok(3)).is_ok());
    }

    #[test]
    fn threads_of_one_process_share_one_open() {
        let reg: Arc<ProcessLocal<usize>> = Arc::new(ProcessLocal::new());
        let opens = Arc::new(AtomicUsize::new(0));

        let ids: Vec<HandleId> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                let opens = opens.clone();
                std::thread::spawn(move || {
                    reg.get_or_try_open(|| Ok(opens.fetch_add(1, Ordering::SeqCst)))
                        .unwrap()
                        .id()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn handle_id_display() {
        let id = HandleId { pid: 42, serial: 7 };
        assert_eq!(id.to_string(), "42#7");
    }
}
