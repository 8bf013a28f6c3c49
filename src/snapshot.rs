//! The published device-list snapshot and shared system values
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arrayvec::ArrayVec;

use crate::device::{DeviceInfo, NodeInfo};
use crate::{NodeId, MAX_IODEVS, MAX_IONODES};

/// Snapshot of the device and node lists, published to clients.
///
/// The info arrays are capped; the `num_*` counts carry the true list sizes
/// even when they exceed the caps.
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    pub num_output_devs: usize,
    pub num_input_devs: usize,
    pub output_devs: ArrayVec<DeviceInfo, MAX_IODEVS>,
    pub input_devs: ArrayVec<DeviceInfo, MAX_IODEVS>,
    pub output_nodes: ArrayVec<NodeInfo, MAX_IONODES>,
    pub input_nodes: ArrayVec<NodeInfo, MAX_IONODES>,
    pub selected_output: NodeId,
    pub selected_input: NodeId,
}

struct StateInner {
    state: Mutex<ServerState>,
    suspended: AtomicBool,
    volume: AtomicU32,
    mute: AtomicBool,
    capture_gain: AtomicI32,
    capture_mute: AtomicBool,
}

/// Process-wide state area shared between the control thread and snapshot
/// readers. Cheap to clone, all clones view the same state.
///
/// The snapshot itself is written through the two-phase
/// [`SharedState::update_begin`] handshake: mutate through the returned
/// guard, dropping it completes the update.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<StateInner>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                state: Mutex::new(ServerState::default()),
                suspended: AtomicBool::new(false),
                volume: AtomicU32::new(100),
                mute: AtomicBool::new(false),
                capture_gain: AtomicI32::new(0),
                capture_mute: AtomicBool::new(false),
            }),
        }
    }

    /// Begin a snapshot update. Returns `None` when the state area is
    /// unusable (a writer panicked); updates are then silently skipped.
    pub fn update_begin(&self) -> Option<StateUpdate<'_>> {
        self.inner.state.lock().ok().map(StateUpdate)
    }

    /// Copy of the current snapshot.
    pub fn read(&self) -> ServerState {
        self.inner
            .state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::SeqCst)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.inner.suspended.store(suspended, Ordering::SeqCst);
    }

    /// Master playback volume in percent.
    pub fn volume(&self) -> u32 {
        self.inner.volume.load(Ordering::SeqCst)
    }

    pub fn set_volume(&self, volume: u32) {
        self.inner.volume.store(volume.min(100), Ordering::SeqCst);
    }

    pub fn mute(&self) -> bool {
        self.inner.mute.load(Ordering::SeqCst)
    }

    pub fn set_mute(&self, mute: bool) {
        self.inner.mute.store(mute, Ordering::SeqCst);
    }

    /// Master capture gain in 0.01 dB steps.
    pub fn capture_gain(&self) -> i32 {
        self.inner.capture_gain.load(Ordering::SeqCst)
    }

    pub fn set_capture_gain(&self, gain: i32) {
        self.inner.capture_gain.store(gain, Ordering::SeqCst);
    }

    pub fn capture_mute(&self) -> bool {
        self.inner.capture_mute.load(Ordering::SeqCst)
    }

    pub fn set_capture_mute(&self, mute: bool) {
        self.inner.capture_mute.store(mute, Ordering::SeqCst);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// In-progress snapshot update; dropping it completes the update.
pub struct StateUpdate<'a>(MutexGuard<'a, ServerState>);

impl Deref for StateUpdate<'_> {
    type Target = ServerState;

    fn deref(&self) -> &ServerState {
        &self.0
    }
}

impl DerefMut for StateUpdate<'_> {
    fn deref_mut(&mut self) -> &mut ServerState {
        &mut self.0
    }
}
