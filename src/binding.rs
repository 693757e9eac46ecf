//! Bookkeeping for capture targets redirected by an interception layer.
//!
//! The host reports every capture target it sees. The first sighting
//! creates a synthetic destination for the camera to write into; a second
//! sighting of the same target marks it configured. Once the host starts a
//! repeating capture, every configured target gets a [`Playback`] rendering
//! the replacement video into it.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use crate::config::ReplayConfig;
use crate::decoder::{MediaBackend, RenderTarget};
use crate::error::Error;
use crate::playback::{Playback, PlaybackOptions};

/// Stable identifier issued on a target's first sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Preview texture; receives `video_path`.
    Texture,
    /// Still/analysis reader; receives `rotated_video_path`.
    ImageReader,
    /// Anything else is left untouched.
    Other,
}

/// The interception layer's side of a binding.
pub trait CaptureHost: Send + Sync {
    /// The host's handle for an original capture target.
    type Target: Clone + Eq + Hash + Send;
    /// A destination handed to the camera in place of the original target.
    type Synthetic: Clone + Send;

    fn create_synthetic(&self, target: &Self::Target) -> Result<Self::Synthetic, Error>;

    fn target_kind(&self, target: &Self::Target) -> TargetKind;

    /// Whether the original target can still be rendered into.
    fn is_valid(&self, target: &Self::Target) -> bool;

    /// A render target drawing into the original target.
    fn render_target(&self, target: &Self::Target) -> Option<Box<dyn RenderTarget>>;

    fn release_synthetic(&self, synthetic: Self::Synthetic) {
        drop(synthetic);
    }
}

/// Result of [`TargetTable::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation<S> {
    pub id: TargetId,
    /// Hand this to the camera instead of the original target.
    pub synthetic: S,
    pub configured: bool,
}

struct Binding<H: CaptureHost> {
    target: H::Target,
    synthetic: H::Synthetic,
    kind: TargetKind,
    configured: bool,
    playback: Option<Playback>,
}

struct Bindings<H: CaptureHost> {
    by_id: HashMap<TargetId, Binding<H>>,
    by_target: HashMap<H::Target, TargetId>,
    next_id: u64,
}

impl<H: CaptureHost> Default for Bindings<H> {
    fn default() -> Self {
        Bindings {
            by_id: HashMap::new(),
            by_target: HashMap::new(),
            next_id: 1,
        }
    }
}

/// The binding table for one capture device.
pub struct TargetTable<H: CaptureHost> {
    host: H,
    bindings: Mutex<Bindings<H>>,
}

impl<H: CaptureHost> TargetTable<H> {
    pub fn new(host: H) -> Self {
        TargetTable {
            host,
            bindings: Mutex::new(Bindings::default()),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Record a sighting of `target`.
    ///
    /// An unseen target gets a new synthetic destination. A target seen
    /// before reuses its destination and becomes configured.
    pub fn observe(&self, target: &H::Target) -> Result<Observation<H::Synthetic>, Error> {
        if let Some(seen) = self.reobserve(target) {
            return Ok(seen);
        }

        // Host callbacks run unlocked; they may call back into the table.
        let synthetic = self.host.create_synthetic(target)?;
        let kind = self.host.target_kind(target);

        let mut bindings = self.bindings.lock();
        if bindings.by_target.contains_key(target) {
            // Raced with another sighting of the same target.
            drop(bindings);
            self.host.release_synthetic(synthetic);
            return self
                .reobserve(target)
                .ok_or_else(|| Error::InvalidArgument("target released while observing".into()));
        }
        let id = TargetId(bindings.next_id);
        bindings.next_id += 1;
        bindings.by_target.insert(target.clone(), id);
        bindings.by_id.insert(
            id,
            Binding {
                target: target.clone(),
                synthetic: synthetic.clone(),
                kind,
                configured: false,
                playback: None,
            },
        );
        drop(bindings);
        log::info!("bound {kind:?} target as {}", id.0);
        Ok(Observation {
            id,
            synthetic,
            configured: false,
        })
    }

    fn reobserve(&self, target: &H::Target) -> Option<Observation<H::Synthetic>> {
        let mut bindings = self.bindings.lock();
        let id = *bindings.by_target.get(target)?;
        let binding = bindings.by_id.get_mut(&id)?;
        binding.configured = true;
        Some(Observation {
            id,
            synthetic: binding.synthetic.clone(),
            configured: true,
        })
    }

    /// Returns `false` for an unknown id.
    pub fn mark_configured(&self, id: TargetId) -> bool {
        match self.bindings.lock().by_id.get_mut(&id) {
            Some(binding) => {
                binding.configured = true;
                true
            }
            None => false,
        }
    }

    pub fn id_of(&self, target: &H::Target) -> Option<TargetId> {
        self.bindings.lock().by_target.get(target).copied()
    }

    pub fn is_configured(&self, id: TargetId) -> bool {
        self.bindings
            .lock()
            .by_id
            .get(&id)
            .is_some_and(|b| b.configured)
    }

    pub fn is_playing(&self, id: TargetId) -> bool {
        self.bindings
            .lock()
            .by_id
            .get(&id)
            .is_some_and(|b| b.playback.as_ref().is_some_and(|p| !p.is_finished()))
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.lock().by_id.is_empty()
    }

    /// Start playback into every configured, still-valid target that has
    /// none yet. Texture targets play `video_path`; image readers play
    /// `rotated_video_path` when it exists.
    ///
    /// Returns how many playbacks were started. If any failed to open, the
    /// others keep running and the first error is returned.
    pub fn start_playback<B: MediaBackend>(&self, backend: &B, config: &ReplayConfig) -> Result<usize, Error> {
        let options = PlaybackOptions::from(config);
        let mut started = 0;
        let mut first_error = None;

        let mut pending: Vec<(TargetId, H::Target, TargetKind)> = {
            let bindings = self.bindings.lock();
            bindings
                .by_id
                .iter()
                .filter(|(_, b)| b.configured && b.playback.is_none())
                .map(|(&id, b)| (id, b.target.clone(), b.kind))
                .collect()
        };
        pending.sort_unstable_by_key(|(id, _, _)| *id);

        // Opening files, spawning threads and host callbacks all happen
        // without the table lock held.
        let mut spawned = Vec::new();
        for (id, target, kind) in pending {
            let path = match kind {
                TargetKind::Texture => &config.video_path,
                TargetKind::ImageReader => {
                    if !config.rotated_video_path.exists() {
                        log::warn!(
                            "{} not found, target {} left alone",
                            config.rotated_video_path.display(),
                            id.0
                        );
                        continue;
                    }
                    &config.rotated_video_path
                }
                TargetKind::Other => continue,
            };
            if !self.host.is_valid(&target) {
                continue;
            }
            let Some(render_target) = self.host.render_target(&target) else {
                continue;
            };
            match Playback::spawn(backend, path, render_target, options) {
                Ok(playback) => spawned.push((id, playback)),
                Err(e) => {
                    log::error!("playback into target {} failed: {e}", id.0);
                    first_error.get_or_insert(e);
                }
            }
        }

        let mut surplus = Vec::new();
        {
            let mut bindings = self.bindings.lock();
            for (id, playback) in spawned {
                match bindings.by_id.get_mut(&id) {
                    Some(binding) if binding.playback.is_none() => {
                        binding.playback = Some(playback);
                        started += 1;
                    }
                    // Closed or started elsewhere in the meantime.
                    _ => surplus.push(playback),
                }
            }
        }
        drop(surplus);

        match first_error {
            Some(e) => Err(e),
            None => Ok(started),
        }
    }

    /// Stop every playback, release every synthetic destination and forget
    /// all targets. Ids start over afterwards.
    pub fn close(&self) {
        let bindings = std::mem::take(&mut *self.bindings.lock());
        let count = bindings.by_id.len();
        for (_, binding) in bindings.by_id {
            drop(binding.playback);
            self.host.release_synthetic(binding.synthetic);
        }
        if count > 0 {
            log::info!("released {count} capture targets");
        }
    }
}

impl<H: CaptureHost> Drop for TargetTable<H> {
    fn drop(&mut self) {
        self.close();
    }
}
