//! The five-angle capture slot store.
//!
//! Each slot holds at most one accepted file together with the preview
//! resource created for it. The store is the only owner of those previews:
//! overwriting, removing or tearing down a slot drops the [`OwnedResource`]
//! and with it releases the preview.
//!
//! Observers get two feeds:
//! - [`CaptureSlotStore::subscribe`]: a watch of the latest
//!   [`CaptureSnapshot`], updated after every mutation (including rejected
//!   selections, which set a slot error)
//! - [`CaptureSlotStore::changes`]: a broadcast of successful fills and
//!   clears only

use super::validation::{FileDescriptor, ValidationError, ValidationPolicy};
use crate::resource::{OwnedResource, ResourceBackend, ResourceId, ResourceKind};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Buffer for slot change notifications.
const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// One of the fixed capture positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotName {
    Front,
    Left,
    Right,
    AngledLeft,
    AngledRight,
}

impl SlotName {
    /// All slots in display order.
    pub const ALL: [Self; 5] = [
        Self::Front,
        Self::Left,
        Self::Right,
        Self::AngledLeft,
        Self::AngledRight,
    ];

    /// Wire/form name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Left => "left",
            Self::Right => "right",
            Self::AngledLeft => "angled_left",
            Self::AngledRight => "angled_right",
        }
    }

    /// Display label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Front => "Front Face",
            Self::Left => "Left Profile",
            Self::Right => "Right Profile",
            Self::AngledLeft => "Angled Left",
            Self::AngledRight => "Angled Right",
        }
    }

    /// Capture guidance shown under the label
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Front => "Straight frontal view, face clearly visible",
            Self::Left => "Left side profile, ear to chin visible",
            Self::Right => "Right side profile, ear to chin visible",
            Self::AngledLeft => "45° angle from left side",
            Self::AngledRight => "45° angle from right side",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slot name outside the fixed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown capture slot: {0}")]
pub struct UnknownSlot(pub String);

impl FromStr for SlotName {
    type Err = UnknownSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| UnknownSlot(s.to_string()))
    }
}

/// Read-only view of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotView {
    pub name: SlotName,
    pub file: Option<FileDescriptor>,
    pub preview: Option<ResourceId>,
    pub error: Option<ValidationError>,
}

impl SlotView {
    fn empty(name: SlotName) -> Self {
        Self {
            name,
            file: None,
            preview: None,
            error: None,
        }
    }

    /// Whether the slot holds an accepted file
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.file.is_some()
    }
}

/// All slots at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSnapshot {
    slots: Vec<SlotView>,
}

impl CaptureSnapshot {
    fn empty() -> Self {
        Self {
            slots: SlotName::ALL.into_iter().map(SlotView::empty).collect(),
        }
    }

    /// Slots in display order
    #[must_use]
    pub fn slots(&self) -> &[SlotView] {
        &self.slots
    }

    /// View of one slot
    #[must_use]
    pub fn slot(&self, name: SlotName) -> Option<&SlotView> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Every slot has a file.
    #[must_use]
    pub fn all_slots_filled(&self) -> bool {
        self.slots.iter().all(SlotView::is_filled)
    }

    /// Some slot has a validation error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.slots.iter().any(|s| s.error.is_some())
    }
}

/// What happened to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChangeKind {
    /// A file was accepted; carries the new preview
    Filled(ResourceId),
    /// The slot was emptied
    Cleared,
}

/// Notification of a successful fill or clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotChange {
    pub slot: SlotName,
    pub kind: SlotChangeKind,
    /// State of every slot after the change
    pub snapshot: CaptureSnapshot,
}

#[derive(Default)]
struct Slot {
    file: Option<FileDescriptor>,
    preview: Option<OwnedResource>,
    error: Option<ValidationError>,
}

/// Owner of the capture slots and their previews.
pub struct CaptureSlotStore {
    policy: ValidationPolicy,
    backend: Arc<dyn ResourceBackend>,
    slots: BTreeMap<SlotName, Slot>,
    snapshot_tx: watch::Sender<CaptureSnapshot>,
    change_tx: broadcast::Sender<SlotChange>,
}

impl CaptureSlotStore {
    /// Create a store with all slots empty.
    #[must_use]
    pub fn new(policy: ValidationPolicy, backend: Arc<dyn ResourceBackend>) -> Self {
        let (snapshot_tx, _) = watch::channel(CaptureSnapshot::empty());
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Self {
            policy,
            backend,
            slots: SlotName::ALL
                .into_iter()
                .map(|name| (name, Slot::default()))
                .collect(),
            snapshot_tx,
            change_tx,
        }
    }

    /// Offer a file for a slot.
    ///
    /// On success the file replaces any previous one, a new preview is
    /// allocated and the superseded preview is released. On rejection only
    /// the slot's error is set; an existing file and preview stay in place
    /// and change listeners are not notified.
    ///
    /// # Errors
    ///
    /// Returns the `ValidationError` when the policy rejects the file.
    pub fn select_file(
        &mut self,
        slot: SlotName,
        file: FileDescriptor,
    ) -> Result<ResourceId, ValidationError> {
        let entry = self.slots.entry(slot).or_default();

        if let Err(e) = self.policy.validate(&file) {
            debug!(
                target: "capture.slots",
                slot = %slot,
                file_name = %file.name,
                error = %e,
                "File rejected"
            );
            entry.error = Some(e.clone());
            self.publish_snapshot();
            return Err(e);
        }

        let preview = OwnedResource::allocate(
            &self.backend,
            ResourceKind::Preview,
            &file.mime_type,
            &file.data,
        );
        let preview_id = preview.id();

        debug!(
            target: "capture.slots",
            slot = %slot,
            file_name = %file.name,
            size = file.size,
            preview_id = %preview_id,
            "File accepted"
        );

        // Replacing the owner drops (and releases) the superseded preview.
        entry.preview = Some(preview);
        entry.file = Some(file);
        entry.error = None;

        let snapshot = self.publish_snapshot();
        self.notify(slot, SlotChangeKind::Filled(preview_id), snapshot);

        Ok(preview_id)
    }

    /// Empty a slot, releasing its preview if any.
    pub fn remove_slot(&mut self, slot: SlotName) {
        let entry = self.slots.entry(slot).or_default();
        let had_preview = entry.preview.take().is_some();
        entry.file = None;
        entry.error = None;

        debug!(target: "capture.slots", slot = %slot, had_preview, "Slot cleared");

        let snapshot = self.publish_snapshot();
        self.notify(slot, SlotChangeKind::Cleared, snapshot);
    }

    /// Release every preview and empty all slots. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        let mut released = 0usize;
        for entry in self.slots.values_mut() {
            if entry.preview.take().is_some() {
                released += 1;
            }
            entry.file = None;
            entry.error = None;
        }

        if released > 0 {
            info!(target: "capture.slots", released, "Capture slots torn down");
            self.publish_snapshot();
        }
    }

    /// Current state of all slots
    #[must_use]
    pub fn current_snapshot(&self) -> CaptureSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Watch snapshots; the receiver starts at the current one.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CaptureSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Listen for successful fills and clears.
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<SlotChange> {
        self.change_tx.subscribe()
    }

    /// All five files, in slot order, once every slot is filled.
    #[must_use]
    pub fn ready_files(&self) -> Option<Vec<(SlotName, FileDescriptor)>> {
        self.slots
            .iter()
            .map(|(name, slot)| slot.file.clone().map(|file| (*name, file)))
            .collect()
    }

    fn build_snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            slots: self
                .slots
                .iter()
                .map(|(name, slot)| SlotView {
                    name: *name,
                    file: slot.file.clone(),
                    preview: slot.preview.as_ref().map(OwnedResource::id),
                    error: slot.error.clone(),
                })
                .collect(),
        }
    }

    fn publish_snapshot(&self) -> CaptureSnapshot {
        let snapshot = self.build_snapshot();
        self.snapshot_tx.send_replace(snapshot.clone());
        snapshot
    }

    fn notify(&self, slot: SlotName, kind: SlotChangeKind, snapshot: CaptureSnapshot) {
        // No listeners is fine.
        let _ = self.change_tx.send(SlotChange {
            slot,
            kind,
            snapshot,
        });
    }
}

impl fmt::Debug for CaptureSlotStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSlotStore")
            .field("policy", &self.policy)
            .field("snapshot", &*self.snapshot_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for CaptureSlotStore {
    fn drop(&mut self) {
        self.teardown();
    }
}
