//! Frame presentation handoff.
//!
//! The presenter turns each relay frame into a presentable resource and
//! keeps the previously shown one alive until the display confirms the new
//! one is installed. That avoids a blank frame between images while never
//! holding more than two frames:
//!
//! - `displayed`: the last frame the display acknowledged (or, before the
//!   first acknowledgement, the frame it is still loading)
//! - `pending`: the newest frame, not yet acknowledged
//!
//! A frame that is superseded while pending is released straight away.

use crate::resource::{OwnedResource, ResourceBackend, ResourceId, ResourceKind};
use relay_protocol::frame::RelayFrame;
use std::sync::Arc;
use tracing::{debug, trace};

struct PresentedFrame {
    sequence: u64,
    resource: OwnedResource,
}

/// Presents relay frames one at a time.
pub struct FramePresenter {
    backend: Arc<dyn ResourceBackend>,
    displayed: Option<PresentedFrame>,
    pending: Option<PresentedFrame>,
    dropped_frames: u64,
}

impl FramePresenter {
    /// Create a presenter with nothing shown.
    #[must_use]
    pub fn new(backend: Arc<dyn ResourceBackend>) -> Self {
        Self {
            backend,
            displayed: None,
            pending: None,
            dropped_frames: 0,
        }
    }

    /// Wrap a frame into a resource and make it the frame to show next.
    pub fn on_frame(&mut self, frame: &RelayFrame) -> ResourceId {
        let resource = OwnedResource::allocate(
            &self.backend,
            ResourceKind::Frame,
            frame.format().mime_type(),
            &frame.payload,
        );
        let id = resource.id();
        let next = PresentedFrame {
            sequence: frame.sequence,
            resource,
        };

        if self.displayed.is_none() {
            // Nothing acknowledged yet: keep the frame being loaded visible.
            self.displayed = self.pending.replace(next);
        } else if let Some(superseded) = self.pending.replace(next) {
            self.dropped_frames += 1;
            trace!(
                target: "client.presenter",
                sequence = superseded.sequence,
                resource_id = %superseded.resource.id(),
                "Pending frame superseded before install"
            );
        }

        id
    }

    /// Acknowledge that a frame is on screen, releasing the one it replaced.
    ///
    /// Returns `false` (and changes nothing) if `id` is not the pending frame.
    pub fn installed(&mut self, id: ResourceId) -> bool {
        if self.pending.as_ref().map(|f| f.resource.id()) != Some(id) {
            debug!(target: "client.presenter", resource_id = %id, "Stale install acknowledgement");
            return false;
        }

        // Dropping the previous displayed frame releases it.
        self.displayed = self.pending.take();
        true
    }

    /// The newest frame: pending if any, else displayed.
    #[must_use]
    pub fn current(&self) -> Option<ResourceId> {
        self.pending
            .as_ref()
            .or(self.displayed.as_ref())
            .map(|f| f.resource.id())
    }

    /// The frame currently shown
    #[must_use]
    pub fn displayed(&self) -> Option<ResourceId> {
        self.displayed.as_ref().map(|f| f.resource.id())
    }

    /// Number of frame resources held (0 to 2)
    #[must_use]
    pub fn live_handles(&self) -> usize {
        usize::from(self.displayed.is_some()) + usize::from(self.pending.is_some())
    }

    /// Frames released without ever being acknowledged
    #[must_use]
    pub const fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Release every held frame. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        let released = self.live_handles();
        self.pending = None;
        self.displayed = None;
        if released > 0 {
            debug!(target: "client.presenter", released, "Presenter torn down");
        }
    }
}

impl Drop for FramePresenter {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::InMemoryResources;
    use bytes::Bytes;

    fn presenter() -> (FramePresenter, Arc<InMemoryResources>) {
        let resources = InMemoryResources::shared();
        let backend: Arc<dyn ResourceBackend> = resources.clone();
        (FramePresenter::new(backend), resources)
    }

    fn frame(sequence: u64) -> RelayFrame {
        RelayFrame::new(sequence, Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0]))
    }

    #[test]
    fn test_previous_frame_released_only_after_install() {
        let (mut presenter, resources) = presenter();

        let a = presenter.on_frame(&frame(0));
        let b = presenter.on_frame(&frame(1));

        // Both valid until B is acknowledged
        assert!(resources.contains(a));
        assert!(resources.contains(b));
        assert_eq!(presenter.current(), Some(b));

        assert!(presenter.installed(b));
        assert!(!resources.contains(a));
        assert!(resources.contains(b));
        assert_eq!(presenter.displayed(), Some(b));
        assert_eq!(resources.released_count(), 1);
    }

    #[test]
    fn test_installed_frame_survives_until_next_install() {
        let (mut presenter, resources) = presenter();

        let a = presenter.on_frame(&frame(0));
        assert!(presenter.installed(a));
        let b = presenter.on_frame(&frame(1));

        assert!(resources.contains(a));
        assert!(presenter.installed(b));
        assert!(!resources.contains(a));
    }

    #[test]
    fn test_unacknowledged_frame_released_when_superseded() {
        let (mut presenter, resources) = presenter();

        let a = presenter.on_frame(&frame(0));
        presenter.installed(a);

        let b = presenter.on_frame(&frame(1));
        let c = presenter.on_frame(&frame(2));

        assert!(resources.contains(a));
        assert!(!resources.contains(b));
        assert!(resources.contains(c));
        assert_eq!(presenter.live_handles(), 2);
        assert_eq!(presenter.dropped_frames(), 1);

        // Late ack for the dropped frame is ignored
        assert!(!presenter.installed(b));
        assert_eq!(presenter.displayed(), Some(a));
    }

    #[test]
    fn test_never_more_than_two_handles() {
        let (mut presenter, resources) = presenter();
        for sequence in 0..20 {
            let id = presenter.on_frame(&frame(sequence));
            assert!(resources.live_count() <= 2);
            if sequence % 3 == 0 {
                presenter.installed(id);
            }
        }
        assert_eq!(resources.live_count(), presenter.live_handles());
    }

    #[test]
    fn test_teardown_releases_each_handle_once() {
        let (mut presenter, resources) = presenter();
        let a = presenter.on_frame(&frame(0));
        presenter.installed(a);
        presenter.on_frame(&frame(1));

        presenter.teardown();
        presenter.teardown();
        drop(presenter);

        assert_eq!(resources.live_count(), 0);
        assert_eq!(resources.allocated_count(), resources.released_count());
        assert_eq!(resources.rejected_release_count(), 0);
    }

    #[test]
    fn test_png_frames_keep_their_mime_type() {
        let (mut presenter, resources) = presenter();
        let png = RelayFrame::new(
            0,
            Bytes::from_static(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
        );
        let id = presenter.on_frame(&png);
        assert_eq!(
            resources.get(id).map(|r| r.mime_type),
            Some("image/png".to_string())
        );
    }
}
