use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ComponentBase, ContextMutex, MediaComponent, PipelineHandle, VideoMixerParams};
use crate::error::MediaError;
use crate::media::{
    BufferPool, Frame, FrameArgs, FrameCollection, FrameUnit, Rect, SampleArgs, Texture,
    VideoPayload,
};
use crate::session::{MediaSession, RequestPacket};
use crate::topology::{MediaStream, StreamId, StreamKind, TopologyBuilder};

/// Where a freshly added webcam lands on the canvas.
const DEFAULT_OFFSET: f32 = 100.0;

/// Identifies one video capture device such as a webcam.
///
/// Two entries name the same device when their symbolic links match,
/// ignoring case; the friendly name is only for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VidcapDevice {
    pub friendly_name: String,
    pub symbolic_link: String,
    pub width: u32,
    pub height: u32,
}

impl VidcapDevice {
    pub fn new(
        friendly_name: impl Into<String>,
        symbolic_link: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            friendly_name: friendly_name.into(),
            symbolic_link: symbolic_link.into(),
            width,
            height,
        }
    }

    pub fn same_link(&self, other: &Self) -> bool {
        self.symbolic_link.eq_ignore_ascii_case(&other.symbolic_link)
    }

    /// Native size, offset from the canvas origin.
    pub fn default_placement(&self) -> VideoMixerParams {
        let source = Rect::sized(self.width, self.height);
        let dest = Rect::new(
            DEFAULT_OFFSET,
            DEFAULT_OFFSET,
            self.width as f32,
            self.height as f32,
        );
        VideoMixerParams::placed(source, dest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VidcapState {
    Initialized,
    /// The device is unplugged; the component stays alive but adds no stream
    WaitingForDevice,
}

/// Captures frames from one video capture device.
///
/// An unplugged device does not make the component unusable: it waits for
/// the device to come back and asks for a new activation on each change, so
/// the topology drops and regains its stream.
pub struct VidcapCaptureSource {
    base: ComponentBase,
    device: VidcapDevice,
    waiting: AtomicBool,
    pool: BufferPool<Texture>,
    frames_captured: AtomicU64,
    context: ContextMutex,
}

impl MediaComponent for VidcapCaptureSource {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl VidcapCaptureSource {
    pub fn new(
        session: Arc<MediaSession>,
        pipeline: PipelineHandle,
        device: VidcapDevice,
        context: ContextMutex,
    ) -> Result<Arc<Self>, MediaError> {
        if device.symbolic_link.is_empty() {
            return Err(MediaError::DeviceLost(format!(
                "video capture device '{}' has no symbolic link",
                device.friendly_name
            )));
        }
        if device.width == 0 || device.height == 0 {
            return Err(MediaError::DeviceLost(format!(
                "video capture device '{}' reports no frame size",
                device.friendly_name
            )));
        }

        info!(
            "Video capture initialized for '{}' ({}x{})",
            device.friendly_name, device.width, device.height
        );

        Ok(Arc::new(Self {
            base: ComponentBase::new("video capture", session, pipeline),
            device,
            waiting: AtomicBool::new(false),
            pool: BufferPool::new("video capture"),
            frames_captured: AtomicU64::new(0),
            context,
        }))
    }

    pub fn device(&self) -> &VidcapDevice {
        &self.device
    }

    pub fn size(&self) -> (u32, u32) {
        (self.device.width, self.device.height)
    }

    pub fn state(&self) -> VidcapState {
        if self.waiting.load(Ordering::Acquire) {
            VidcapState::WaitingForDevice
        } else {
            VidcapState::Initialized
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == VidcapState::Initialized
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn device_removed(&self) {
        if !self.waiting.swap(true, Ordering::AcqRel) {
            warn!("Video capture device '{}' removed", self.device.friendly_name);
            self.base.request_activation();
        }
    }

    pub fn device_arrived(&self) {
        if self.waiting.swap(false, Ordering::AcqRel) {
            info!("Video capture device '{}' is back", self.device.friendly_name);
            self.base.request_activation();
        }
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let source = self.clone();
        builder.add_stream(StreamKind::VidcapCapture, move |id| {
            Arc::new(VidcapStream {
                id,
                source,
                next_pos: Mutex::new(None),
            })
        })
    }

    fn capture_frame(&self) -> VideoPayload {
        let counter = self.frames_captured.fetch_add(1, Ordering::Relaxed);
        let shade = (counter % 256) as u32;
        let color = 0xff00_0000 | shade << 16 | 0x80 << 8 | (255 - shade);

        let mut texture = self
            .pool
            .acquire(|| Texture::new(self.device.width, self.device.height));
        {
            let _context = self.context.lock();
            texture.reset(self.device.width, self.device.height, color);
        }
        VideoPayload::full(Arc::new(texture))
    }
}

struct VidcapStream {
    id: StreamId,
    source: Arc<VidcapCaptureSource>,
    next_pos: Mutex<Option<FrameUnit>>,
}

impl MediaStream for VidcapStream {
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError> {
        let session = self.source.session();
        let frame_end = session.frame_end(rp.request_time);

        let due = {
            let mut next_pos = self.next_pos.lock();
            let due = next_pos.map_or(true, |next| frame_end > next);
            if due {
                *next_pos = Some(frame_end);
            }
            due
        };

        let args = if due && self.source.is_initialized() {
            let frame = Frame::new(frame_end - 1, 1, Some(self.source.capture_frame()));
            FrameArgs::with_frames(frame_end, FrameCollection::from_frames([frame]))
        } else {
            FrameArgs::empty(frame_end)
        };
        session.give_sample(self.id, &SampleArgs::Video(args), rp);
        Ok(())
    }
}
