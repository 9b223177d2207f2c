use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ComponentBase, ContextMutex, MediaComponent, PipelineHandle};
use crate::error::MediaError;
use crate::media::{
    BufferPool, Frame, FrameArgs, FrameCollection, FrameUnit, Pooled, Rect, SampleArgs, Texture,
    VideoPayload,
};
use crate::session::{MediaSession, RequestPacket};
use crate::topology::{MediaStream, StreamId, StreamKind, TopologyBuilder};

const CURSOR_SIZE: u32 = 16;
const CURSOR_COLOR: u32 = 0xffff_ffff;

/// Identifies one display output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayDevice {
    pub adapter_ordinal: u32,
    pub output_ordinal: u32,
    pub width: u32,
    pub height: u32,
}

impl DisplayDevice {
    pub fn new(adapter_ordinal: u32, output_ordinal: u32, width: u32, height: u32) -> Self {
        Self {
            adapter_ordinal,
            output_ordinal,
            width,
            height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::sized(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy)]
struct PointerState {
    x: f32,
    y: f32,
    visible: bool,
}

/// Captures one display output and its mouse pointer.
///
/// Frames are synthesized: each capture paints a solid color that changes with
/// the frame counter, so consumers can tell frames apart.
pub struct DisplayCaptureSource {
    base: ComponentBase,
    device: DisplayDevice,
    broken: AtomicBool,
    pool: BufferPool<Texture>,
    cursor: Arc<Pooled<Texture>>,
    pointer: Mutex<PointerState>,
    frames_captured: AtomicU64,
    context: ContextMutex,
}

impl MediaComponent for DisplayCaptureSource {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl DisplayCaptureSource {
    pub fn new(
        session: Arc<MediaSession>,
        pipeline: PipelineHandle,
        device: DisplayDevice,
        context: ContextMutex,
    ) -> Result<Arc<Self>, MediaError> {
        if device.width == 0 || device.height == 0 {
            return Err(MediaError::DeviceLost(format!(
                "display {}:{} reports no size",
                device.adapter_ordinal, device.output_ordinal
            )));
        }

        let pool = BufferPool::new("display capture");
        let mut cursor = pool.acquire(|| Texture::new(CURSOR_SIZE, CURSOR_SIZE));
        cursor.reset(CURSOR_SIZE, CURSOR_SIZE, CURSOR_COLOR);

        info!(
            "Display capture initialized for output {}:{} ({}x{})",
            device.adapter_ordinal, device.output_ordinal, device.width, device.height
        );

        Ok(Arc::new(Self {
            base: ComponentBase::new("display capture", session, pipeline),
            device,
            broken: AtomicBool::new(false),
            pool,
            cursor: Arc::new(cursor),
            pointer: Mutex::new(PointerState {
                x: 0.0,
                y: 0.0,
                visible: true,
            }),
            frames_captured: AtomicU64::new(0),
            context,
        }))
    }

    pub fn device(&self) -> &DisplayDevice {
        &self.device
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// The output disappeared; serve empty samples and ask for a fresh instance.
    pub fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            warn!(
                "Display output {}:{} lost",
                self.device.adapter_ordinal, self.device.output_ordinal
            );
            self.base.request_reinitialization();
        }
    }

    pub fn set_pointer(&self, x: f32, y: f32, visible: bool) {
        *self.pointer.lock() = PointerState { x, y, visible };
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let source = self.clone();
        builder.add_stream(StreamKind::DisplayCapture, move |id| {
            Arc::new(DisplayCaptureStream {
                id,
                source,
                next_pos: Mutex::new(None),
            })
        })
    }

    pub fn create_pointer_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let source = self.clone();
        builder.add_stream(StreamKind::Pointer, move |id| {
            Arc::new(PointerStream { id, source })
        })
    }

    fn capture_frame(&self) -> VideoPayload {
        let counter = self.frames_captured.fetch_add(1, Ordering::Relaxed);
        let shade = (counter % 256) as u32;
        let color = 0xff00_0000 | (self.device.output_ordinal & 0xff) << 16 | shade << 8 | shade;

        let mut texture = self
            .pool
            .acquire(|| Texture::new(self.device.width, self.device.height));
        {
            let _context = self.context.lock();
            texture.reset(self.device.width, self.device.height, color);
        }
        VideoPayload::full(Arc::new(texture))
    }

    fn pointer_frame(&self) -> Option<VideoPayload> {
        let pointer = *self.pointer.lock();
        if !pointer.visible {
            return None;
        }
        Some(VideoPayload {
            texture: self.cursor.clone(),
            source_rect: Rect::sized(CURSOR_SIZE, CURSOR_SIZE),
            dest_rect: Rect::new(pointer.x, pointer.y, CURSOR_SIZE as f32, CURSOR_SIZE as f32),
        })
    }
}

fn single_frame(frame_end: FrameUnit, payload: Option<VideoPayload>) -> SampleArgs {
    let args = match payload {
        Some(payload) => FrameArgs::with_frames(
            frame_end,
            FrameCollection::from_frames([Frame::new(frame_end - 1, 1, Some(payload))]),
        ),
        None => FrameArgs::empty(frame_end),
    };
    SampleArgs::Video(args)
}

struct DisplayCaptureStream {
    id: StreamId,
    source: Arc<DisplayCaptureSource>,
    next_pos: Mutex<Option<FrameUnit>>,
}

impl MediaStream for DisplayCaptureStream {
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

        let payload = (due && !self.source.is_broken()).then(|| self.source.capture_frame());
        session.give_sample(self.id, &single_frame(frame_end, payload), rp);
        Ok(())
    }
}

struct PointerStream {
    id: StreamId,
    source: Arc<DisplayCaptureSource>,
}

impl MediaStream for PointerStream {
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError> {
        let session = self.source.session();
        let frame_end = session.frame_end(rp.request_time);
        let payload = if self.source.is_broken() {
            None
        } else {
            self.source.pointer_frame()
        };
        session.give_sample(self.id, &single_frame(frame_end, payload), rp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing;
    use crate::media::{FrameRate, MediaKind};

    #[test]
    fn test_zero_sized_display_is_rejected() {
        let rt = testing::runtime();
        let session = testing::session(&rt, MediaKind::Video, FrameRate::new(10, 1));
        let result = DisplayCaptureSource::new(
            session,
            PipelineHandle::detached(),
            DisplayDevice::new(0, 0, 0, 1080),
            Default::default(),
        );
        assert!(matches!(result, Err(MediaError::DeviceLost(_))));
    }

    #[test]
    fn test_captured_frames_differ() {
        let rt = testing::runtime();
        let session = testing::session(&rt, MediaKind::Video, FrameRate::new(10, 1));
        let source = DisplayCaptureSource::new(
            session,
            PipelineHandle::detached(),
            DisplayDevice::new(0, 1, 8, 8),
            Default::default(),
        )
        .unwrap();

        let a = source.capture_frame();
        let b = source.capture_frame();
        assert_ne!(a.texture.pixel(0, 0), b.texture.pixel(0, 0));
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn test_hidden_pointer_has_no_frame() {
        let rt = testing::runtime();
        let session = testing::session(&rt, MediaKind::Video, FrameRate::new(10, 1));
        let source = DisplayCaptureSource::new(
            session,
            PipelineHandle::detached(),
            DisplayDevice::new(0, 0, 8, 8),
            Default::default(),
        )
        .unwrap();

        source.set_pointer(2.0, 3.0, true);
        let frame = source.pointer_frame().unwrap();
        assert_eq!(frame.dest_rect.x, 2.0);
        source.set_pointer(0.0, 0.0, false);
        assert!(source.pointer_frame().is_none());
    }

    #[test]
    fn test_broken_source_marks_itself_unshareable() {
        let rt = testing::runtime();
        let session = testing::session(&rt, MediaKind::Video, FrameRate::new(10, 1));
        let source = DisplayCaptureSource::new(
            session,
            PipelineHandle::detached(),
            DisplayDevice::new(0, 0, 8, 8),
            Default::default(),
        )
        .unwrap();

        source.mark_broken();
        assert!(source.is_broken());
        assert_eq!(source.instance_type(), crate::components::InstanceType::NotShareable);
    }
}
