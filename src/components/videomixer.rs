use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::mixer::{MixInput, MixKernel, MixerStream};
use super::{ComponentBase, ContextMutex, MediaComponent, PipelineHandle};
use crate::media::{
    BufferPool, Frame, FrameArgs, FrameCollection, FrameUnit, Rect, SampleArgs, Texture,
    VideoPayload,
};
use crate::session::MediaSession;
use crate::topology::{EdgeParams, StreamId, StreamKind, TopologyBuilder};

const CANVAS_BACKGROUND: u32 = 0xff00_0000;

/// Placement of one mixer input on the canvas.
///
/// An empty `source_rect` places the input at its native coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMixerParams {
    /// Region of the source's coordinate space to show
    pub source_rect: Rect,
    /// Where that region lands on the canvas
    pub dest_rect: Rect,
}

impl VideoMixerParams {
    pub fn placed(source_rect: Rect, dest_rect: Rect) -> Self {
        Self {
            source_rect,
            dest_rect,
        }
    }
}

/// Composites every video input onto one canvas, in input order.
pub struct VideoMixer {
    base: ComponentBase,
    width: u32,
    height: u32,
    pool: BufferPool<Texture>,
    context: ContextMutex,
    dropped_frames: AtomicU64,
}

impl MediaComponent for VideoMixer {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl VideoMixer {
    pub fn new(
        session: Arc<MediaSession>,
        pipeline: PipelineHandle,
        width: u32,
        height: u32,
        context: ContextMutex,
    ) -> Arc<Self> {
        Arc::new(Self {
            base: ComponentBase::new("video mixer", session, pipeline),
            width,
            height,
            pool: BufferPool::new("canvas"),
            context,
            dropped_frames: AtomicU64::new(0),
        })
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Positions skipped because more than one new frame was due in a single take.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let kernel = self.clone();
        builder.add_stream(StreamKind::VideoMixer, move |id| {
            Arc::new(MixerStream::new(id, kernel))
        })
    }

    fn canvas_rect(payload: &VideoPayload, params: &VideoMixerParams) -> Rect {
        if params.source_rect.is_empty() {
            payload.dest_rect
        } else {
            Rect::map(&payload.dest_rect, &params.source_rect, &params.dest_rect)
        }
    }
}

impl MixKernel for VideoMixer {
    type Payload = VideoPayload;
    type Params = VideoMixerParams;

    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn session(&self) -> &Arc<MediaSession> {
        self.base.session()
    }

    fn maximum_buffer_size(&self) -> FrameUnit {
        // One second of video
        let rate = self.base.session().frame_rate();
        (rate.num / rate.den).max(1)
    }

    fn extract(sample: &SampleArgs) -> Option<&FrameArgs<VideoPayload>> {
        sample.as_video()
    }

    fn wrap(args: FrameArgs<VideoPayload>) -> SampleArgs {
        SampleArgs::Video(args)
    }

    fn params(edge: &EdgeParams) -> VideoMixerParams {
        match edge {
            EdgeParams::Video(cell) => cell.get(),
            _ => VideoMixerParams::default(),
        }
    }

    fn mix(
        &self,
        inputs: &[MixInput<VideoPayload, VideoMixerParams>],
        first: FrameUnit,
        end: FrameUnit,
    ) -> FrameArgs<VideoPayload> {
        if inputs.iter().all(|input| !input.frames.is_valid()) {
            return FrameArgs::empty(end);
        }

        // Only the newest position is rendered per take.
        let skipped = (end - 1 - first).max(0) as u64;
        if skipped > 0 {
            self.dropped_frames.fetch_add(skipped, Ordering::Relaxed);
        }

        let mut canvas = self.pool.acquire(|| Texture::new(self.width, self.height));
        canvas.reset(self.width, self.height, CANVAS_BACKGROUND);
        {
            let _context = self.context.lock();
            for input in inputs {
                let newest = input
                    .frames
                    .frames()
                    .iter()
                    .filter_map(|f| f.buffer.as_ref().map(|b| (f.pos, b)))
                    .max_by_key(|(pos, _)| *pos);
                if let Some((_, payload)) = newest {
                    let dest = Self::canvas_rect(payload, &input.params);
                    canvas.blit(&payload.texture, &payload.source_rect, &dest);
                }
            }
        }

        let frame = Frame::new(end - 1, 1, Some(VideoPayload::full(Arc::new(canvas))));
        FrameArgs::with_frames(end, FrameCollection::from_frames([frame]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing;
    use crate::media::{FrameRate, MediaKind};

    fn solid(pool: &BufferPool<Texture>, w: u32, h: u32, color: u32) -> VideoPayload {
        let mut texture = pool.acquire(|| Texture::new(w, h));
        texture.reset(w, h, color);
        VideoPayload::full(Arc::new(texture))
    }

    fn input(frames: Vec<Frame<VideoPayload>>, params: VideoMixerParams) -> MixInput<VideoPayload, VideoMixerParams> {
        MixInput {
            frames: FrameCollection::from_frames(frames),
            params,
        }
    }

    #[test]
    fn test_later_inputs_draw_on_top() {
        let rt = testing::runtime();
        let session = testing::session(&rt, MediaKind::Video, FrameRate::new(10, 1));
        let mixer = VideoMixer::new(session, PipelineHandle::detached(), 4, 4, Default::default());
        let pool = BufferPool::new("test");

        let background = solid(&pool, 4, 4, 1);
        let overlay = solid(&pool, 2, 2, 2);
        let out = mixer.mix(
            &[
                input(vec![Frame::new(4, 1, Some(background))], VideoMixerParams::default()),
                input(vec![Frame::new(4, 1, Some(overlay))], VideoMixerParams::default()),
            ],
            4,
            5,
        );

        let sample = out.sample.expect("mixed frame");
        let frame = &sample.frames()[0];
        assert_eq!((frame.pos, frame.dur), (4, 1));
        let canvas = &frame.buffer.as_ref().unwrap().texture;
        assert_eq!(canvas.pixel(0, 0), Some(2));
        assert_eq!(canvas.pixel(3, 3), Some(1));
    }

    #[test]
    fn test_params_scale_input() {
        let rt = testing::runtime();
        let session = testing::session(&rt, MediaKind::Video, FrameRate::new(10, 1));
        let mixer = VideoMixer::new(session, PipelineHandle::detached(), 4, 4, Default::default());
        let pool = BufferPool::new("test");

        let params = VideoMixerParams::placed(Rect::sized(2, 2), Rect::new(2.0, 2.0, 2.0, 2.0));
        let half = solid(&pool, 2, 2, 9);
        let out = mixer.mix(&[input(vec![Frame::new(0, 1, Some(half))], params)], 0, 1);

        let sample = out.sample.unwrap();
        let canvas = &sample.frames()[0].buffer.as_ref().unwrap().texture;
        assert_eq!(canvas.pixel(0, 0), Some(CANVAS_BACKGROUND));
        assert_eq!(canvas.pixel(3, 3), Some(9));
    }

    #[test]
    fn test_only_newest_position_rendered() {
        let rt = testing::runtime();
        let session = testing::session(&rt, MediaKind::Video, FrameRate::new(10, 1));
        let mixer = VideoMixer::new(session, PipelineHandle::detached(), 2, 2, Default::default());
        let pool = BufferPool::new("test");

        let out = mixer.mix(
            &[input(
                vec![
                    Frame::new(2, 1, Some(solid(&pool, 2, 2, 3))),
                    Frame::new(4, 1, Some(solid(&pool, 2, 2, 5))),
                ],
                VideoMixerParams::default(),
            )],
            2,
            5,
        );

        let sample = out.sample.unwrap();
        assert_eq!(sample.len(), 1);
        assert_eq!(sample.frames()[0].buffer.as_ref().unwrap().texture.pixel(1, 1), Some(5));
        assert_eq!(mixer.dropped_frames(), 2);
    }

    #[test]
    fn test_no_input_frames_yields_empty_sample() {
        let rt = testing::runtime();
        let session = testing::session(&rt, MediaKind::Video, FrameRate::new(10, 1));
        let mixer = VideoMixer::new(session, PipelineHandle::detached(), 2, 2, Default::default());
        let out = mixer.mix(&[input(vec![], VideoMixerParams::default())], 0, 1);
        assert!(!out.has_frames());
        assert_eq!(out.frame_end, 1);
    }
}
