use parking_lot::Mutex;
use std::sync::Arc;

use super::{ComponentBase, MediaComponent, PipelineHandle};
use crate::error::MediaError;
use crate::media::{Frame, FrameArgs, FrameCollection, FramePayload, FrameUnit, MediaKind, SampleArgs};
use crate::session::{MediaSession, RequestPacket};
use crate::topology::{MediaStream, StreamId, StreamKind, TopologyBuilder};

/// Placeholder input for a mixer with nothing connected: blank video or silence.
pub struct EmptySource {
    base: ComponentBase,
    kind: MediaKind,
}

impl MediaComponent for EmptySource {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl EmptySource {
    pub fn new(session: Arc<MediaSession>) -> Arc<Self> {
        let kind = session.kind();
        Arc::new(Self {
            base: ComponentBase::new("empty source", session, PipelineHandle::detached()),
            kind,
        })
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let source = self.clone();
        let kind = match self.kind {
            MediaKind::Video => StreamKind::EmptyVideo,
            MediaKind::Audio => StreamKind::EmptyAudio,
        };
        builder.add_stream(kind, move |id| {
            Arc::new(EmptyStream {
                id,
                source,
                next_pos: Mutex::new(None),
            })
        })
    }
}

struct EmptyStream {
    id: StreamId,
    source: Arc<EmptySource>,
    next_pos: Mutex<Option<FrameUnit>>,
}

impl EmptyStream {
    fn blank<B: FramePayload>(start: Option<FrameUnit>, frame_end: FrameUnit) -> FrameArgs<B> {
        match start {
            Some(start) if frame_end > start => FrameArgs::with_frames(
                frame_end,
                FrameCollection::from_frames([Frame::new(start, frame_end - start, None)]),
            ),
            _ => FrameArgs::empty(frame_end),
        }
    }
}

impl MediaStream for EmptyStream {
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError> {
        let session = self.source.session();
        let frame_end = session.frame_end(rp.request_time);
        let start = {
            let mut next_pos = self.next_pos.lock();
            let start = *next_pos;
            *next_pos = Some(start.map_or(frame_end, |p| p.max(frame_end)));
            start
        };

        let sample = match self.source.kind {
            MediaKind::Video => SampleArgs::Video(Self::blank(start, frame_end)),
            MediaKind::Audio => SampleArgs::Audio(Self::blank(start, frame_end)),
        };
        session.give_sample(self.id, &sample, rp);
        Ok(())
    }
}
