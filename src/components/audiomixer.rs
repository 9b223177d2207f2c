use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::mixer::{MixInput, MixKernel, MixerStream};
use super::{ComponentBase, MediaComponent, PipelineHandle};
use crate::media::{
    AudioBlock, AudioSlice, BufferPool, Frame, FrameArgs, FrameCollection, FrameUnit, SampleArgs,
};
use crate::session::MediaSession;
use crate::topology::{EdgeParams, StreamId, StreamKind, TopologyBuilder};

/// Per-input audio mixing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMixerParams {
    /// Gain in percent; 100 is unity
    pub boost: f32,
}

impl Default for AudioMixerParams {
    fn default() -> Self {
        Self { boost: 100.0 }
    }
}

/// Sums every audio input into one interleaved buffer.
pub struct AudioMixer {
    base: ComponentBase,
    channels: u32,
    pool: BufferPool<AudioBlock>,
}

impl MediaComponent for AudioMixer {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl AudioMixer {
    pub fn new(session: Arc<MediaSession>, pipeline: PipelineHandle, channels: u32) -> Arc<Self> {
        Arc::new(Self {
            base: ComponentBase::new("audio mixer", session, pipeline),
            channels: channels.max(1),
            pool: BufferPool::new("audio mix"),
        })
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let kernel = self.clone();
        builder.add_stream(StreamKind::AudioMixer, move |id| {
            Arc::new(MixerStream::new(id, kernel))
        })
    }
}

impl MixKernel for AudioMixer {
    type Payload = AudioSlice;
    type Params = AudioMixerParams;

    fn name(&self) -> &'static str {
        self.base.name()
    }

    fn session(&self) -> &Arc<MediaSession> {
        self.base.session()
    }

    fn maximum_buffer_size(&self) -> FrameUnit {
        // One second of samples
        let rate = self.base.session().frame_rate();
        (rate.num / rate.den).max(1)
    }

    fn extract(sample: &SampleArgs) -> Option<&FrameArgs<AudioSlice>> {
        sample.as_audio()
    }

    fn wrap(args: FrameArgs<AudioSlice>) -> SampleArgs {
        SampleArgs::Audio(args)
    }

    fn params(edge: &EdgeParams) -> AudioMixerParams {
        match edge {
            EdgeParams::Audio(cell) => cell.get(),
            _ => AudioMixerParams::default(),
        }
    }

    fn mix(
        &self,
        inputs: &[MixInput<AudioSlice, AudioMixerParams>],
        first: FrameUnit,
        end: FrameUnit,
    ) -> FrameArgs<AudioSlice> {
        let channels = self.channels as usize;
        let frame_count = (end - first) as usize;

        let mut block = self.pool.acquire(AudioBlock::default);
        block.samples.clear();
        block.samples.resize(frame_count * channels, 0.0);

        for input in inputs {
            let gain = input.params.boost / 100.0;
            for frame in input.frames.frames() {
                let Some(slice) = frame.buffer.as_ref() else {
                    continue;
                };
                let src_channels = slice.channels() as usize;
                let data = slice.data();
                let start = frame.pos.max(first);
                let stop = frame.end().min(end);
                for pos in start..stop {
                    let src = (pos - frame.pos) as usize * src_channels;
                    let dst = (pos - first) as usize * channels;
                    for c in 0..channels {
                        let sample = data[src + c.min(src_channels - 1)];
                        block.samples[dst + c] += sample * gain;
                    }
                }
            }
        }

        for sample in block.samples.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        let slice = AudioSlice::new(Arc::new(block), self.channels);
        let frame = Frame::new(first, end - first, Some(slice));
        FrameArgs::with_frames(end, FrameCollection::from_frames([frame]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing;
    use crate::media::{FrameRate, MediaKind};

    fn constant(pool: &BufferPool<AudioBlock>, frames: usize, channels: u32, value: f32) -> AudioSlice {
        let mut block = pool.acquire(AudioBlock::default);
        block.samples = vec![value; frames * channels as usize];
        AudioSlice::new(Arc::new(block), channels)
    }

    fn mixer(rt: &tokio::runtime::Runtime) -> Arc<AudioMixer> {
        let session = testing::session(rt, MediaKind::Audio, FrameRate::sample_rate(48000));
        AudioMixer::new(session, PipelineHandle::detached(), 2)
    }

    #[test]
    fn test_inputs_sum_with_boost() {
        let rt = testing::runtime();
        let mixer = mixer(&rt);
        let pool = BufferPool::new("test");

        let a = MixInput {
            frames: FrameCollection::from_frames([Frame::new(0, 4, Some(constant(&pool, 4, 2, 0.25)))]),
            params: AudioMixerParams::default(),
        };
        let b = MixInput {
            frames: FrameCollection::from_frames([Frame::new(2, 2, Some(constant(&pool, 2, 2, 0.25)))]),
            params: AudioMixerParams { boost: 200.0 },
        };

        let out = mixer.mix(&[a, b], 0, 4);
        let sample = out.sample.unwrap();
        let data = sample.frames()[0].buffer.as_ref().unwrap().data().to_vec();
        assert_eq!(data, vec![0.25, 0.25, 0.25, 0.25, 0.75, 0.75, 0.75, 0.75]);
    }

    #[test]
    fn test_output_is_clamped() {
        let rt = testing::runtime();
        let mixer = mixer(&rt);
        let pool = BufferPool::new("test");
        let loud = MixInput {
            frames: FrameCollection::from_frames([Frame::new(0, 1, Some(constant(&pool, 1, 2, 0.9)))]),
            params: AudioMixerParams { boost: 300.0 },
        };
        let out = mixer.mix(&[loud], 0, 1);
        let sample = out.sample.unwrap();
        assert_eq!(sample.frames()[0].buffer.as_ref().unwrap().data(), &[1.0, 1.0]);
    }

    #[test]
    fn test_silence_when_inputs_have_no_buffers() {
        let rt = testing::runtime();
        let mixer = mixer(&rt);
        let silent = MixInput {
            frames: FrameCollection::from_frames([Frame::new(0, 3, None)]),
            params: AudioMixerParams::default(),
        };
        let out = mixer.mix(&[silent], 0, 3);
        let sample = out.sample.unwrap();
        let frame = &sample.frames()[0];
        assert_eq!(frame.dur, 3);
        assert!(frame.buffer.as_ref().unwrap().data().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_mono_input_fills_every_channel() {
        let rt = testing::runtime();
        let mixer = mixer(&rt);
        let pool = BufferPool::new("test");
        let mono = MixInput {
            frames: FrameCollection::from_frames([Frame::new(0, 1, Some(constant(&pool, 1, 1, 0.5)))]),
            params: AudioMixerParams::default(),
        };
        let out = mixer.mix(&[mono], 0, 1);
        let sample = out.sample.unwrap();
        assert_eq!(sample.frames()[0].buffer.as_ref().unwrap().data(), &[0.5, 0.5]);
    }
}
