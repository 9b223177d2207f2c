//! Frame payloads: CPU textures for video, interleaved float blocks for audio

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::frames::FramePayload;
use super::pool::{Poolable, Pooled};
use super::time::FrameUnit;

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn sized(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Map `inner`, given in the coordinate space of `from`, into `to`.
    pub fn map(inner: &Rect, from: &Rect, to: &Rect) -> Rect {
        if from.is_empty() {
            return Rect::default();
        }
        let sx = to.width / from.width;
        let sy = to.height / from.height;
        Rect {
            x: to.x + (inner.x - from.x) * sx,
            y: to.y + (inner.y - from.y) * sy,
            width: inner.width * sx,
            height: inner.height * sy,
        }
    }
}

/// A BGRA texture kept in system memory.
#[derive(Debug, Clone, Default)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl Poolable for Texture {}

impl Texture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Resize if needed and fill with `color`.
    pub fn reset(&mut self, width: u32, height: u32, color: u32) {
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.pixels = vec![color; width as usize * height as usize];
        } else {
            self.pixels.fill(color);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<u32>()
    }

    /// Nearest-neighbour blit of `src_rect` of `src` into `dest_rect` of `self`.
    pub fn blit(&mut self, src: &Texture, src_rect: &Rect, dest_rect: &Rect) {
        if src_rect.is_empty() || dest_rect.is_empty() || src.width == 0 || src.height == 0 {
            return;
        }
        let x0 = dest_rect.x.max(0.0).floor() as i64;
        let y0 = dest_rect.y.max(0.0).floor() as i64;
        let x1 = (dest_rect.x + dest_rect.width).min(self.width as f32).ceil() as i64;
        let y1 = (dest_rect.y + dest_rect.height).min(self.height as f32).ceil() as i64;
        let sx = src_rect.width / dest_rect.width;
        let sy = src_rect.height / dest_rect.height;

        for y in y0..y1 {
            let v = src_rect.y + (y as f32 + 0.5 - dest_rect.y) * sy;
            let v = (v.max(0.0) as u32).min(src.height - 1);
            for x in x0..x1 {
                let u = src_rect.x + (x as f32 + 0.5 - dest_rect.x) * sx;
                let u = (u.max(0.0) as u32).min(src.width - 1);
                let color = src.pixels[v as usize * src.width as usize + u as usize];
                self.pixels[y as usize * self.width as usize + x as usize] = color;
            }
        }
    }
}

/// A texture shared between frames, with its placement in the producing
/// source's coordinate space.
#[derive(Debug, Clone)]
pub struct VideoPayload {
    pub texture: Arc<Pooled<Texture>>,
    /// Region of `texture` that holds the image
    pub source_rect: Rect,
    /// Where the image lands, in the source's own coordinate space
    pub dest_rect: Rect,
}

impl VideoPayload {
    pub fn full(texture: Arc<Pooled<Texture>>) -> Self {
        let rect = Rect::sized(texture.width, texture.height);
        Self {
            texture,
            source_rect: rect,
            dest_rect: rect,
        }
    }
}

impl FramePayload for VideoPayload {
    fn split(&self, _offset: FrameUnit, _dur: FrameUnit) -> (Self, Self) {
        // A still image covers every position of its span.
        (self.clone(), self.clone())
    }
}

/// Interleaved f32 samples.
#[derive(Debug, Clone, Default)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
}

impl Poolable for AudioBlock {
    fn recycle(&mut self) {
        self.samples.clear();
    }
}

/// A window of sample frames into a shared [`AudioBlock`].
#[derive(Debug, Clone)]
pub struct AudioSlice {
    host: Arc<Pooled<AudioBlock>>,
    channels: u32,
    offset: usize,
    frames: usize,
}

impl AudioSlice {
    /// Covers the whole block.
    pub fn new(host: Arc<Pooled<AudioBlock>>, channels: u32) -> Self {
        let channels = channels.max(1);
        let frames = host.samples.len() / channels as usize;
        Self {
            host,
            channels,
            offset: 0,
            frames,
        }
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn data(&self) -> &[f32] {
        let ch = self.channels as usize;
        &self.host.samples[self.offset * ch..(self.offset + self.frames) * ch]
    }
}

impl FramePayload for AudioSlice {
    fn split(&self, offset: FrameUnit, dur: FrameUnit) -> (Self, Self) {
        debug_assert_eq!(dur as usize, self.frames);
        let offset = (offset.max(0) as usize).min(self.frames);
        let past = Self {
            host: self.host.clone(),
            channels: self.channels,
            offset: self.offset,
            frames: offset,
        };
        let future = Self {
            host: self.host.clone(),
            channels: self.channels,
            offset: self.offset + offset,
            frames: self.frames - offset,
        };
        (past, future)
    }
}
