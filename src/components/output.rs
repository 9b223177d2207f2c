use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, trace, warn};

use super::{ComponentBase, MediaComponent, PipelineHandle};
use crate::error::MediaError;
use crate::media::{EncodedPacket, MediaKind, SampleArgs, TimeUnit};
use crate::session::{MediaSession, RequestPacket, RequestQueue};
use crate::topology::{Edge, MediaStream, StreamId, StreamKind, TopologyBuilder};

/// Destination for encoded packets of both halves of a recording.
pub trait OutputWriter: Send + Sync {
    fn write(&self, kind: MediaKind, packet: &EncodedPacket) -> Result<(), MediaError>;
    fn finalize(&self) -> Result<(), MediaError>;
}

/// A packet as recorded by a writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrittenPacket {
    pub kind: MediaKind,
    pub timestamp: TimeUnit,
    pub duration: TimeUnit,
    pub keyframe: bool,
    pub size: usize,
}

impl WrittenPacket {
    fn new(kind: MediaKind, packet: &EncodedPacket) -> Self {
        Self {
            kind,
            timestamp: packet.timestamp,
            duration: packet.duration,
            keyframe: packet.keyframe,
            size: packet.size,
        }
    }
}

/// Keeps written packets in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    packets: Mutex<Vec<WrittenPacket>>,
    finalized: Mutex<bool>,
}

impl MemoryWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn packets(&self) -> Vec<WrittenPacket> {
        self.packets.lock().clone()
    }

    pub fn count(&self, kind: MediaKind) -> usize {
        self.packets.lock().iter().filter(|p| p.kind == kind).count()
    }

    pub fn is_finalized(&self) -> bool {
        *self.finalized.lock()
    }
}

impl OutputWriter for MemoryWriter {
    fn write(&self, kind: MediaKind, packet: &EncodedPacket) -> Result<(), MediaError> {
        self.packets.lock().push(WrittenPacket::new(kind, packet));
        Ok(())
    }

    fn finalize(&self) -> Result<(), MediaError> {
        *self.finalized.lock() = true;
        Ok(())
    }
}

/// Writes a JSON-lines packet index next to where the container would go.
pub struct IndexFileWriter {
    path: PathBuf,
    file: Mutex<Option<BufWriter<File>>>,
}

impl IndexFileWriter {
    pub fn create(path: &Path, overwrite: bool) -> Result<Arc<Self>, MediaError> {
        if path.exists() && !overwrite {
            return Err(MediaError::Recording(format!(
                "output file {:?} already exists",
                path
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        info!("Recording to {:?}", path);
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(BufWriter::new(file))),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputWriter for IndexFileWriter {
    fn write(&self, kind: MediaKind, packet: &EncodedPacket) -> Result<(), MediaError> {
        let mut file = self.file.lock();
        // Packets still in flight when the recording closed are dropped.
        let Some(writer) = file.as_mut() else {
            trace!("Dropping {:?} packet at {} after finalize", kind, packet.timestamp);
            return Ok(());
        };
        let line = serde_json::to_string(&WrittenPacket::new(kind, packet))
            .map_err(|e| MediaError::stream("output", e))?;
        writeln!(writer, "{}", line)?;
        Ok(())
    }

    fn finalize(&self) -> Result<(), MediaError> {
        if let Some(mut writer) = self.file.lock().take() {
            writer.flush()?;
            info!("Recording finalized: {:?}", self.path);
        }
        Ok(())
    }
}

impl Drop for IndexFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            warn!("Failed to finalize {:?}: {}", self.path, e);
        }
    }
}

/// Writes one half of the encoded recording to a shared writer.
pub struct OutputSink {
    base: ComponentBase,
    kind: MediaKind,
    writer: Arc<dyn OutputWriter>,
}

impl MediaComponent for OutputSink {
    fn base(&self) -> &ComponentBase {
        &self.base
    }
}

impl OutputSink {
    pub fn new(session: Arc<MediaSession>, pipeline: PipelineHandle, writer: Arc<dyn OutputWriter>) -> Arc<Self> {
        let kind = session.kind();
        Arc::new(Self {
            base: ComponentBase::new("output", session, pipeline),
            kind,
            writer,
        })
    }

    pub fn writer(&self) -> &Arc<dyn OutputWriter> {
        &self.writer
    }

    pub fn create_stream(self: &Arc<Self>, builder: &mut TopologyBuilder) -> StreamId {
        let sink = self.clone();
        let kind = match self.kind {
            MediaKind::Video => StreamKind::VideoOutput,
            MediaKind::Audio => StreamKind::AudioOutput,
        };
        builder.add_stream(kind, move |id| {
            Arc::new(OutputStream {
                id,
                sink,
                pending: Mutex::new(None),
            })
        })
    }
}

struct OutputStream {
    id: StreamId,
    sink: Arc<OutputSink>,
    pending: Mutex<Option<RequestQueue<(SampleArgs, RequestPacket)>>>,
}

impl MediaStream for OutputStream {
    fn request_sample(&self, rp: &RequestPacket) -> Result<(), MediaError> {
        self.sink.session().request_sample(self.id, rp);
        Ok(())
    }

    fn process_sample(&self, sample: &SampleArgs, rp: &RequestPacket, _edge: &Edge) -> Result<(), MediaError> {
        let mut pending = self.pending.lock();
        let queue = pending.get_or_insert_with(|| RequestQueue::new(rp.packet_number));
        if rp.packet_number < queue.first_packet_number() {
            trace!("Output ignoring stale packet {}", rp.packet_number);
            return Ok(());
        }
        queue.push(rp.packet_number, (sample.clone(), rp.clone()));

        while let Some((sample, rp)) = queue.pop() {
            let encoded = sample
                .as_encoded()
                .ok_or_else(|| MediaError::stream("output", "expected encoded packets"))?;
            for packet in &encoded.packets {
                self.sink.writer.write(self.sink.kind, packet)?;
            }
            self.sink.session().give_sample(self.id, &sample, &rp);
        }
        Ok(())
    }
}
