//! Pull-based Opus packet source with one-packet lookahead and a live volume
//! transform.

use std::{
    io::{self, Read},
    sync::Arc,
};

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate,
};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use super::{
    ogg::{OggPacketReader, OggPageWriter},
    transmux::{ProcessGroup, TransmuxedStream},
    volume::{apply_gain, Volume},
    OPUS_CHANNELS, OPUS_FRAME_SIZE,
};
use crate::error::AudioError;

/// `OpusHead` and `OpusTags` precede every audio frame.
const HEADER_PACKETS: usize = 2;

/// Largest Opus frame at 48 kHz (120 ms), per channel.
const MAX_FRAME_SAMPLES: usize = 5760;

/// Recommended upper bound for a single encoded Opus packet.
const MAX_PACKET_BYTES: usize = 4000;

/// A packet source shared between the session (which owns the queue entry)
/// and the voice transport (which drains it).
///
/// The processes sit behind their own lock: a reader blocked on the pipe
/// holds the packet lock, and killing the processes is what unblocks it.
#[derive(Clone)]
pub struct SharedPacketSource {
    source: Arc<Mutex<PacketSource>>,
    processes: Arc<Mutex<ProcessGroup>>,
}

impl SharedPacketSource {
    pub fn lock(&self) -> MutexGuard<'_, PacketSource> {
        self.source.lock()
    }

    /// Kills the upstream processes without taking the packet lock. A read
    /// in progress then sees end of stream.
    pub fn cleanup(&self) {
        release(&self.processes);
    }

    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }
}

fn release(processes: &Mutex<ProcessGroup>) {
    let mut processes = processes.lock();
    if !processes.is_empty() {
        debug!("🧹 Liberando procesos de la fuente de audio");
    }
    processes.release();
}

/// Reads Opus packets out of an Ogg stream.
///
/// Header packets are returned untouched. Audio packets go through
/// decode → gain → encode whenever the shared [`Volume`] is not unity.
pub struct PacketSource {
    packets: OggPacketReader<Box<dyn Read + Send>>,
    peeked: Option<Bytes>,
    headers_seen: usize,
    ended: bool,
    decoder: Decoder,
    encoder: Encoder,
    volume: Volume,
    pcm: Vec<i16>,
    encoded: Vec<u8>,
    processes: Arc<Mutex<ProcessGroup>>,
}

impl PacketSource {
    pub fn new<R>(reader: R, volume: Volume) -> Result<Self, AudioError>
    where
        R: Read + Send + 'static,
    {
        Ok(Self {
            packets: OggPacketReader::new(Box::new(reader) as Box<dyn Read + Send>),
            peeked: None,
            headers_seen: 0,
            ended: false,
            decoder: Decoder::new(SampleRate::Hz48000, Channels::Stereo)?,
            encoder: Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?,
            volume,
            pcm: vec![0; MAX_FRAME_SAMPLES * OPUS_CHANNELS],
            encoded: vec![0; MAX_PACKET_BYTES],
            processes: Arc::default(),
        })
    }

    /// Wraps the output of a transmux pipeline and takes ownership of its
    /// processes.
    pub fn from_transmux(stream: TransmuxedStream, volume: Volume) -> Result<Self, AudioError> {
        let (reader, processes) = stream.into_parts();
        let mut source = Self::new(reader, volume)?;
        source.processes = Arc::new(Mutex::new(processes));
        Ok(source)
    }

    pub fn into_shared(self) -> SharedPacketSource {
        SharedPacketSource {
            processes: self.processes.clone(),
            source: Arc::new(Mutex::new(self)),
        }
    }

    /// Returns the next packet. An empty packet means the stream has ended,
    /// and every later call returns an empty packet as well.
    pub fn read(&mut self) -> Result<Bytes, AudioError> {
        if let Some(packet) = self.peeked.take() {
            return Ok(packet);
        }

        while !self.ended {
            match self.packets.next_packet()? {
                // zero-length packets mark lost frames; nothing to forward
                Some(packet) if packet.is_empty() => continue,
                Some(packet) => return self.translate(packet),
                None => self.ended = true,
            }
        }

        Ok(Bytes::new())
    }

    /// Returns the next packet without consuming it. Calling `peek` again
    /// before `read` returns the same packet.
    pub fn peek(&mut self) -> Result<Bytes, AudioError> {
        if let Some(packet) = &self.peeked {
            return Ok(packet.clone());
        }

        let packet = self.read()?;
        self.peeked = Some(packet.clone());
        Ok(packet)
    }

    /// Packets are already Opus frames, so the transport must not re-encode.
    pub const fn is_framed_as_opus() -> bool {
        true
    }

    /// Blocks until the first packet is available. Call from a blocking
    /// context: it waits on the upstream processes.
    pub fn preload(&mut self) -> Result<(), AudioError> {
        self.peek().map(|_| ())
    }

    /// Releases the processes feeding this source. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        release(&self.processes);
    }

    fn translate(&mut self, packet: Bytes) -> Result<Bytes, AudioError> {
        if self.headers_seen < HEADER_PACKETS || is_header(&packet) {
            self.headers_seen += 1;
            return Ok(packet);
        }

        let gain = self.volume.db_gain();

        // Always decode so the decoder state follows the stream even while
        // frames are passed through.
        let frames = self.decoder.decode(
            Some((&packet[..]).try_into()?),
            (&mut self.pcm[..]).try_into()?,
            false,
        )?;

        if gain == 0.0 {
            return Ok(packet);
        }

        let samples = &mut self.pcm[..frames * OPUS_CHANNELS];
        apply_gain(samples, gain);
        let len = self.encoder.encode(samples, &mut self.encoded)?;
        Ok(Bytes::copy_from_slice(&self.encoded[..len]))
    }
}

impl Drop for PacketSource {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn is_header(packet: &[u8]) -> bool {
    packet.starts_with(b"OpusHead") || packet.starts_with(b"OpusTags")
}

/// Re-muxes a shared packet source into an Ogg byte stream, so a demuxing
/// player can consume it and forward the Opus frames as they are.
pub struct OggRemuxReader {
    source: SharedPacketSource,
    writer: OggPageWriter,
    pending: Vec<u8>,
    offset: usize,
    packets: usize,
    granule: u64,
    finished: bool,
}

impl OggRemuxReader {
    pub fn new(source: SharedPacketSource) -> Self {
        Self {
            source,
            writer: OggPageWriter::new(0x6a75_6b65),
            pending: Vec::new(),
            offset: 0,
            packets: 0,
            granule: 0,
            finished: false,
        }
    }
}

impl Read for OggRemuxReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.pending.len() {
            if self.finished {
                return Ok(0);
            }

            self.pending.clear();
            self.offset = 0;

            let packet = self.source.lock().read()?;
            if packet.is_empty() {
                self.finished = true;
                return Ok(0);
            }

            if self.packets >= HEADER_PACKETS {
                self.granule += OPUS_FRAME_SIZE as u64;
            }
            self.packets += 1;
            self.writer
                .write_packet(&packet, self.granule, false, &mut self.pending);
        }

        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}
