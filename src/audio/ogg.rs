//! # Ogg container framing
//!
//! Streaming reader that assembles packets out of Ogg pages without seeking,
//! and the matching writer used to hand packets back to songbird as an Ogg
//! stream. Only a single logical bitstream is supported, which is all ffmpeg
//! emits for `-f opus`.

use std::{collections::VecDeque, io::Read};

use bytes::Bytes;

use crate::error::AudioError;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;
const MAX_SEGMENTS_PER_PAGE: usize = 255;

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_BOS: u8 = 0x02;
const FLAG_EOS: u8 = 0x04;

/// Pull-based Ogg packet reader.
pub struct OggPacketReader<R> {
    reader: R,
    current_packet: Vec<u8>,
    queue: VecDeque<Bytes>,
    finished: bool,
    stream_serial: Option<u32>,
}

impl<R: Read> OggPacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            current_packet: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
            stream_serial: None,
        }
    }

    /// Returns the next complete packet, or `None` once the stream ended.
    pub fn next_packet(&mut self) -> Result<Option<Bytes>, AudioError> {
        loop {
            if let Some(packet) = self.queue.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished {
                return Ok(None);
            }
            self.read_page()?;
        }
    }

    /// Fills `buf` completely. `Ok(false)` means a clean EOF before any byte.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool, AudioError> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = match self.reader.read(&mut buf[offset..]) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return if offset == 0 {
                    Ok(false)
                } else {
                    Err(AudioError::Container("unexpected EOF inside an ogg page".into()))
                };
            }
            offset += n;
        }
        Ok(true)
    }

    fn read_page(&mut self) -> Result<(), AudioError> {
        let mut header = [0u8; PAGE_HEADER_LEN];
        if !self.fill(&mut header)? {
            if !self.current_packet.is_empty() {
                return Err(AudioError::Container(
                    "stream ended in the middle of a packet".into(),
                ));
            }
            self.finished = true;
            return Ok(());
        }

        if &header[0..4] != CAPTURE_PATTERN {
            return Err(AudioError::Container("invalid ogg capture pattern".into()));
        }
        if header[4] != 0 {
            return Err(AudioError::Container("unsupported ogg version".into()));
        }

        let header_type = header[5];
        let serial = u32::from_le_bytes([header[14], header[15], header[16], header[17]]);
        match self.stream_serial {
            Some(known) if known != serial => {
                return Err(AudioError::Container(
                    "multiple logical streams are not supported".into(),
                ));
            }
            Some(_) => {}
            None => self.stream_serial = Some(serial),
        }

        let mut segment_table = vec![0u8; header[26] as usize];
        if !self.fill(&mut segment_table)? && !segment_table.is_empty() {
            return Err(AudioError::Container("missing segment table".into()));
        }

        let data_len: usize = segment_table.iter().map(|&v| v as usize).sum();
        let mut data = vec![0u8; data_len];
        if !self.fill(&mut data)? && data_len > 0 {
            return Err(AudioError::Container("missing page body".into()));
        }

        let expected = u32::from_le_bytes([header[22], header[23], header[24], header[25]]);
        let mut zeroed = header;
        zeroed[22..26].fill(0);
        let mut crc = crc::update(0, &zeroed);
        crc = crc::update(crc, &segment_table);
        crc = crc::update(crc, &data);
        if crc != expected {
            return Err(AudioError::Container(format!(
                "crc mismatch: expected 0x{expected:08x}, got 0x{crc:08x}"
            )));
        }

        let continued = header_type & FLAG_CONTINUED != 0;
        if continued && self.current_packet.is_empty() {
            return Err(AudioError::Container(
                "continuation page without a pending packet".into(),
            ));
        }
        if !continued && !self.current_packet.is_empty() {
            return Err(AudioError::Container(
                "pending packet was never continued".into(),
            ));
        }

        let mut offset = 0;
        for &len in &segment_table {
            let end = offset + len as usize;
            self.current_packet.extend_from_slice(&data[offset..end]);
            offset = end;
            if len < 255 {
                let packet = std::mem::take(&mut self.current_packet);
                self.queue.push_back(Bytes::from(packet));
            }
        }

        if header_type & FLAG_EOS != 0 && self.current_packet.is_empty() {
            self.finished = true;
        }

        Ok(())
    }
}

/// Writes packets as Ogg pages, one packet per page (split across
/// continuation pages when it needs more than 255 lacing values).
pub struct OggPageWriter {
    serial: u32,
    sequence: u32,
    started: bool,
}

impl OggPageWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            started: false,
        }
    }

    /// Appends the pages carrying `packet` to `out`.
    ///
    /// `granule` is the absolute granule position after this packet (0 for
    /// header packets).
    pub fn write_packet(&mut self, packet: &[u8], granule: u64, last: bool, out: &mut Vec<u8>) {
        let mut lacing: Vec<u8> = Vec::with_capacity(packet.len() / 255 + 1);
        let mut remaining = packet.len();
        loop {
            if remaining >= 255 {
                lacing.push(255);
                remaining -= 255;
            } else {
                lacing.push(remaining as u8);
                break;
            }
        }

        let chunks: Vec<&[u8]> = lacing.chunks(MAX_SEGMENTS_PER_PAGE).collect();
        let mut body_offset = 0;
        for (index, segments) in chunks.iter().enumerate() {
            let first = index == 0;
            let final_page = index + 1 == chunks.len();
            let body_len: usize = segments.iter().map(|&v| v as usize).sum();
            let body = &packet[body_offset..body_offset + body_len];
            body_offset += body_len;

            let mut flags = 0;
            if !first {
                flags |= FLAG_CONTINUED;
            }
            if !self.started {
                flags |= FLAG_BOS;
                self.started = true;
            }
            if last && final_page {
                flags |= FLAG_EOS;
            }
            // Pages that finish no packet carry granule -1.
            let page_granule = if final_page { granule } else { u64::MAX };
            self.write_page(flags, page_granule, segments, body, out);
        }
    }

    fn write_page(&mut self, flags: u8, granule: u64, segments: &[u8], body: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(CAPTURE_PATTERN);
        out.push(0);
        out.push(flags);
        out.extend_from_slice(&granule.to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.push(segments.len() as u8);
        out.extend_from_slice(segments);
        out.extend_from_slice(body);

        let crc = crc::update(0, &out[start..]);
        out[start + 22..start + 26].copy_from_slice(&crc.to_le_bytes());
        self.sequence = self.sequence.wrapping_add(1);
    }
}

/// Ogg CRC32: polynomial 0x04c11db7, initial value 0, no final xor.
pub(crate) mod crc {
    const fn table_entry(idx: u32) -> u32 {
        let mut r = idx << 24;
        let mut i = 0;
        while i < 8 {
            r = (r << 1) ^ (-(((r >> 31) & 1) as i32) as u32 & 0x04c1_1db7);
            i += 1;
        }
        r
    }

    const fn table() -> [u32; 256] {
        let mut t = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            t[i] = table_entry(i as u32);
            i += 1;
        }
        t
    }

    static TABLE: [u32; 256] = table();

    pub fn update(cur: u32, data: &[u8]) -> u32 {
        data.iter().fold(cur, |crc, &b| {
            (crc << 8) ^ TABLE[((crc >> 24) ^ b as u32) as usize]
        })
    }
}
