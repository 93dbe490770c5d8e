//! Rotating binary record log.
//!
//! On-disk layout, all little-endian:
//!
//! ```text
//! FileHeader   (8 bytes):  magic u32 = 0x47574C42, ver u16 = 1, reserved u16
//! RecordHeader (20 bytes): type u8, reserved u8, payload_len u16,
//!                          epoch_s f64, mono_s f64
//! ```
//!
//! followed by `payload_len` payload bytes per record. Record payloads are
//! the serialized sample structs; the reader validates the payload length
//! against the expected size for the type and skips mismatches, so a log
//! written by a newer daemon stays partially readable.
//!
//! Segments are named `<stem>_<YYYYmmdd_HHMMSS>_<index><ext>`. Rotation
//! happens before a record that would push the segment past `max_bytes`;
//! after opening a segment, older segments from the same session beyond
//! `keep_files` are removed best-effort by modification time.

use crate::core::time::Timestamps;
use crate::core::types::{
    EventCmd, EventSample, EventType, MotorCmdSample, MotorCommands, StateSample,
};
use crate::error::{Error, Result};
use crate::wire::payload::{STATES_SIZE, get_states, put_states};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const FILE_MAGIC: u32 = 0x47574C42;
pub const FILE_VER: u16 = 1;
pub const FILE_HEADER_SIZE: usize = 8;
pub const RECORD_HEADER_SIZE: usize = 20;

/// Record type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    State = 1,
    Cmd = 2,
    Event = 3,
}

impl RecordType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(RecordType::State),
            2 => Some(RecordType::Cmd),
            3 => Some(RecordType::Event),
            _ => None,
        }
    }
}

fn encode_file_header() -> [u8; FILE_HEADER_SIZE] {
    let mut b = [0u8; FILE_HEADER_SIZE];
    b[0..4].copy_from_slice(&FILE_MAGIC.to_le_bytes());
    b[4..6].copy_from_slice(&FILE_VER.to_le_bytes());
    b
}

fn encode_record_header(ty: RecordType, payload_len: u16, ts: Timestamps) -> [u8; RECORD_HEADER_SIZE] {
    let mut b = [0u8; RECORD_HEADER_SIZE];
    b[0] = ty as u8;
    // b[1] reserved
    b[2..4].copy_from_slice(&payload_len.to_le_bytes());
    b[4..12].copy_from_slice(&ts.epoch_s.to_le_bytes());
    b[12..20].copy_from_slice(&ts.mono_s.to_le_bytes());
    b
}

// ---- sample payload codecs ----

fn put_ts(b: &mut [u8], o: &mut usize, ts: Timestamps) {
    b[*o..*o + 8].copy_from_slice(&ts.epoch_s.to_le_bytes());
    b[*o + 8..*o + 16].copy_from_slice(&ts.mono_s.to_le_bytes());
    *o += 16;
}

fn get_ts(b: &[u8], o: &mut usize) -> Timestamps {
    let epoch_s = f64::from_le_bytes(b[*o..*o + 8].try_into().unwrap());
    let mono_s = f64::from_le_bytes(b[*o + 8..*o + 16].try_into().unwrap());
    *o += 16;
    Timestamps { epoch_s, mono_s }
}

pub const STATE_SAMPLE_SIZE: usize = 16 + 4 + STATES_SIZE; // 88
pub const CMD_SAMPLE_SIZE: usize = 16 + 4 + 8; // 28
pub const EVENT_SAMPLE_SIZE: usize = 16 + 13; // 29

pub fn encode_state_sample(s: &StateSample) -> [u8; STATE_SAMPLE_SIZE] {
    let mut b = [0u8; STATE_SAMPLE_SIZE];
    let o = &mut 0;
    put_ts(&mut b, o, s.ts);
    b[*o..*o + 4].copy_from_slice(&s.seq.to_le_bytes());
    *o += 4;
    put_states(&mut b, o, &s.st);
    b
}

pub fn decode_state_sample(b: &[u8]) -> Option<StateSample> {
    if b.len() != STATE_SAMPLE_SIZE {
        return None;
    }
    let o = &mut 0;
    let ts = get_ts(b, o);
    let seq = u32::from_le_bytes(b[*o..*o + 4].try_into().unwrap());
    *o += 4;
    let st = get_states(b, o);
    Some(StateSample { ts, seq, st })
}

pub fn encode_cmd_sample(s: &MotorCmdSample) -> [u8; CMD_SAMPLE_SIZE] {
    let mut b = [0u8; CMD_SAMPLE_SIZE];
    let o = &mut 0;
    put_ts(&mut b, o, s.ts);
    b[*o..*o + 4].copy_from_slice(&s.seq.to_le_bytes());
    *o += 4;
    for m in [s.motors.m1, s.motors.m2, s.motors.m3, s.motors.m4] {
        b[*o..*o + 2].copy_from_slice(&m.to_le_bytes());
        *o += 2;
    }
    b
}

pub fn decode_cmd_sample(b: &[u8]) -> Option<MotorCmdSample> {
    if b.len() != CMD_SAMPLE_SIZE {
        return None;
    }
    let o = &mut 0;
    let ts = get_ts(b, o);
    let seq = u32::from_le_bytes(b[*o..*o + 4].try_into().unwrap());
    *o += 4;
    let mut m = [0i16; 4];
    for v in &mut m {
        *v = i16::from_le_bytes(b[*o..*o + 2].try_into().unwrap());
        *o += 2;
    }
    Some(MotorCmdSample {
        ts,
        seq,
        motors: MotorCommands {
            m1: m[0],
            m2: m[1],
            m3: m[2],
            m4: m[3],
        },
    })
}

pub fn encode_event_sample(s: &EventSample) -> [u8; EVENT_SAMPLE_SIZE] {
    let mut b = [0u8; EVENT_SAMPLE_SIZE];
    let o = &mut 0;
    put_ts(&mut b, o, s.ts);
    b[*o] = s.ev.kind as u8;
    b[*o + 1..*o + 5].copy_from_slice(&s.ev.seq.to_le_bytes());
    b[*o + 5] = s.ev.data0;
    b[*o + 6] = s.ev.data1;
    b[*o + 7] = s.ev.data2;
    b[*o + 8] = s.ev.data3;
    b[*o + 9..*o + 13].copy_from_slice(&s.ev.aux.to_le_bytes());
    b
}

pub fn decode_event_sample(b: &[u8]) -> Option<EventSample> {
    if b.len() != EVENT_SAMPLE_SIZE {
        return None;
    }
    let o = &mut 0;
    let ts = get_ts(b, o);
    let kind = EventType::from_u8(b[*o])?;
    let seq = u32::from_le_bytes(b[*o + 1..*o + 5].try_into().unwrap());
    let aux = u32::from_le_bytes(b[*o + 9..*o + 13].try_into().unwrap());
    Some(EventSample {
        ts,
        ev: EventCmd {
            kind,
            seq,
            data0: b[*o + 5],
            data1: b[*o + 6],
            data2: b[*o + 7],
            data3: b[*o + 8],
            aux,
        },
    })
}

// ---- writer ----

/// Appends records to a single segment file
struct SegmentWriter {
    out: BufWriter<File>,
}

impl SegmentWriter {
    fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&encode_file_header())?;
        Ok(Self { out })
    }

    fn write_record(&mut self, ty: RecordType, ts: Timestamps, payload: &[u8]) -> Result<()> {
        self.out
            .write_all(&encode_record_header(ty, payload.len() as u16, ts))?;
        self.out.write_all(payload)?;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Size-rotated binary log with session-tagged segment names
pub struct RotatingBinaryLog {
    dir: PathBuf,
    stem: String,
    ext: String,
    session_tag: String,
    max_bytes: u64,
    keep_files: u32,
    index: u32,
    bytes_written: u64,
    writer: Option<SegmentWriter>,
}

impl RotatingBinaryLog {
    /// Open the first segment.
    ///
    /// `base_path` supplies directory, stem and extension; `max_bytes = 0`
    /// disables rotation.
    pub fn open(base_path: &str, max_bytes: u64, keep_files: u32) -> Result<Self> {
        let base = PathBuf::from(base_path);
        let dir = match base.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "gateway".to_string());
        let ext = match base.extension() {
            Some(e) => format!(".{}", e.to_string_lossy()),
            None => ".bin".to_string(),
        };

        fs::create_dir_all(&dir)?;

        let mut log = Self {
            dir,
            stem,
            ext,
            session_tag: chrono::Local::now().format("%Y%m%d_%H%M%S").to_string(),
            max_bytes,
            keep_files,
            index: 0,
            bytes_written: 0,
            writer: None,
        };
        log.open_segment()?;
        Ok(log)
    }

    /// Update rotation parameters (hot-reloadable)
    pub fn set_rotation(&mut self, max_bytes: u64, keep_files: u32) {
        self.max_bytes = max_bytes;
        self.keep_files = keep_files;
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn segment_name(&self, index: u32) -> String {
        format!("{}_{}_{}{}", self.stem, self.session_tag, index, self.ext)
    }

    fn open_segment(&mut self) -> Result<()> {
        let path = self.dir.join(self.segment_name(self.index));
        self.index += 1;

        let writer = SegmentWriter::create(&path)
            .map_err(|e| Error::Other(format!("open {}: {}", path.display(), e)))?;
        self.writer = Some(writer);
        self.bytes_written = FILE_HEADER_SIZE as u64;

        self.cleanup_old_segments();
        log::info!("Binary logging -> {}", path.display());
        Ok(())
    }

    /// Remove the oldest same-session segments beyond `keep_files`
    fn cleanup_old_segments(&self) {
        if self.keep_files == 0 {
            return;
        }
        let prefix = format!("{}_{}_", self.stem, self.session_tag);

        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let mut matches: Vec<_> = entries
            .flatten()
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.starts_with(&prefix) && name.ends_with(&self.ext)
            })
            .collect();

        matches.sort_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });

        while matches.len() > self.keep_files as usize {
            let victim = matches.remove(0);
            if let Err(e) = fs::remove_file(victim.path()) {
                log::warn!("Failed to remove old segment {:?}: {}", victim.path(), e);
            }
        }
    }

    fn rotate_if_needed(&mut self, bytes_to_add: u64) -> Result<()> {
        if self.max_bytes == 0 || self.bytes_written + bytes_to_add <= self.max_bytes {
            return Ok(());
        }
        if let Some(w) = self.writer.take() {
            w.finish()?;
        }
        self.open_segment()
    }

    /// Append one record, rotating first if it would overflow the segment
    pub fn write_record(&mut self, ty: RecordType, ts: Timestamps, payload: &[u8]) -> Result<()> {
        let bytes_to_add = (RECORD_HEADER_SIZE + payload.len()) as u64;
        self.rotate_if_needed(bytes_to_add)?;

        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::Other("binary log is closed".to_string()));
        };
        writer.write_record(ty, ts, payload)?;
        self.bytes_written += bytes_to_add;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(w) = self.writer.take()
            && let Err(e) = w.finish()
        {
            log::warn!("Binary log close failed: {}", e);
        }
    }
}

impl Drop for RotatingBinaryLog {
    fn drop(&mut self) {
        self.close();
    }
}

// ---- reader (offline analysis and tests) ----

/// Decoded record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogRecord {
    State(StateSample),
    Cmd(MotorCmdSample),
    Event(EventSample),
}

/// Read every decodable record from one segment.
///
/// Records with an unknown type or a payload size that does not match the
/// type are skipped, not fatal.
pub fn read_records(path: &Path) -> Result<Vec<LogRecord>> {
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;

    if raw.len() < FILE_HEADER_SIZE {
        return Err(Error::Other(format!("{}: truncated header", path.display())));
    }
    let magic = u32::from_le_bytes(raw[0..4].try_into().unwrap());
    if magic != FILE_MAGIC {
        return Err(Error::Other(format!("{}: bad magic", path.display())));
    }

    let mut records = Vec::new();
    let mut pos = FILE_HEADER_SIZE;
    while pos + RECORD_HEADER_SIZE <= raw.len() {
        let ty = raw[pos];
        let payload_len =
            u16::from_le_bytes(raw[pos + 2..pos + 4].try_into().unwrap()) as usize;
        let payload_start = pos + RECORD_HEADER_SIZE;
        if payload_start + payload_len > raw.len() {
            break; // truncated tail record
        }
        let payload = &raw[payload_start..payload_start + payload_len];

        match RecordType::from_u8(ty) {
            Some(RecordType::State) => {
                if let Some(s) = decode_state_sample(payload) {
                    records.push(LogRecord::State(s));
                }
            }
            Some(RecordType::Cmd) => {
                if let Some(s) = decode_cmd_sample(payload) {
                    records.push(LogRecord::Cmd(s));
                }
            }
            Some(RecordType::Event) => {
                if let Some(s) = decode_event_sample(payload) {
                    records.push(LogRecord::Event(s));
                }
            }
            None => {}
        }
        pos = payload_start + payload_len;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::States;
    use tempfile::TempDir;

    fn ts(mono: f64) -> Timestamps {
        Timestamps {
            epoch_s: 1_700_000_000.0 + mono,
            mono_s: mono,
        }
    }

    fn state_sample(seq: u32) -> StateSample {
        let mut st = States::default();
        st.battery_voltage = 11.1;
        st.enc.e1 = seq as i32;
        StateSample { ts: ts(seq as f64), seq, st }
    }

    fn segments_in(dir: &Path) -> Vec<PathBuf> {
        let mut v: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "bin"))
            .collect();
        v.sort();
        v
    }

    #[test]
    fn test_roundtrip_all_record_types() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("flight.bin");
        let mut log = RotatingBinaryLog::open(base.to_str().unwrap(), 0, 0).unwrap();

        let s = state_sample(1);
        let c = MotorCmdSample {
            ts: ts(2.0),
            seq: 2,
            motors: MotorCommands { m1: -5, m2: 5, m3: 0, m4: 100 },
        };
        let e = EventSample {
            ts: ts(3.0),
            ev: EventCmd {
                kind: EventType::FlagRise,
                seq: 3,
                data0: 1,
                data1: 0x07,
                data2: 0,
                data3: 0,
                aux: 9,
            },
        };

        log.write_record(RecordType::State, s.ts, &encode_state_sample(&s)).unwrap();
        log.write_record(RecordType::Cmd, c.ts, &encode_cmd_sample(&c)).unwrap();
        log.write_record(RecordType::Event, e.ts, &encode_event_sample(&e)).unwrap();
        log.close();

        let segs = segments_in(tmp.path());
        assert_eq!(segs.len(), 1);
        let records = read_records(&segs[0]).unwrap();
        assert_eq!(records, vec![LogRecord::State(s), LogRecord::Cmd(c), LogRecord::Event(e)]);
    }

    #[test]
    fn test_rotation_by_size() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("flight.bin");
        // room for the file header plus two state records per segment
        let max = (FILE_HEADER_SIZE + 2 * (RECORD_HEADER_SIZE + STATE_SAMPLE_SIZE)) as u64;
        let mut log = RotatingBinaryLog::open(base.to_str().unwrap(), max, 10).unwrap();

        for seq in 0..5u32 {
            let s = state_sample(seq);
            log.write_record(RecordType::State, s.ts, &encode_state_sample(&s)).unwrap();
        }
        log.close();

        let segs = segments_in(tmp.path());
        assert_eq!(segs.len(), 3);

        // no segment exceeds the limit, every record survives in order
        let mut seqs = Vec::new();
        for seg in &segs {
            assert!(fs::metadata(seg).unwrap().len() <= max);
            for rec in read_records(seg).unwrap() {
                if let LogRecord::State(s) = rec {
                    seqs.push(s.seq);
                }
            }
        }
        seqs.sort();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_keep_files_prunes_oldest() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("flight.bin");
        let max = (FILE_HEADER_SIZE + RECORD_HEADER_SIZE + STATE_SAMPLE_SIZE) as u64;
        let mut log = RotatingBinaryLog::open(base.to_str().unwrap(), max, 3).unwrap();

        for seq in 0..6u32 {
            let s = state_sample(seq);
            log.write_record(RecordType::State, s.ts, &encode_state_sample(&s)).unwrap();
        }
        log.close();

        let segs = segments_in(tmp.path());
        assert_eq!(segs.len(), 3);
        // survivors carry ascending index suffixes
        let names: Vec<String> = segs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| n.starts_with("flight_")));
    }

    #[test]
    fn test_reader_skips_wrong_sized_payload() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("flight.bin");
        let mut log = RotatingBinaryLog::open(base.to_str().unwrap(), 0, 0).unwrap();

        // a CMD record with a STATE-sized payload must be skipped
        let s = state_sample(7);
        log.write_record(RecordType::Cmd, s.ts, &encode_state_sample(&s)).unwrap();
        let c = MotorCmdSample { ts: ts(1.0), seq: 8, motors: MotorCommands::ZERO };
        log.write_record(RecordType::Cmd, c.ts, &encode_cmd_sample(&c)).unwrap();
        log.close();

        let segs = segments_in(tmp.path());
        let records = read_records(&segs[0]).unwrap();
        assert_eq!(records, vec![LogRecord::Cmd(c)]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("junk.bin");
        fs::write(&path, [0u8; 32]).unwrap();
        assert!(read_records(&path).is_err());
    }
}
