//! Sensor recording file format
//!
//! ```text
//! header (24 bytes)  magic "SENSEHAT" | version i8 | pad[7] | start time f64
//! record (136 bytes) time | pressure | p_temp | humidity | h_temp | accel x3 | gyro x3 | compass x3 | pose x3
//! ```
//!
//! All fields are native byte order. Readings use the hardware library's
//! units: hPa, degrees Celsius, %RH, g, degrees/second, microtesla and
//! radians. An invalid pressure or humidity reading is stored as NaN.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use sense_emu_registers::Vector3;
use tracing::debug;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::error::RecordingError;

pub const MAGIC: [u8; 8] = *b"SENSEHAT";
pub const VERSION: i8 = 1;

/// File header
#[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RecordingHeader {
    pub magic: [u8; 8],
    pub version: i8,
    pub _pad: [u8; 7],
    /// Seconds since the epoch when recording started
    pub timestamp: f64,
}

impl RecordingHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(timestamp: f64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            _pad: [0; 7],
            timestamp,
        }
    }
}

/// One sample of every sensor
#[derive(Debug, Clone, Copy, PartialEq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DataRecord {
    /// Seconds since the epoch
    pub timestamp: f64,
    /// hPa
    pub pressure: f64,
    pub ptemp: f64,
    /// %RH
    pub humidity: f64,
    pub htemp: f64,
    /// g
    pub accel: [f64; 3],
    /// Degrees/second
    pub gyro: [f64; 3],
    /// Microtesla
    pub compass: [f64; 3],
    /// Roll, pitch and yaw in radians
    pub orientation: [f64; 3],
}

impl DataRecord {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn accel(&self) -> Vector3 {
        Vector3::from(self.accel)
    }

    pub fn gyro(&self) -> Vector3 {
        Vector3::from(self.gyro)
    }

    pub fn compass(&self) -> Vector3 {
        Vector3::from(self.compass)
    }

    pub fn orientation(&self) -> Vector3 {
        Vector3::from(self.orientation)
    }
}

/// Writes a header followed by records
pub struct RecordingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl RecordingWriter<BufWriter<File>> {
    /// Create (or truncate) a recording file
    pub fn create(path: impl AsRef<Path>, timestamp: f64) -> Result<Self, RecordingError> {
        Self::new(BufWriter::new(File::create(path)?), timestamp)
    }
}

impl<W: Write> RecordingWriter<W> {
    pub fn new(mut inner: W, timestamp: f64) -> Result<Self, RecordingError> {
        inner.write_all(RecordingHeader::new(timestamp).as_bytes())?;
        Ok(Self { inner, count: 0 })
    }

    pub fn write_record(&mut self, record: &DataRecord) -> Result<(), RecordingError> {
        self.inner.write_all(record.as_bytes())?;
        self.count += 1;
        Ok(())
    }

    /// Records written so far
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn flush(&mut self) -> Result<(), RecordingError> {
        Ok(self.inner.flush()?)
    }

    pub fn into_inner(mut self) -> Result<W, RecordingError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Validates the header, then yields records
///
/// A trailing partial record fails with
/// [`RecordingError::IncompleteRecord`] and ends iteration.
pub struct RecordingReader<R: Read> {
    inner: R,
    header: RecordingHeader,
    done: bool,
}

impl RecordingReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> RecordingReader<R> {
    pub fn new(mut inner: R) -> Result<Self, RecordingError> {
        let mut header = RecordingHeader::new_zeroed();
        if read_full(&mut inner, header.as_mut_bytes())? < RecordingHeader::SIZE {
            return Err(RecordingError::BadMagic);
        }
        if header.magic != MAGIC {
            return Err(RecordingError::BadMagic);
        }
        if header.version != VERSION {
            return Err(RecordingError::UnsupportedVersion(header.version));
        }
        debug!("Recording started at {:.3}", header.timestamp);
        Ok(Self {
            inner,
            header,
            done: false,
        })
    }

    pub fn header(&self) -> &RecordingHeader {
        &self.header
    }

    /// The next record, or `None` at a clean end of file
    pub fn next_record(&mut self) -> Result<Option<DataRecord>, RecordingError> {
        if self.done {
            return Ok(None);
        }
        let mut record = DataRecord::new_zeroed();
        let n = read_full(&mut self.inner, record.as_mut_bytes())?;
        if n == DataRecord::SIZE {
            return Ok(Some(record));
        }
        self.done = true;
        if n == 0 {
            Ok(None)
        } else {
            Err(RecordingError::IncompleteRecord)
        }
    }
}

impl<R: Read> Iterator for RecordingReader<R> {
    type Item = Result<DataRecord, RecordingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.next_record().transpose();
        if matches!(item, Some(Err(_))) {
            self.done = true;
        }
        item
    }
}

/// Read until `buf` is full or the reader is exhausted
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
