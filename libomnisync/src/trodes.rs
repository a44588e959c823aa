//! Reader for DIO channel files exported from Trodes recordings.
//!
//! An exported file starts with a text header:
//!
//! ```text
//! <Start settings>
//! Description: Digital input channel
//! Byte_order: little endian
//! Clock rate: 30000
//! Fields: <time uint32><state uint8>
//! <End settings>
//! ```
//!
//! followed by packed little-endian records laid out as described by `Fields`. Each record
//! is a state change of the input line.
use std::collections::BTreeMap;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tracing::debug;

use crate::dio::{DigitalPulseTrace, DigitalTraceSource, DioSample};
use crate::error::{Result, Stage, SyncError};
use crate::layout::DataLayout;
use crate::session::SessionId;

const HEADER_START: &str = "<Start settings>";
const HEADER_END: &str = "<End settings>";

static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s*(\w+)\s+(\w+)\s*>").expect("field pattern is valid"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl FieldType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "uint8" => FieldType::U8,
            "uint16" => FieldType::U16,
            "uint32" => FieldType::U32,
            "uint64" => FieldType::U64,
            "int8" => FieldType::I8,
            "int16" => FieldType::I16,
            "int32" => FieldType::I32,
            "int64" => FieldType::I64,
            _ => return None,
        })
    }

    fn width(self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 => 4,
            FieldType::U64 | FieldType::I64 => 8,
        }
    }

    /// Little-endian decode. Negative values are clamped to zero.
    fn read(self, bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        let raw = u64::from_le_bytes(buf);
        let signed = |bits: u32| {
            let shift = 64 - bits;
            (((raw << shift) as i64) >> shift).max(0) as u64
        };
        match self {
            FieldType::U8 | FieldType::U16 | FieldType::U32 | FieldType::U64 => raw,
            FieldType::I8 => signed(8),
            FieldType::I16 => signed(16),
            FieldType::I32 => signed(32),
            FieldType::I64 => signed(64),
        }
    }
}

#[derive(Clone, Debug)]
struct Field {
    name: String,
    kind: FieldType,
    offset: usize,
}

#[derive(Clone, Debug)]
pub struct DioHeader {
    pub settings: BTreeMap<String, String>,
    fields: Vec<Field>,
    record_len: usize,
}

impl DioHeader {
    pub fn clock_rate(&self) -> Option<f64> {
        self.settings
            .get("Clock rate")
            .and_then(|rate| rate.trim().parse::<f64>().ok())
            .filter(|rate| *rate > 0.0)
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Splits an exported file into its parsed header and the binary body.
pub fn parse_header<'a>(path: &Utf8Path, bytes: &'a [u8]) -> Result<(DioHeader, &'a [u8])> {
    let malformed = |reason: &str| SyncError::malformed(Stage::Decode, path, reason);

    if !bytes.starts_with(HEADER_START.as_bytes()) {
        return Err(malformed("missing settings header"));
    }
    let end = bytes
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END.as_bytes())
        .ok_or_else(|| malformed("unterminated settings header"))?;
    let mut body_start = end + HEADER_END.len();
    if bytes.get(body_start) == Some(&b'\r') {
        body_start += 1;
    }
    if bytes.get(body_start) == Some(&b'\n') {
        body_start += 1;
    }

    let text = std::str::from_utf8(&bytes[HEADER_START.len()..end])
        .map_err(|_| malformed("settings header is not valid UTF-8"))?;
    let settings = text
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect::<BTreeMap<_, _>>();

    let layout = settings
        .get("Fields")
        .ok_or_else(|| malformed("header has no Fields entry"))?;
    let mut fields = vec![];
    let mut offset = 0;
    for caps in FIELD_RE.captures_iter(layout) {
        let kind = FieldType::parse(&caps[2])
            .ok_or_else(|| malformed(&format!("unsupported field type {}", &caps[2])))?;
        fields.push(Field {
            name: caps[1].to_string(),
            kind,
            offset,
        });
        offset += kind.width();
    }

    let header = DioHeader {
        settings,
        fields,
        record_len: offset,
    };
    if header.field("time").is_none() || header.field("state").is_none() {
        return Err(malformed("Fields must contain time and state"));
    }
    Ok((header, &bytes[body_start..]))
}

/// Decodes one exported DIO file into a trace.
///
/// `fallback_rate_hz` is used when the header carries no clock rate.
pub fn read_dio_file(path: &Utf8Path, fallback_rate_hz: Option<f64>) -> Result<DigitalPulseTrace> {
    let bytes = fs::read(path).map_err(|e| SyncError::io(path, e))?;
    let (header, body) = parse_header(path, &bytes)?;

    if body.len() % header.record_len != 0 {
        return Err(SyncError::malformed(
            Stage::Decode,
            path,
            format!(
                "body of {} bytes is not a whole number of {} byte records",
                body.len(),
                header.record_len
            ),
        ));
    }
    let rate = header
        .clock_rate()
        .or(fallback_rate_hz)
        .ok_or_else(|| SyncError::malformed(Stage::Decode, path, "no clock rate in header"))?;

    // both fields are checked by parse_header
    let (Some(time), Some(state)) = (header.field("time"), header.field("state")) else {
        return Err(SyncError::malformed(
            Stage::Decode,
            path,
            "Fields must contain time and state",
        ));
    };
    let samples = body
        .chunks_exact(header.record_len)
        .map(|record| DioSample {
            sample_index: time
                .kind
                .read(&record[time.offset..time.offset + time.kind.width()]),
            state: state
                .kind
                .read(&record[state.offset..state.offset + state.kind.width()])
                != 0,
        })
        .collect::<Vec<_>>();
    debug!("Decoded {} DIO records from {path}", samples.len());
    DigitalPulseTrace::new(samples, rate)
}

/// Finds the exported file of `channel` inside `dio_dir`.
///
/// Files are named `<recording>.dio_Din<N>.dat`; hardware-prefixed variants such as
/// `dio_ECU_Din<N>.dat` are accepted as well.
pub fn find_channel_file(dio_dir: &Utf8Path, channel: u32) -> Result<Option<Utf8PathBuf>> {
    let entries = match dio_dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::io(dio_dir, e)),
    };
    let suffix = format!("Din{channel}.dat");
    let mut matches = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.file_name().is_some_and(|name| {
                name.strip_suffix(&suffix)
                    .is_some_and(|stem| stem.ends_with('_') || stem.ends_with('.'))
            })
        })
        .collect::<Vec<_>>();
    matches.sort();
    if matches.len() > 1 {
        debug!("Several files for Din{channel} in {dio_dir}, using {}", matches[0]);
    }
    Ok(matches.into_iter().next())
}

/// [`DigitalTraceSource`] over the exported DIO directory of each session.
#[derive(Clone, Debug)]
pub struct TrodesDioSource {
    layout: DataLayout,
}

impl TrodesDioSource {
    #[must_use]
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }
}

impl DigitalTraceSource for TrodesDioSource {
    fn digital_trace(&self, session: &SessionId, channel: u32) -> Result<DigitalPulseTrace> {
        let dio_dir = self.layout.dio_dir(session);
        let path = find_channel_file(&dio_dir, channel)?
            .ok_or(SyncError::ChannelNotFound { channel })?;
        read_dio_file(&path, None)
    }

    fn sampling_rate_hz(&self, session: &SessionId) -> Result<f64> {
        let dio_dir = self.layout.dio_dir(session);
        let no_export = || SyncError::NoDioExport {
            session: session.clone(),
        };
        let entries = match dio_dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(no_export()),
            Err(e) => return Err(SyncError::io(&dio_dir, e)),
        };
        let mut files = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.into_path())
            .filter(|path| path.extension() == Some("dat"))
            .collect::<Vec<_>>();
        files.sort();
        let first = files.first().ok_or_else(no_export)?;
        let bytes = fs::read(first).map_err(|e| SyncError::io(first, e))?;
        let (header, _) = parse_header(first, &bytes)?;
        header
            .clock_rate()
            .ok_or_else(|| SyncError::malformed(Stage::Decode, first, "no clock rate in header"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(rate: Option<u32>, fields: &str, records: &[u8]) -> Vec<u8> {
        let mut header = format!("{HEADER_START}\nDescription: test\nByte_order: little endian\n");
        if let Some(rate) = rate {
            header.push_str(&format!("Clock rate: {rate}\n"));
        }
        header.push_str(&format!("Fields: {fields}\n{HEADER_END}\n"));
        let mut bytes = header.into_bytes();
        bytes.extend_from_slice(records);
        bytes
    }

    fn records(samples: &[(u32, u8)]) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|(t, s)| t.to_le_bytes().into_iter().chain([*s]))
            .collect()
    }

    #[test]
    fn header_fields_and_clock_rate() {
        let bytes = encode(Some(30_000), "<time uint32><state uint8>", &[]);
        let (header, body) = parse_header(Utf8Path::new("x.dat"), &bytes).unwrap();
        assert_eq!(header.clock_rate(), Some(30_000.0));
        assert_eq!(header.record_len, 5);
        assert!(body.is_empty());
        assert_eq!(header.settings["Byte_order"], "little endian");
    }

    #[test]
    fn decodes_state_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("s.dio_Din2.dat")).unwrap();
        let body = records(&[(10, 0), (300, 1), (450, 0), (30_300, 1)]);
        fs::write(&path, encode(Some(30_000), "<time uint32><state uint8>", &body)).unwrap();

        let trace = read_dio_file(&path, None).unwrap();
        assert_eq!(trace.len(), 4);
        assert_eq!(trace.sampling_rate_hz(), 30_000.0);
        assert_eq!(
            trace.rising_edge_indices().collect::<Vec<_>>(),
            vec![300, 30_300]
        );
    }

    #[test]
    fn truncated_body_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("s.dio_Din1.dat")).unwrap();
        let mut body = records(&[(1, 0), (2, 1)]);
        body.pop();
        fs::write(&path, encode(Some(1000), "<time uint32><state uint8>", &body)).unwrap();
        assert!(matches!(
            read_dio_file(&path, None),
            Err(SyncError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_clock_rate_uses_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("s.dio_Din1.dat")).unwrap();
        fs::write(
            &path,
            encode(None, "<time uint32><state uint8>", &records(&[(1, 0)])),
        )
        .unwrap();
        assert!(read_dio_file(&path, None).is_err());
        assert_eq!(
            read_dio_file(&path, Some(1000.0)).unwrap().sampling_rate_hz(),
            1000.0
        );
        assert!(matches!(
            read_dio_file(&path, Some(0.0)),
            Err(SyncError::InvalidSamplingRate { .. })
        ));
    }

    #[test]
    fn wide_and_signed_fields() {
        let bytes = encode(Some(1000), "<time int64><state uint16>", &{
            let mut body = (-5i64).to_le_bytes().to_vec();
            body.extend_from_slice(&1u16.to_le_bytes());
            body
        });
        let (header, body) = parse_header(Utf8Path::new("x.dat"), &bytes).unwrap();
        let time = header.field("time").unwrap();
        assert_eq!(time.kind.read(&body[0..8]), 0);
        assert_eq!(header.record_len, 10);
    }

    #[test]
    fn channel_file_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        for name in ["rec.dio_Din1.dat", "rec.dio_Din11.dat", "rec.dio_Dout1.dat"] {
            fs::write(dir.join(name), b"").unwrap();
        }
        assert_eq!(
            find_channel_file(&dir, 1).unwrap(),
            Some(dir.join("rec.dio_Din1.dat"))
        );
        assert_eq!(
            find_channel_file(&dir, 11).unwrap(),
            Some(dir.join("rec.dio_Din11.dat"))
        );
        assert_eq!(find_channel_file(&dir, 3).unwrap(), None);
        assert_eq!(find_channel_file(&dir.join("missing"), 1).unwrap(), None);
    }
}
