//! DIO channels stored as one-bit variables in VCD, FST or GHW waveform files.
//!
//! A channel `N` is the first variable named `Din<N>` in the hierarchy. Times in the
//! file are taken as sample indices, so the sampling rate is the inverse of the
//! file's timescale.
use camino::Utf8Path;
use tracing::{debug, info};
use wellen::{Hierarchy, LoadOptions, TimescaleUnit, viewers};

use crate::dio::{DigitalPulseTrace, DigitalTraceSource, DioSample};
use crate::error::{Result, Stage, SyncError};
use crate::layout::DataLayout;
use crate::session::SessionId;

const LOAD_OPTIONS: LoadOptions = LoadOptions {
    multi_thread: false,
    remove_scopes_with_empty_name: true,
};

fn channel_name(channel: u32) -> String {
    format!("Din{channel}")
}

/// Samples per second implied by the timescale of `hierarchy`.
fn sampling_rate(path: &Utf8Path, hierarchy: &Hierarchy) -> Result<f64> {
    let malformed = |reason: &str| SyncError::malformed(Stage::Decode, path, reason);
    let timescale = hierarchy
        .timescale()
        .ok_or_else(|| malformed("waveform has no timescale"))?;
    let exponent = match timescale.unit {
        TimescaleUnit::ZeptoSeconds => -21,
        TimescaleUnit::AttoSeconds => -18,
        TimescaleUnit::FemtoSeconds => -15,
        TimescaleUnit::PicoSeconds => -12,
        TimescaleUnit::NanoSeconds => -9,
        TimescaleUnit::MicroSeconds => -6,
        TimescaleUnit::MilliSeconds => -3,
        TimescaleUnit::Seconds => 0,
        TimescaleUnit::Unknown => {
            return Err(malformed("waveform timescale unit is unknown"));
        }
    };
    let period = f64::from(timescale.factor) * 10f64.powi(exponent);
    if period <= 0.0 {
        return Err(malformed("waveform timescale is zero"));
    }
    Ok(1.0 / period)
}

/// Reads channel `channel` from a waveform file. `Ok(None)` when the file has no such variable.
pub fn read_waveform_channel(path: &Utf8Path, channel: u32) -> Result<Option<DigitalPulseTrace>> {
    let header = viewers::read_header_from_file(path.as_std_path(), &LOAD_OPTIONS)
        .map_err(|e| SyncError::malformed(Stage::Decode, path, format!("{e:?}")))?;
    let hierarchy = header.hierarchy;
    let rate = sampling_rate(path, &hierarchy)?;

    let name = channel_name(channel);
    let Some(signal_ref) = hierarchy
        .iter_vars()
        .find(|var| var.name(&hierarchy) == name)
        .map(|var| var.signal_ref())
    else {
        return Ok(None);
    };

    let body = viewers::read_body(header.body, &hierarchy, None)
        .map_err(|e| SyncError::malformed(Stage::Decode, path, format!("{e:?}")))?;
    let mut source = body.source;
    let time_table = body.time_table;
    let loaded = source.load_signals(&[signal_ref], &hierarchy, false);
    let Some((_, signal)) = loaded.into_iter().next() else {
        return Ok(None);
    };

    let mut samples: Vec<DioSample> = vec![];
    for (time_index, value) in signal.iter_changes() {
        let Some(&sample_index) = time_table.get(time_index as usize) else {
            return Err(SyncError::malformed(
                Stage::Decode,
                path,
                format!("{name} refers to missing time index {time_index}"),
            ));
        };
        let state = value
            .to_bit_string()
            .is_some_and(|bits| bits.chars().any(|c| c == '1'));
        // a repeated time keeps the last value written at that time
        match samples.last_mut() {
            Some(last) if last.sample_index == sample_index => last.state = state,
            _ => samples.push(DioSample {
                sample_index,
                state,
            }),
        }
    }
    debug!("Read {} changes of {name} from {path}", samples.len());
    DigitalPulseTrace::new(samples, rate).map(Some)
}

/// [`DigitalTraceSource`] over `<session>_dio.{vcd,fst,ghw}` files.
#[derive(Clone, Debug)]
pub struct WaveformDioSource {
    layout: DataLayout,
}

impl WaveformDioSource {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }
}

impl DigitalTraceSource for WaveformDioSource {
    fn digital_trace(&self, session: &SessionId, channel: u32) -> Result<DigitalPulseTrace> {
        let Some(path) = self.layout.waveform_path(session) else {
            return Err(SyncError::ChannelNotFound { channel });
        };
        info!(%session, "Reading {} from {path}", channel_name(channel));
        read_waveform_channel(&path, channel)?.ok_or(SyncError::ChannelNotFound { channel })
    }

    fn sampling_rate_hz(&self, session: &SessionId) -> Result<f64> {
        let path = self
            .layout
            .waveform_path(session)
            .ok_or_else(|| SyncError::NoDioExport {
                session: session.clone(),
            })?;
        let header = viewers::read_header_from_file(path.as_std_path(), &LOAD_OPTIONS)
            .map_err(|e| SyncError::malformed(Stage::Decode, &path, format!("{e:?}")))?;
        sampling_rate(&path, &header.hierarchy)
    }
}
