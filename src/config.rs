use std::fmt;
use std::str::FromStr;

/// Sample rate of the Polar H10 ECG stream.
pub const DEFAULT_SAMPLE_RATE: u32 = 130;

/// Per-sample smoothing applied between decoding and buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, uniffi::Enum)]
pub enum FilterMode {
    #[default]
    None,
    Butterworth2,
    Butterworth4,
    MovingAverage,
    SavitzkyGolay,
    FirLowPass,
}

impl FilterMode {
    pub const ALL: [FilterMode; 6] = [
        FilterMode::None,
        FilterMode::Butterworth2,
        FilterMode::Butterworth4,
        FilterMode::MovingAverage,
        FilterMode::SavitzkyGolay,
        FilterMode::FirLowPass,
    ];

    /// Identifier written to snapshot files.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::None => "none",
            FilterMode::Butterworth2 => "butter2",
            FilterMode::Butterworth4 => "butter4",
            FilterMode::MovingAverage => "movavg",
            FilterMode::SavitzkyGolay => "savitzky",
            FilterMode::FirLowPass => "fir35",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FilterMode::None => "Filter: none (raw)",
            FilterMode::Butterworth2 => "Filter: Butterworth 2nd order (0.5-40 Hz)",
            FilterMode::Butterworth4 => "Filter: Butterworth 4th order (0.5-40 Hz)",
            FilterMode::MovingAverage => "Filter: moving average (5 samples)",
            FilterMode::SavitzkyGolay => "Filter: Savitzky-Golay (11 pts, order 3)",
            FilterMode::FirLowPass => "Filter: FIR low-pass (19 taps)",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFilterMode(pub String);

impl fmt::Display for UnknownFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown filter mode '{}'", self.0)
    }
}

impl std::error::Error for UnknownFilterMode {}

impl FromStr for FilterMode {
    type Err = UnknownFilterMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(FilterMode::None),
            "butter2" => Ok(FilterMode::Butterworth2),
            "butter4" => Ok(FilterMode::Butterworth4),
            "movavg" => Ok(FilterMode::MovingAverage),
            "savitzky" => Ok(FilterMode::SavitzkyGolay),
            "fir" | "fir35" => Ok(FilterMode::FirLowPass),
            other => Err(UnknownFilterMode(other.to_string())),
        }
    }
}

/// Conversion from the sensor's 24-bit counts to the sample values the pipeline works on.
///
/// The right factor depends on firmware and hardware revision, so it is injected
/// rather than baked into the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Default, uniffi::Enum)]
pub enum Calibration {
    /// Counts are already microvolts.
    #[default]
    Raw,
    /// Full 24-bit value times a fixed factor.
    Scaled { uv_per_count: f64 },
    /// Only the low 14 bits carry the reading (sign bit 13), then scaled.
    Masked14 { uv_per_count: f64 },
}

impl Calibration {
    pub fn apply(&self, counts: i32) -> i32 {
        match *self {
            Calibration::Raw => counts,
            Calibration::Scaled { uv_per_count } => (counts as f64 * uv_per_count).round() as i32,
            Calibration::Masked14 { uv_per_count } => {
                let masked = ((counts & 0x3FFF) << 18) >> 18;
                (masked as f64 * uv_per_count).round() as i32
            }
        }
    }
}

/// Display and analysis settings. May change between packets.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct MonitorConfig {
    /// Seconds covered by one row of the sweep.
    pub sweep_seconds: u32,
    pub rows: u32,
    pub uv_per_div: u32,
    pub filter_mode: FilterMode,
    /// Trailing window for BPM averaging; 0 averages the whole validated history.
    pub bpm_average_seconds: u32,
    pub sample_rate: u32,
    pub calibration: Calibration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_seconds: 10,
            rows: 5,
            uv_per_div: 1000,
            filter_mode: FilterMode::None,
            bpm_average_seconds: 5,
            sample_rate: DEFAULT_SAMPLE_RATE,
            calibration: Calibration::Raw,
        }
    }
}

impl MonitorConfig {
    /// Clamps every field into the range the display controls offer.
    pub fn sanitized(mut self) -> Self {
        self.sweep_seconds = self.sweep_seconds.clamp(1, 30);
        self.rows = self.rows.clamp(1, 12);
        self.uv_per_div = self.uv_per_div.clamp(100, 5000);
        self.bpm_average_seconds = self.bpm_average_seconds.min(60);
        if self.sample_rate == 0 {
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        self
    }

    /// Samples in one complete sweep, which is also the rolling buffer capacity.
    pub fn samples_per_sweep(&self) -> usize {
        self.sweep_seconds as usize * self.rows as usize * self.sample_rate as usize
    }

    /// Changes that invalidate the sweep currently on screen.
    pub fn affects_display(&self, other: &MonitorConfig) -> bool {
        self.sweep_seconds != other.sweep_seconds
            || self.rows != other.rows
            || self.uv_per_div != other.uv_per_div
            || self.filter_mode != other.filter_mode
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct RecordingConfig {
    pub save_ecg: bool,
    pub save_bpm: bool,
    pub bpm_log_interval_seconds: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            save_ecg: true,
            save_bpm: true,
            bpm_log_interval_seconds: 5,
        }
    }
}

impl RecordingConfig {
    /// Turning ECG saving off while BPM logging is off turns BPM logging back on.
    pub fn with_save_ecg(mut self, enabled: bool) -> Self {
        self.save_ecg = enabled;
        if !self.save_ecg && !self.save_bpm {
            self.save_bpm = true;
        }
        self
    }

    /// Turning BPM logging off while ECG saving is off turns ECG saving back on.
    pub fn with_save_bpm(mut self, enabled: bool) -> Self {
        self.save_bpm = enabled;
        if !self.save_bpm && !self.save_ecg {
            self.save_ecg = true;
        }
        self
    }

    pub fn normalized(mut self) -> Self {
        if !self.save_ecg && !self.save_bpm {
            self.save_ecg = true;
        }
        self.bpm_log_interval_seconds = self.bpm_log_interval_seconds.max(1);
        self
    }
}
