use crate::config::Calibration;

/// PMD measurement type of ECG data frames.
pub const PMD_MEASUREMENT_ECG: u8 = 0x00;
/// PMD frame type carrying uncompressed 3-byte samples.
pub const PMD_FRAME_TYPE_RAW: u8 = 0x00;
/// Samples start after the measurement type, the 8-byte sensor timestamp and the frame type.
pub const ECG_SAMPLE_OFFSET: usize = 10;
pub const ECG_SAMPLE_BYTES: usize = 3;

const HR_FLAG_U16: u8 = 0x01;
const HR_FLAG_CONTACT_DETECTED: u8 = 0x02;
const HR_FLAG_CONTACT_SUPPORTED: u8 = 0x04;
const HR_FLAG_ENERGY_EXPENDED: u8 = 0x08;
const HR_FLAG_RR_PRESENT: u8 = 0x10;

/// Which characteristic a frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FrameKind {
    Ecg,
    HeartRate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcgFrame {
    /// Sensor clock in nanoseconds.
    pub sensor_timestamp: u64,
    pub samples: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct HeartRateReport {
    pub bpm: u16,
    pub rr_intervals_ms: Vec<u32>,
    /// `None` when the sensor does not report skin contact.
    pub sensor_contact: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Ecg(EcgFrame),
    HeartRate(HeartRateReport),
    /// Short, malformed or unsupported frame.
    Empty,
}

impl Decoded {
    pub fn samples(&self) -> &[i32] {
        match self {
            Decoded::Ecg(frame) => &frame.samples,
            _ => &[],
        }
    }
}

/// Turns transport frames into samples and heart-rate reports. Never fails: anything it
/// cannot make sense of decodes to [`Decoded::Empty`] or to the samples it could read.
#[derive(Debug, Clone, Default)]
pub struct PacketDecoder {
    calibration: Calibration,
}

impl PacketDecoder {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
    }

    pub fn decode(&self, kind: FrameKind, data: &[u8]) -> Decoded {
        match kind {
            FrameKind::Ecg => self.decode_ecg(data),
            FrameKind::HeartRate => decode_heart_rate(data),
        }
    }

    pub fn decode_ecg(&self, data: &[u8]) -> Decoded {
        if data.len() < ECG_SAMPLE_OFFSET {
            return Decoded::Empty;
        }
        if data[0] != PMD_MEASUREMENT_ECG || data[ECG_SAMPLE_OFFSET - 1] != PMD_FRAME_TYPE_RAW {
            return Decoded::Empty;
        }
        let sensor_timestamp = data[1..9].try_into().map(u64::from_le_bytes).unwrap_or_default();

        let samples = data[ECG_SAMPLE_OFFSET..]
            .chunks_exact(ECG_SAMPLE_BYTES)
            .map(|chunk| self.calibration.apply(sample_from_le_bytes([chunk[0], chunk[1], chunk[2]])))
            .collect();

        Decoded::Ecg(EcgFrame {
            sensor_timestamp,
            samples,
        })
    }
}

/// Signed 24-bit little-endian value; the top byte carries the sign.
pub fn sample_from_le_bytes(bytes: [u8; 3]) -> i32 {
    ((bytes[2] as i8 as i32) << 16) | ((bytes[1] as i32) << 8) | bytes[0] as i32
}

/// Inverse of [`sample_from_le_bytes`] for values in the 24-bit range.
pub fn sample_to_le_bytes(sample: i32) -> [u8; 3] {
    let bytes = sample.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

/// Builds a raw PMD ECG frame.
pub fn encode_ecg_frame(sensor_timestamp: u64, samples: &[i32]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ECG_SAMPLE_OFFSET + samples.len() * ECG_SAMPLE_BYTES);
    frame.push(PMD_MEASUREMENT_ECG);
    frame.extend_from_slice(&sensor_timestamp.to_le_bytes());
    frame.push(PMD_FRAME_TYPE_RAW);
    for &sample in samples {
        frame.extend_from_slice(&sample_to_le_bytes(sample));
    }
    frame
}

/// Heart Rate Measurement characteristic (0x2A37).
pub fn decode_heart_rate(data: &[u8]) -> Decoded {
    let Some(&flags) = data.first() else {
        return Decoded::Empty;
    };
    let mut index = 1;

    let bpm = if flags & HR_FLAG_U16 != 0 {
        match data.get(index..index + 2) {
            Some(bytes) => u16::from_le_bytes([bytes[0], bytes[1]]),
            None => return Decoded::Empty,
        }
    } else {
        match data.get(index) {
            Some(&value) => value as u16,
            None => return Decoded::Empty,
        }
    };
    index += if flags & HR_FLAG_U16 != 0 { 2 } else { 1 };

    if flags & HR_FLAG_ENERGY_EXPENDED != 0 {
        index += 2;
    }

    let mut rr_intervals_ms = Vec::new();
    if flags & HR_FLAG_RR_PRESENT != 0 {
        if let Some(rest) = data.get(index..) {
            rr_intervals_ms = rest
                .chunks_exact(2)
                .map(|chunk| rr_to_millis(u16::from_le_bytes([chunk[0], chunk[1]])))
                .collect();
        }
    }

    let sensor_contact = if flags & HR_FLAG_CONTACT_SUPPORTED != 0 {
        Some(flags & HR_FLAG_CONTACT_DETECTED != 0)
    } else {
        None
    };

    Decoded::HeartRate(HeartRateReport {
        bpm,
        rr_intervals_ms,
        sensor_contact,
    })
}

/// RR intervals come in 1/1024 s units.
pub fn rr_to_millis(raw: u16) -> u32 {
    (raw as f64 / 1024.0 * 1000.0).round() as u32
}

/// Builds a Heart Rate Measurement payload with an 8-bit rate.
pub fn encode_heart_rate(bpm: u8, rr_intervals_raw: &[u16]) -> Vec<u8> {
    let mut flags = HR_FLAG_CONTACT_SUPPORTED | HR_FLAG_CONTACT_DETECTED;
    if !rr_intervals_raw.is_empty() {
        flags |= HR_FLAG_RR_PRESENT;
    }
    let mut frame = vec![flags, bpm];
    for rr in rr_intervals_raw {
        frame.extend_from_slice(&rr.to_le_bytes());
    }
    frame
}
