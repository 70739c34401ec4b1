/// Compressed-frame identity wrapped into an IEC 61937 burst, used by raw passthrough.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressedFormat {
    Ac3,
    Dts,
}

impl CompressedFormat {
    /// The `Pc` burst-info data-type field IEC 61937 assigns this format.
    fn data_type(self) -> u16 {
        match self {
            CompressedFormat::Ac3 => 0x01,
            CompressedFormat::Dts => 0x0B,
        }
    }
}

const PREAMBLE_PA: u16 = 0xF872;
const PREAMBLE_PB: u16 = 0x4E1F;

/// Wraps encoded frames into IEC 61937 bursts so they can be sent, undecoded, to a
/// sink capable of S/PDIF-style passthrough.
///
/// Each burst is the 4-word preamble (`Pa`, `Pb`, `Pc`, `Pd`) followed by the encoded
/// payload, zero-padded out to `burst_size_bytes` (the period size negotiated with the
/// sink) so that every burst occupies exactly one period's worth of bytes.
pub struct Packetizer {
    format: CompressedFormat,
    burst_size_bytes: usize,
}

impl Packetizer {
    pub fn new(format: CompressedFormat, burst_size_bytes: usize) -> Self {
        Self {
            format,
            burst_size_bytes,
        }
    }

    /// Wraps one encoded frame into a single zero-padded IEC 61937 burst.
    pub fn wrap(&self, encoded_frame: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.burst_size_bytes.max(8 + encoded_frame.len()));

        out.extend_from_slice(&PREAMBLE_PA.to_le_bytes());
        out.extend_from_slice(&PREAMBLE_PB.to_le_bytes());
        out.extend_from_slice(&self.format.data_type().to_le_bytes());
        let length_bits = (encoded_frame.len() as u16).saturating_mul(8);
        out.extend_from_slice(&length_bits.to_le_bytes());

        out.extend_from_slice(encoded_frame);

        if out.len() < self.burst_size_bytes {
            out.resize(self.burst_size_bytes, 0);
        }
        out
    }
}
