use num_complex::Complex;
use serde::Serialize;

use crate::error::{FrameError, Result};

/// One complex ADC sample: 16-bit in-phase and quadrature parts.
pub type Sample = Complex<i16>;

/// Bytes occupied by one complex sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 4;

/// Physical LVDS lanes between the sensor and the capture board.
const LVDS_LANES: usize = 4;

/// Dimensions of every cube in a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CubeShape {
    pub num_rx: usize,
    pub samples_per_chirp: usize,
    pub chirps_per_frame: usize,
}

impl CubeShape {
    /// Create a shape, rejecting empty dimensions.
    pub fn new(num_rx: usize, samples_per_chirp: usize, chirps_per_frame: usize) -> Result<Self> {
        if num_rx == 0 || samples_per_chirp == 0 || chirps_per_frame == 0 {
            return Err(FrameError::InvalidShape("every dimension must be non-zero"));
        }
        num_rx
            .checked_mul(samples_per_chirp)
            .and_then(|n| n.checked_mul(chirps_per_frame))
            .and_then(|n| n.checked_mul(BYTES_PER_SAMPLE))
            .ok_or(FrameError::InvalidShape("frame size overflows"))?;
        Ok(Self {
            num_rx,
            samples_per_chirp,
            chirps_per_frame,
        })
    }

    /// Complex samples per frame.
    pub fn num_samples(&self) -> usize {
        self.num_rx * self.samples_per_chirp * self.chirps_per_frame
    }

    /// Raw bytes per frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.num_samples() * BYTES_PER_SAMPLE
    }

    /// Storage offset of `[rx][sample][chirp]`, chirp innermost.
    fn offset(&self, rx: usize, sample: usize, chirp: usize) -> usize {
        (rx * self.samples_per_chirp + sample) * self.chirps_per_frame + chirp
    }
}

/// How complex samples are laid out across the four LVDS lanes.
///
/// Fixed once per session from the sensor's SDK generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleLayout {
    /// SDK 2.x: each group of eight words carries four real parts then four
    /// imaginary parts. The resulting stream is rx-fastest, then sample,
    /// then chirp.
    Interleaved,
    /// SDK 3.x: each group of four words is `[I0, I1, Q0, Q1]` for two
    /// consecutive samples. The resulting stream is sample-fastest, then rx,
    /// then chirp.
    NonInterleaved,
}

impl SampleLayout {
    /// Select the layout for an SDK major version.
    pub fn from_sdk_major(version: u32) -> Option<Self> {
        match version {
            2 => Some(Self::Interleaved),
            3 => Some(Self::NonInterleaved),
            _ => None,
        }
    }

    /// Complex samples carried by one lane group.
    fn group_samples(self) -> usize {
        match self {
            Self::Interleaved => LVDS_LANES,
            Self::NonInterleaved => 2,
        }
    }

    /// Check that whole lane groups tile a frame of `shape`.
    pub fn check_shape(self, shape: CubeShape) -> Result<()> {
        if shape.num_samples() % self.group_samples() != 0 {
            return Err(match self {
                Self::Interleaved => FrameError::InvalidShape(
                    "interleaved frames need a multiple of four complex samples",
                ),
                Self::NonInterleaved => FrameError::InvalidShape(
                    "non-interleaved frames need an even number of complex samples",
                ),
            });
        }
        Ok(())
    }

    /// Storage offset of the `position`-th sample in lane stream order.
    fn cube_offset(self, shape: CubeShape, position: usize) -> usize {
        let rx_count = shape.num_rx;
        let samples = shape.samples_per_chirp;
        let chirp = position / (rx_count * samples);
        let (rx, sample) = match self {
            Self::Interleaved => (position % rx_count, (position / rx_count) % samples),
            Self::NonInterleaved => ((position / samples) % rx_count, position % samples),
        };
        shape.offset(rx, sample, chirp)
    }
}

impl std::fmt::Display for SampleLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Interleaved => "interleaved",
            Self::NonInterleaved => "non-interleaved",
        })
    }
}

/// A decoded radar frame indexed `[rx][sample][chirp]`.
///
/// Immutable once built; shared with consumers behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleCube {
    shape: CubeShape,
    frame_index: u64,
    padded_bytes: usize,
    data: Vec<Sample>,
}

impl SampleCube {
    /// Build a cube by evaluating `f(rx, sample, chirp)` at every position.
    pub fn from_fn(shape: CubeShape, mut f: impl FnMut(usize, usize, usize) -> Sample) -> Self {
        let mut data = Vec::with_capacity(shape.num_samples());
        for rx in 0..shape.num_rx {
            for sample in 0..shape.samples_per_chirp {
                for chirp in 0..shape.chirps_per_frame {
                    data.push(f(rx, sample, chirp));
                }
            }
        }
        Self {
            shape,
            frame_index: 0,
            padded_bytes: 0,
            data,
        }
    }

    /// Attach capture metadata.
    pub fn with_metadata(mut self, frame_index: u64, padded_bytes: usize) -> Self {
        self.frame_index = frame_index;
        self.padded_bytes = padded_bytes;
        self
    }

    pub fn shape(&self) -> CubeShape {
        self.shape
    }

    /// Position of this frame in the capture session, counting from 0.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Zero bytes substituted for lost datagrams in this frame.
    pub fn padded_bytes(&self) -> usize {
        self.padded_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.padded_bytes == 0
    }

    /// Sample at `[rx][sample][chirp]`, or `None` if out of range.
    pub fn get(&self, rx: usize, sample: usize, chirp: usize) -> Option<Sample> {
        if rx >= self.shape.num_rx
            || sample >= self.shape.samples_per_chirp
            || chirp >= self.shape.chirps_per_frame
        {
            return None;
        }
        self.data.get(self.shape.offset(rx, sample, chirp)).copied()
    }

    /// All chirps of one `(rx, sample)` cell.
    pub fn chirps(&self, rx: usize, sample: usize) -> Option<&[Sample]> {
        if rx >= self.shape.num_rx || sample >= self.shape.samples_per_chirp {
            return None;
        }
        let start = self.shape.offset(rx, sample, 0);
        self.data.get(start..start + self.shape.chirps_per_frame)
    }

    /// Flat samples, chirp innermost, then sample, then rx.
    pub fn as_slice(&self) -> &[Sample] {
        &self.data
    }
}

/// Decode one raw frame into a cube.
///
/// `raw` must be exactly `shape.bytes_per_frame()` bytes of little-endian
/// `i16` words as captured from the LVDS lanes.
pub fn decode_cube(raw: &[u8], shape: CubeShape, layout: SampleLayout) -> Result<SampleCube> {
    if raw.len() != shape.bytes_per_frame() {
        return Err(FrameError::FrameSize {
            expected: shape.bytes_per_frame(),
            actual: raw.len(),
        });
    }
    layout.check_shape(shape)?;

    let mut data = vec![Sample::new(0, 0); shape.num_samples()];
    let group_samples = layout.group_samples();
    let word = |group: &[u8], i: usize| i16::from_le_bytes([group[2 * i], group[2 * i + 1]]);

    for (g, group) in raw
        .chunks_exact(group_samples * BYTES_PER_SAMPLE)
        .enumerate()
    {
        for k in 0..group_samples {
            let (re, im) = match layout {
                SampleLayout::Interleaved => (word(group, k), word(group, LVDS_LANES + k)),
                SampleLayout::NonInterleaved => (word(group, k), word(group, 2 + k)),
            };
            let position = g * group_samples + k;
            data[layout.cube_offset(shape, position)] = Sample::new(re, im);
        }
    }

    Ok(SampleCube {
        shape,
        frame_index: 0,
        padded_bytes: 0,
        data,
    })
}

/// Encode a cube into the raw lane format that [`decode_cube`] reads.
///
/// Used to synthesize capture-board traffic for replay and tests.
pub fn encode_cube(cube: &SampleCube, layout: SampleLayout) -> Result<Vec<u8>> {
    let shape = cube.shape;
    layout.check_shape(shape)?;

    let group_samples = layout.group_samples();
    let mut raw = vec![0u8; shape.bytes_per_frame()];
    for (g, group) in raw
        .chunks_exact_mut(group_samples * BYTES_PER_SAMPLE)
        .enumerate()
    {
        for k in 0..group_samples {
            let sample = cube.data[layout.cube_offset(shape, g * group_samples + k)];
            let (re_word, im_word) = match layout {
                SampleLayout::Interleaved => (k, LVDS_LANES + k),
                SampleLayout::NonInterleaved => (k, 2 + k),
            };
            group[2 * re_word..2 * re_word + 2].copy_from_slice(&sample.re.to_le_bytes());
            group[2 * im_word..2 * im_word + 2].copy_from_slice(&sample.im.to_le_bytes());
        }
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn marker(rx: usize, sample: usize, chirp: usize) -> Sample {
        let value = (rx * 10_000 + sample * 100 + chirp) as i32;
        Sample::new(value as i16, (value / 7) as i16 - 1)
    }

    fn words(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_layout_from_sdk_major() {
        assert_eq!(
            SampleLayout::from_sdk_major(2),
            Some(SampleLayout::Interleaved)
        );
        assert_eq!(
            SampleLayout::from_sdk_major(3),
            Some(SampleLayout::NonInterleaved)
        );
        assert_eq!(SampleLayout::from_sdk_major(1), None);
        assert_eq!(SampleLayout::from_sdk_major(4), None);
    }

    #[test]
    fn test_shape_rejects_zero_dimension() {
        assert!(matches!(
            CubeShape::new(4, 0, 16),
            Err(FrameError::InvalidShape(_))
        ));
        let shape = CubeShape::new(4, 256, 64).unwrap();
        assert_eq!(shape.bytes_per_frame(), 4 * 4 * 256 * 64);
    }

    #[test]
    fn test_interleaved_lane_groups() {
        // One chirp, one sample per rx: a single 8-word group.
        let shape = CubeShape::new(4, 1, 1).unwrap();
        let raw = words(&[1, 2, 3, 4, -1, -2, -3, -4]);
        let cube = decode_cube(&raw, shape, SampleLayout::Interleaved).unwrap();
        for rx in 0..4 {
            let expected = Sample::new(rx as i16 + 1, -(rx as i16) - 1);
            assert_eq!(cube.get(rx, 0, 0), Some(expected));
        }
    }

    #[test]
    fn test_interleaved_sample_then_chirp_order() {
        let shape = CubeShape::new(4, 2, 2).unwrap();
        let mut values = Vec::new();
        // Groups arrive sample-fastest within a chirp.
        for chirp in 0..2i16 {
            for sample in 0..2i16 {
                let base = chirp * 10 + sample;
                values.extend([base, base, base, base, 0, 0, 0, 0]);
            }
        }
        let cube = decode_cube(&words(&values), shape, SampleLayout::Interleaved).unwrap();
        assert_eq!(cube.get(2, 1, 0), Some(Sample::new(1, 0)));
        assert_eq!(cube.get(0, 0, 1), Some(Sample::new(10, 0)));
        assert_eq!(cube.get(3, 1, 1), Some(Sample::new(11, 0)));
    }

    #[test]
    fn test_non_interleaved_word_pairs() {
        // Two rx, two samples, one chirp: rx0 then rx1, samples innermost.
        let shape = CubeShape::new(2, 2, 1).unwrap();
        let raw = words(&[10, 11, 20, 21, 30, 31, 40, 41]);
        let cube = decode_cube(&raw, shape, SampleLayout::NonInterleaved).unwrap();
        assert_eq!(cube.get(0, 0, 0), Some(Sample::new(10, 20)));
        assert_eq!(cube.get(0, 1, 0), Some(Sample::new(11, 21)));
        assert_eq!(cube.get(1, 0, 0), Some(Sample::new(30, 40)));
        assert_eq!(cube.get(1, 1, 0), Some(Sample::new(31, 41)));
    }

    #[test]
    fn test_non_interleaved_markers_full_size() {
        let shape = CubeShape::new(4, 128, 64).unwrap();
        let cube = SampleCube::from_fn(shape, marker);
        let raw = encode_cube(&cube, SampleLayout::NonInterleaved).unwrap();
        assert_eq!(raw.len(), shape.bytes_per_frame());

        let decoded = decode_cube(&raw, shape, SampleLayout::NonInterleaved).unwrap();
        for rx in 0..4 {
            for sample in 0..128 {
                for chirp in 0..64 {
                    assert_eq!(decoded.get(rx, sample, chirp), Some(marker(rx, sample, chirp)));
                }
            }
        }
    }

    #[test]
    fn test_decode_rejects_wrong_size() {
        let shape = CubeShape::new(4, 4, 4).unwrap();
        let result = decode_cube(&[0u8; 12], shape, SampleLayout::Interleaved);
        assert!(matches!(
            result,
            Err(FrameError::FrameSize {
                expected: 256,
                actual: 12
            })
        ));
    }

    #[test]
    fn test_odd_sample_count_rejected_by_layouts() {
        let shape = CubeShape::new(1, 3, 1).unwrap();
        assert!(SampleLayout::NonInterleaved.check_shape(shape).is_err());
        let shape = CubeShape::new(1, 2, 1).unwrap();
        assert!(SampleLayout::NonInterleaved.check_shape(shape).is_ok());
        assert!(SampleLayout::Interleaved.check_shape(shape).is_err());
    }

    #[test]
    fn test_chirps_accessor() {
        let shape = CubeShape::new(2, 2, 4).unwrap();
        let cube = SampleCube::from_fn(shape, marker);
        let chirps = cube.chirps(1, 1).unwrap();
        assert_eq!(chirps.len(), 4);
        assert_eq!(chirps[3], marker(1, 1, 3));
        assert!(cube.chirps(2, 0).is_none());
        assert!(cube.get(0, 0, 4).is_none());
    }

    fn shape_strategy() -> impl Strategy<Value = CubeShape> {
        (1usize..=4, 1usize..=16, 1usize..=8)
            .prop_map(|(rx, s, c)| CubeShape::new(rx, s * 2, c * 2).unwrap())
    }

    proptest! {
        #[test]
        fn prop_layouts_invert_encode(shape in shape_strategy(), seed in any::<i16>()) {
            let cube = SampleCube::from_fn(shape, |rx, sample, chirp| {
                let v = (rx * 997 + sample * 31 + chirp) as i16;
                Sample::new(v.wrapping_add(seed), v.wrapping_sub(seed))
            });
            for layout in [SampleLayout::Interleaved, SampleLayout::NonInterleaved] {
                let raw = encode_cube(&cube, layout).unwrap();
                let decoded = decode_cube(&raw, shape, layout).unwrap();
                prop_assert_eq!(&decoded, &cube);
            }
        }
    }
}
