//! Perceptual frequency-band to FFT-bin mapping.
//!
//! Band `b` is centred on `BAND_CENTERS_HZ[b]`, a fixed table of 256
//! geometrically spaced frequencies from 20 Hz to 20 kHz. The table does not
//! stretch with the column count: fewer columns use its first entries, and
//! the last column always extends to Nyquist. Band edges sit at the geometric
//! mean of adjacent centres and are snapped outward to whole bins, so two
//! neighbouring bands can both claim the bin that straddles their shared
//! edge. That overlap is part of the output format and must not be "fixed".

use serde::{Deserialize, Serialize};

use crate::config::MAX_COLUMNS;

/// Band centre frequencies, `round(20 * 1000^(i / 255))` Hz.
#[rustfmt::skip]
pub const BAND_CENTERS_HZ: [u32; MAX_COLUMNS] = [
    20, 21, 21, 22, 22, 23, 24, 24, 25, 26, 26, 27, 28, 28, 29, 30, 31, 32, 33, 33, 34, 35, 36, 37,
    38, 39, 40, 42, 43, 44, 45, 46, 48, 49, 50, 52, 53, 54, 56, 58, 59, 61, 62, 64, 66, 68, 70, 71,
    73, 75, 77, 80, 82, 84, 86, 89, 91, 94, 96, 99, 102, 104, 107, 110, 113, 116, 120, 123, 126,
    130, 133, 137, 141, 144, 148, 153, 157, 161, 165, 170, 175, 179, 184, 189, 195, 200, 205, 211,
    217, 223, 229, 235, 242, 248, 255, 262, 269, 277, 284, 292, 300, 309, 317, 326, 335, 344, 353,
    363, 373, 383, 394, 404, 416, 427, 439, 451, 463, 476, 489, 502, 516, 530, 545, 560, 575, 591,
    607, 624, 641, 659, 677, 695, 714, 734, 754, 775, 796, 818, 841, 864, 887, 912, 937, 962, 989,
    1016, 1044, 1073, 1102, 1132, 1163, 1195, 1228, 1262, 1297, 1332, 1369, 1406, 1445, 1485, 1525,
    1567, 1610, 1655, 1700, 1747, 1795, 1844, 1895, 1947, 2000, 2055, 2111, 2169, 2229, 2290, 2353,
    2418, 2484, 2552, 2622, 2694, 2768, 2844, 2922, 3003, 3085, 3170, 3257, 3346, 3438, 3533, 3630,
    3729, 3832, 3937, 4045, 4156, 4270, 4387, 4508, 4632, 4759, 4890, 5024, 5162, 5303, 5449, 5599,
    5752, 5910, 6073, 6239, 6411, 6587, 6768, 6954, 7144, 7341, 7542, 7749, 7962, 8181, 8405, 8636,
    8873, 9117, 9367, 9625, 9889, 10160, 10439, 10726, 11021, 11323, 11634, 11954, 12282, 12619,
    12966, 13322, 13687, 14063, 14450, 14846, 15254, 15673, 16103, 16545, 17000, 17467, 17946,
    18439, 18945, 19465, 20000,
];

/// Half-open bin ranges `[start[b], end[b])`, one per column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinMap {
    start: Vec<usize>,
    end: Vec<usize>,
}

impl BinMap {
    /// Builds the partition of bins `[0, fft_size / 2]` into `columns` bands.
    ///
    /// # Panics
    ///
    /// Panics if `fft_size < 2`, `sample_rate == 0` or `columns` is outside
    /// `1..=MAX_COLUMNS`.
    pub fn build(sample_rate: u32, fft_size: usize, columns: usize) -> Self {
        assert!(fft_size >= 2, "BinMap requires fft_size >= 2");
        assert!(columns > 0, "BinMap requires at least one column");
        assert!(columns <= MAX_COLUMNS, "BinMap supports at most {MAX_COLUMNS} columns");
        assert!(sample_rate > 0, "BinMap requires a sample rate");

        let half_bins = fft_size / 2;
        let bin_width = f64::from(sample_rate) / fft_size as f64;
        let nyquist = f64::from(sample_rate) / 2.0;
        let centers = band_centers(columns);
        let center = |b: usize| f64::from(centers[b]);

        let mut start = Vec::with_capacity(columns);
        let mut end = Vec::with_capacity(columns);

        for b in 0..columns {
            let lo_hz = if b == 0 {
                0.0
            } else {
                (center(b - 1) * center(b)).sqrt()
            };
            let hi_hz = if b == columns - 1 {
                nyquist - 1.0
            } else {
                (center(b) * center(b + 1)).sqrt()
            };

            let s = bin_floor(lo_hz / bin_width).min(half_bins - 1);
            let mut e = bin_ceil(hi_hz / bin_width).min(half_bins);
            if e <= s {
                e = s + 1;
            }

            start.push(s);
            end.push(e);
        }

        Self { start, end }
    }

    /// Returns the number of bands.
    pub fn columns(&self) -> usize {
        self.start.len()
    }

    /// Returns `true` if the map has no bands.
    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    /// Bin range of band `b`.
    pub fn range(&self, b: usize) -> std::ops::Range<usize> {
        self.start[b]..self.end[b]
    }

    /// Returns the first bin of every band.
    pub fn starts(&self) -> &[usize] {
        &self.start
    }

    /// Returns the exclusive end bin of every band.
    pub fn ends(&self) -> &[usize] {
        &self.end
    }

    /// Index of the first band whose range contains `bin`.
    pub fn band_of_bin(&self, bin: usize) -> Option<usize> {
        (0..self.columns()).find(|&b| self.range(b).contains(&bin))
    }
}

/// Returns the centre frequencies used by a `columns`-band map.
pub fn band_centers(columns: usize) -> &'static [u32] {
    &BAND_CENTERS_HZ[..columns.min(MAX_COLUMNS)]
}

fn bin_floor(position: f64) -> usize {
    if position <= 0.0 {
        0
    } else {
        position.floor() as usize
    }
}

fn bin_ceil(position: f64) -> usize {
    if position <= 0.0 {
        0
    } else {
        position.ceil() as usize
    }
}
