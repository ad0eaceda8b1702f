use std::fmt;

use crate::config::PFD_VAL_UP_LIMIT;

/// Upper bounds of the deviation bands, as fractions of the overall average.
/// Anything beyond the last bound lands in the residual band
const BAND_LIMITS: [f64; 4] = [0.10, 0.25, 0.50, 0.75];

const BAND_LABELS: [&str; 5] = ["  0-10%", " 10-25%", " 25-50%", " 50-75%", "75-100%"];

/// Values that deviate from the overall average by a similar amount
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Band {
    pub count: u64,
    pub avg: f64,
    /// Mean absolute difference from this band's own average
    pub abs_dev: f64,
    /// Root-mean-square difference from this band's own average
    pub std_dev: f64,
}

/// Statistical summary of one sequence of measurements
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub num_vals: u64,
    pub avg: f64,
    pub bands: [Band; 5],
    pub min_val: f64,
    pub min_idx: u64,
    pub max_val: f64,
    pub max_idx: u64,
    pub abs_dev: f64,
    pub std_dev: f64,
}

/// A reading outside `[0, PFD_VAL_UP_LIMIT]` is a glitch and counts as zero
#[inline]
fn sanitize(val: i64) -> f64 {
    if (0..=PFD_VAL_UP_LIMIT).contains(&val) {
        val as f64
    } else {
        0.0
    }
}

fn band_of(ad: f64, avg: f64) -> usize {
    BAND_LIMITS
        .iter()
        .position(|limit| ad <= limit * avg)
        .unwrap_or(BAND_LIMITS.len())
}

/// Mean that reports an empty set as zero rather than NaN
fn mean(sum: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Summarize a sequence of raw cycle measurements
///
/// Glitches are clamped to zero but still counted. Values are then split into
/// five bands by their distance from the overall average. Every band gets its
/// own average, and a second pass measures each band's deviation around that
/// band average rather than around the global one
pub fn summarize(vals: &[i64]) -> Summary {
    let num_vals = vals.len() as u64;
    if num_vals == 0 {
        return Summary::default();
    }

    let clamped: Vec<f64> = vals.iter().map(|&v| sanitize(v)).collect();
    let avg = clamped.iter().sum::<f64>() / num_vals as f64;

    let mut min_val = f64::MAX;
    let mut max_val = f64::MIN;
    let (mut min_idx, mut max_idx) = (0u64, 0u64);

    let mut band_sums = [0f64; 5];
    let mut bands = [Band::default(); 5];
    let mut sum_adev = 0f64;
    let mut sum_stdev = 0f64;

    for (i, &val) in clamped.iter().enumerate() {
        if val > max_val {
            max_val = val;
            max_idx = i as u64;
        }
        if val < min_val {
            min_val = val;
            min_idx = i as u64;
        }

        let ad = (val - avg).abs();
        let band = band_of(ad, avg);
        bands[band].count += 1;
        band_sums[band] += val;

        sum_adev += ad;
        sum_stdev += ad * ad;
    }

    for (band, sum) in bands.iter_mut().zip(band_sums) {
        band.avg = mean(sum, band.count);
    }

    // Pass again, this time around each band's own center
    let mut band_adev = [0f64; 5];
    let mut band_stdev = [0f64; 5];
    for &val in &clamped {
        let band = band_of((val - avg).abs(), avg);
        let ad = (val - bands[band].avg).abs();
        band_adev[band] += ad;
        band_stdev[band] += ad * ad;
    }

    for (i, band) in bands.iter_mut().enumerate() {
        band.abs_dev = mean(band_adev[i], band.count);
        band.std_dev = mean(band_stdev[i], band.count).sqrt();
    }

    Summary {
        num_vals,
        avg,
        bands,
        min_val,
        min_idx,
        max_val,
        max_idx,
        abs_dev: sum_adev / num_vals as f64,
        std_dev: (sum_stdev / num_vals as f64).sqrt(),
    }
}

fn percent_of(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        100.0 * (1.0 - (whole - part) / whole)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n ---- statistics:")?;
        writeln!(
            f,
            "    avg : {:<10.1} abs dev : {:<10.1} std dev : {:<10.1} num     : {}",
            self.avg, self.abs_dev, self.std_dev, self.num_vals
        )?;
        writeln!(
            f,
            "    min : {:<10.1} (element: {:6})    max     : {:<10.1} (element: {:6})",
            self.min_val, self.min_idx, self.max_val, self.max_idx
        )?;

        for (band, label) in self.bands.iter().zip(BAND_LABELS) {
            let share = if self.num_vals == 0 {
                0.0
            } else {
                100.0 * band.count as f64 / self.num_vals as f64
            };
            writeln!(
                f,
                "{} : {:<10} ( {:5.1}%  |  avg:  {:6.1}  |  abs dev: {:6.1}  |  std dev: {:6.1} = {:5.1}% )",
                label,
                band.count,
                share,
                band.avg,
                band.abs_dev,
                band.std_dev,
                percent_of(band.std_dev, band.avg)
            )?;
        }

        Ok(())
    }
}
