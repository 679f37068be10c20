//! Per-channel color statistics of an interleaved RGB8 frame.

/// Count of samples at each of the 256 levels of one 8-bit channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHistogram {
    counts: [u64; 256],
}

impl Default for ChannelHistogram {
    fn default() -> Self {
        Self { counts: [0; 256] }
    }
}

impl ChannelHistogram {
    #[inline]
    pub fn add(&mut self, value: u8) {
        self.counts[value as usize] += 1;
    }

    pub fn count(&self, value: u8) -> u64 {
        self.counts[value as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// The most frequent level and its count.
    ///
    /// When several levels share the highest count the lowest level wins.
    pub fn peak(&self) -> (u8, u64) {
        let mut best = (0u8, self.counts[0]);
        for (value, &count) in self.counts.iter().enumerate().skip(1) {
            if count > best.1 {
                best = (value as u8, count);
            }
        }
        best
    }
}

/// Statistics derived from a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetrics {
    pub mean_r: u8,
    pub mean_g: u8,
    pub mean_b: u8,
    pub min_r: u8,
    pub min_g: u8,
    pub min_b: u8,
    /// Share of pixels at the most frequent red level, in percent.
    pub peak_percent_r: f64,
    pub peak_percent_g: f64,
    pub peak_percent_b: f64,
    pub height: u32,
}

impl FrameMetrics {
    pub fn means(&self) -> [u8; 3] {
        [self.mean_r, self.mean_g, self.mean_b]
    }
    pub fn minimums(&self) -> [u8; 3] {
        [self.min_r, self.min_g, self.min_b]
    }
    pub fn peak_percents(&self) -> [f64; 3] {
        [self.peak_percent_r, self.peak_percent_g, self.peak_percent_b]
    }
}

/// Compute mean, minimum and mode share per channel in one pass.
///
/// `rgb` holds `width * height` pixels, row-major, as interleaved R, G, B
/// bytes. Extra trailing bytes are ignored. Means are truncated.
///
/// # Panics
///
/// Panics if the frame has no pixels or `rgb` is shorter than
/// `width * height * 3` bytes.
pub fn compute_frame_metrics(rgb: &[u8], width: u32, height: u32) -> FrameMetrics {
    let n_pixels = width as usize * height as usize;
    assert!(n_pixels > 0, "frame has no pixels ({width}x{height})");
    assert!(
        rgb.len() >= n_pixels * 3,
        "buffer of {} bytes too short for {width}x{height} RGB8",
        rgb.len()
    );

    let mut hists: [ChannelHistogram; 3] = Default::default();
    let mut sums = [0u64; 3];
    let mut mins = [u8::MAX; 3];

    for px in rgb[..n_pixels * 3].chunks_exact(3) {
        for (c, &v) in px.iter().enumerate() {
            sums[c] += u64::from(v);
            if v < mins[c] {
                mins[c] = v;
            }
            hists[c].add(v);
        }
    }

    let n = n_pixels as u64;
    let mean = |c: usize| (sums[c] / n) as u8;
    let peak_percent = |c: usize| 100.0 * hists[c].peak().1 as f64 / n as f64;

    FrameMetrics {
        mean_r: mean(0),
        mean_g: mean(1),
        mean_b: mean(2),
        min_r: mins[0],
        min_g: mins[1],
        min_b: mins[2],
        peak_percent_r: peak_percent(0),
        peak_percent_g: peak_percent(1),
        peak_percent_b: peak_percent(2),
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        rgb.iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect()
    }

    #[test]
    fn uniform_frame() {
        let buf = uniform(7, 5, [10, 200, 255]);
        let m = compute_frame_metrics(&buf, 7, 5);
        assert_eq!(m.means(), [10, 200, 255]);
        assert_eq!(m.minimums(), [10, 200, 255]);
        assert_eq!(m.peak_percents(), [100.0, 100.0, 100.0]);
        assert_eq!(m.height, 5);
    }

    #[test]
    fn one_red_pixel_in_hundred() {
        let mut buf = uniform(10, 10, [0, 0, 0]);
        buf[0] = 255;
        let m = compute_frame_metrics(&buf, 10, 10);
        // 255 / 100 truncates to 2
        assert_eq!(m.mean_r, 2);
        assert_eq!(m.min_r, 0);
        assert_eq!(m.peak_percent_r, 99.0);
        assert_eq!(m.peak_percent_g, 100.0);
    }

    #[test]
    fn mean_truncates() {
        // (1 + 2) / 2 = 1.5
        let buf = [1, 0, 0, 2, 0, 0];
        let m = compute_frame_metrics(&buf, 2, 1);
        assert_eq!(m.mean_r, 1);
    }

    #[test]
    fn peak_ties_resolve_to_lowest_value() {
        let buf = [10, 7, 0, 5, 7, 0];
        let m = compute_frame_metrics(&buf, 2, 1);
        assert_eq!(m.peak_percent_r, 50.0);

        let mut hist = ChannelHistogram::default();
        hist.add(10);
        hist.add(5);
        assert_eq!(hist.peak(), (5, 1));
        assert_eq!(hist.total(), 2);
    }

    #[test]
    fn minimum_is_a_sample_and_below_all() {
        let buf: Vec<u8> = (0..(16 * 3)).map(|i| (97 * i % 251 + 3) as u8).collect();
        let m = compute_frame_metrics(&buf, 4, 4);
        for (c, min) in m.minimums().iter().enumerate() {
            let samples: Vec<u8> = buf.iter().skip(c).step_by(3).copied().collect();
            assert!(samples.iter().all(|s| s >= min));
            assert!(samples.contains(min));
        }
        for p in m.peak_percents() {
            assert!((0.0..=100.0).contains(&p));
        }
    }

    #[test]
    fn trailing_bytes_ignored() {
        let mut buf = uniform(2, 2, [50, 50, 50]);
        buf.extend_from_slice(&[0; 9]);
        let m = compute_frame_metrics(&buf, 2, 2);
        assert_eq!(m.minimums(), [50, 50, 50]);
    }

    #[test]
    #[should_panic]
    fn empty_frame_panics() {
        compute_frame_metrics(&[], 0, 0);
    }

    #[test]
    #[should_panic]
    fn short_buffer_panics() {
        compute_frame_metrics(&[0; 5], 2, 1);
    }
}
