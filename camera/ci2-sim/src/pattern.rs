use machine_vision_formats::PixFmt;

/// Image content produced by the simulated sensor.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FramePattern {
    /// Every pixel has the same color.
    Uniform([u8; 3]),
    /// The first pixel of each frame differs from the background.
    SinglePixel { background: [u8; 3], pixel: [u8; 3] },
    /// Horizontal ramp in red, vertical ramp in green, constant blue.
    ///
    /// The ramp depends on the position within the full sensor, so the
    /// statistics change with the region of interest.
    #[default]
    Gradient,
}

/// Region currently read out from the sensor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Readout {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) offset_x: u32,
    pub(crate) offset_y: u32,
}

impl FramePattern {
    fn color_at(&self, col: u32, row: u32, readout: &Readout) -> [u8; 3] {
        match self {
            FramePattern::Uniform(c) => *c,
            FramePattern::SinglePixel { background, pixel } => {
                if col == 0 && row == 0 {
                    *pixel
                } else {
                    *background
                }
            }
            FramePattern::Gradient => {
                let x = col + readout.offset_x;
                let y = row + readout.offset_y;
                [(x % 256) as u8, (y % 256) as u8, 128]
            }
        }
    }

    /// Render the readout region in the given pixel format.
    ///
    /// Mono8 uses the red component as the intensity.
    pub(crate) fn render(&self, readout: &Readout, pixfmt: PixFmt) -> Vec<u8> {
        let npix = readout.width as usize * readout.height as usize;
        let bpp = match pixfmt {
            PixFmt::Mono8 => 1,
            _ => 3,
        };
        let mut data = Vec::with_capacity(npix * bpp);
        for row in 0..readout.height {
            for col in 0..readout.width {
                let c = self.color_at(col, row, readout);
                if bpp == 1 {
                    data.push(c[0]);
                } else {
                    data.extend_from_slice(&c);
                }
            }
        }
        data
    }
}

/// Expand Mono8 or pass RGB8 data through as packed RGB24.
pub(crate) fn to_rgb24(pixfmt: PixFmt, data: &[u8]) -> ci2::Result<Vec<u8>> {
    match pixfmt {
        PixFmt::RGB8 => Ok(data.to_vec()),
        PixFmt::Mono8 => Ok(data.iter().flat_map(|v| [*v, *v, *v]).collect()),
        other => Err(ci2::Error::CI2Error {
            msg: format!("cannot convert {other:?} to RGB24"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_follows_offset() {
        let readout = Readout {
            width: 2,
            height: 1,
            offset_x: 10,
            offset_y: 3,
        };
        let data = FramePattern::Gradient.render(&readout, PixFmt::RGB8);
        assert_eq!(data, vec![10, 3, 128, 11, 3, 128]);
    }

    #[test]
    fn mono_expands_to_rgb() {
        let rgb = to_rgb24(PixFmt::Mono8, &[1, 2]).unwrap();
        assert_eq!(rgb, vec![1, 1, 1, 2, 2, 2]);
    }
}
