// Copyright @yucwang 2026

use crate::math::constants::{ Float, Vector2f };
use crate::math::spectrum::RGBSpectrum;

use image::GenericImageView;
use std::fmt;
use std::path::Path;

#[derive(Debug)]
pub enum TextureLoadError {
    Decode(String),
    UnsupportedFormat(String),
}

impl fmt::Display for TextureLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureLoadError::Decode(msg) => write!(f, "decode error: {}", msg),
            TextureLoadError::UnsupportedFormat(ext) => write!(f, "unsupported texture format: {}", ext),
        }
    }
}

impl std::error::Error for TextureLoadError {}

// Width x height x 3 float image, sampled wrap-repeat nearest.
pub struct Texture {
    width: usize,
    height: usize,
    data: Vec<(f32, f32, f32)>,
}

impl Texture {
    pub fn from_exr(path: &str) -> Result<Self, TextureLoadError> {
        use exr::prelude::*;

        let image = read()
            .no_deep_data()
            .largest_resolution_level()
            .rgba_channels(
                |resolution, _| Texture {
                    width: resolution.width(),
                    height: resolution.height(),
                    data: vec![(0.0, 0.0, 0.0); resolution.width() * resolution.height()],
                },
                |image, position, (r, g, b, _a): (f32, f32, f32, f32)| {
                    let idx = position.y() * image.width + position.x();
                    image.data[idx] = (r, g, b);
                },
            )
            .first_valid_layer()
            .all_attributes()
            .from_file(path)
            .map_err(|e| TextureLoadError::Decode(format!("failed to read exr {}: {}", path, e)))?;

        Ok(image.layer_data.channel_data.pixels)
    }

    pub fn from_ldr(path: &str) -> Result<Self, TextureLoadError> {
        let img = image::io::Reader::open(path)
            .map_err(|e| TextureLoadError::Decode(format!("failed to open image {}: {}", path, e)))?
            .decode()
            .map_err(|e| TextureLoadError::Decode(format!("failed to decode image {}: {}", path, e)))?;

        let (width, height) = img.dimensions();
        let rgb = img.to_rgb32f();
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let p = rgb.get_pixel(x, y);
                data.push((p[0], p[1], p[2]));
            }
        }

        Ok(Self {
            width: width as usize,
            height: height as usize,
            data,
        })
    }

    pub fn from_file(path: &str) -> Result<Self, TextureLoadError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "exr" => Self::from_exr(path),
            "png" | "jpg" | "jpeg" => Self::from_ldr(path),
            _ => Err(TextureLoadError::UnsupportedFormat(ext)),
        }
    }

    pub fn evaluate(&self, uv: &Vector2f) -> RGBSpectrum {
        if self.width == 0 || self.height == 0 {
            return RGBSpectrum::default();
        }

        let fract = |v: Float| v - v.floor();
        let x = ((fract(uv.x) * self.width as Float) as i64).clamp(0, self.width as i64 - 1) as usize;
        let y = ((fract(uv.y) * self.height as Float) as i64).clamp(0, self.height as i64 - 1) as usize;
        let p = self.data[self.width * y + x];
        RGBSpectrum::new(p.0 as Float, p.1 as Float, p.2 as Float)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

/* Tests for Texture */

#[cfg(test)]
mod tests {
    use super::Texture;
    use crate::math::constants::Vector2f;

    fn checker() -> Texture {
        Texture {
            width: 2,
            height: 2,
            data: vec![
                (1.0, 0.0, 0.0), (0.0, 1.0, 0.0),
                (0.0, 0.0, 1.0), (1.0, 1.0, 1.0),
            ],
        }
    }

    #[test]
    fn test_nearest_lookup() {
        let tex = checker();
        let c = tex.evaluate(&Vector2f::new(0.25, 0.25));
        assert!((c[0] - 1.0).abs() < 1e-6 && c[1].abs() < 1e-6);
        let c = tex.evaluate(&Vector2f::new(0.75, 0.25));
        assert!((c[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrap_repeat() {
        let tex = checker();
        let a = tex.evaluate(&Vector2f::new(0.25, 0.25));
        let b = tex.evaluate(&Vector2f::new(1.25, -0.75));
        assert_eq!(a, b);
    }
}
