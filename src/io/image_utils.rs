// Copyright @yucwang 2026

use crate::math::bitmap::Bitmap;
use crate::math::constants::Float;

use std::fmt;
use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug)]
pub enum ImageSaveError {
    Io(std::io::Error),
    Encode(String),
    UnsupportedExtension(String),
}

impl From<std::io::Error> for ImageSaveError {
    fn from(err: std::io::Error) -> Self {
        ImageSaveError::Io(err)
    }
}

impl fmt::Display for ImageSaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSaveError::Io(err) => write!(f, "io error: {}", err),
            ImageSaveError::Encode(msg) => write!(f, "encode error: {}", msg),
            ImageSaveError::UnsupportedExtension(ext) => write!(f, "invalid extension: {}", ext),
        }
    }
}

impl std::error::Error for ImageSaveError {}

// Writes the film to HDR, EXR or tone-mapped PNG depending on the file
// extension. Film row 0 is the bottom scanline; encoders store top-down.
pub fn save_image(path: &str, film: &Bitmap) -> Result<(), ImageSaveError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::info!("Creating directory: {}", parent.display());
            fs::create_dir_all(parent)?;
        }
    }

    let ext = Path::new(path)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "hdr" => save_hdr(path, film),
        "exr" => save_exr(path, film),
        "png" => save_png(path, film),
        _ => Err(ImageSaveError::UnsupportedExtension(ext)),
    }?;

    log::info!("Successfully saved to {}", path);
    Ok(())
}

fn save_hdr(path: &str, film: &Bitmap) -> Result<(), ImageSaveError> {
    let (width, height) = (film.width(), film.height());
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let v = film[(x, height - 1 - y)];
            data.push(image::Rgb([v.x as f32, v.y as f32, v.z as f32]));
        }
    }

    let file = File::create(path)?;
    image::codecs::hdr::HdrEncoder::new(BufWriter::new(file))
        .encode(&data, width, height)
        .map_err(|e| ImageSaveError::Encode(e.to_string()))
}

fn save_exr(path: &str, film: &Bitmap) -> Result<(), ImageSaveError> {
    use exr::prelude::*;

    let (width, height) = (film.width(), film.height());
    let channels = SpecificChannels::rgb(|pos: Vec2<usize>| {
        let v = film[(pos.x(), height - 1 - pos.y())];
        (v.x as f32, v.y as f32, v.z as f32)
    });

    // ZIP-compressed scanline blocks
    let layer = Layer::new((width, height),
                           LayerAttributes::default(),
                           Encoding::SMALL_LOSSLESS,
                           channels);
    Image::from_layer(layer)
        .write()
        .to_file(path)
        .map_err(|e| ImageSaveError::Encode(e.to_string()))
}

fn save_png(path: &str, film: &Bitmap) -> Result<(), ImageSaveError> {
    let (width, height) = (film.width(), film.height());
    let exp: Float = 1.0 / 2.2;
    let tonemap = |v: Float| -> u8 {
        ((v.max(0.0).powf(exp) * 255.0) as i64).clamp(0, 255) as u8
    };

    let mut img = image::RgbImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let v = film[(x, height - 1 - y)];
            img.put_pixel(x as u32, y as u32,
                          image::Rgb([tonemap(v.x), tonemap(v.y), tonemap(v.z)]));
        }
    }

    img.save(path).map_err(|e| ImageSaveError::Encode(e.to_string()))
}

/* Tests for image saving */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::texture::Texture;
    use crate::math::constants::Vector3f;

    fn gradient_film() -> Bitmap {
        let mut film = Bitmap::new(4, 2);
        for y in 0..2 {
            for x in 0..4 {
                film[(x, y)] = Vector3f::new(x as Float / 4.0, y as Float / 2.0, 1.0);
            }
        }
        film
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let film = gradient_film();
        let result = save_image("/tmp/genoise_image_utils.bmp", &film);
        assert!(matches!(result, Err(ImageSaveError::UnsupportedExtension(_))));
    }

    #[test]
    fn test_exr_roundtrip() {
        let film = gradient_film();
        let path = std::env::temp_dir().join("genoise_image_utils_roundtrip.exr");
        let path_str = path.to_str().unwrap();

        save_image(path_str, &film).expect("save exr");
        let tex = Texture::from_exr(path_str).expect("read exr");
        assert_eq!(tex.width(), 4);
        assert_eq!(tex.height(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_png_written() {
        let film = gradient_film();
        let path = std::env::temp_dir().join("genoise_image_utils_out.png");
        save_image(path.to_str().unwrap(), &film).expect("save png");
        assert!(path.exists());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_hdr_written() {
        let film = gradient_film();
        let path = std::env::temp_dir().join("genoise_image_utils_out.hdr");
        save_image(path.to_str().unwrap(), &film).expect("save hdr");
        assert!(path.exists());
        std::fs::remove_file(&path).ok();
    }
}
