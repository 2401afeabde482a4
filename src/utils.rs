use image::{imageops, GrayImage};

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GlprError;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// All image files directly inside `dir`, sorted by path so runs are
/// repeatable.
pub fn list_images(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, GlprError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_lowercase(),
            None => continue,
        };
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Cut the larger dimension down to the smaller one, keeping the top left
/// corner.
pub fn square_crop(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    if side == width && side == height {
        return image.clone();
    }
    imageops::crop_imm(image, 0, 0, side, side).to_image()
}


#[cfg(test)]
mod test {

    use image::GrayImage;

    use super::square_crop;

    #[test]
    fn square_crop_keeps_the_smaller_dimension() {
        let tall = GrayImage::new(30, 50);
        assert_eq!(square_crop(&tall).dimensions(), (30, 30));

        let wide = GrayImage::new(50, 30);
        assert_eq!(square_crop(&wide).dimensions(), (30, 30));

        let square = GrayImage::new(40, 40);
        assert_eq!(square_crop(&square).dimensions(), (40, 40));
    }
}
