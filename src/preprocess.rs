use image::imageops::FilterType;
use image::{imageops, GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::noise::gaussian_noise;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One step of the image preprocessing chain a `DatasetLoader` runs over
/// every loaded record.
pub trait Preprocessor {
    fn preprocess(&mut self, image: GrayImage) -> GrayImage;
}

/// Resizes to the target width keeping the aspect ratio, then pastes the
/// result vertically centered onto a black target-sized canvas.
pub struct AspectAwarePreprocessor {
    width: u32,
    height: u32,
}

impl AspectAwarePreprocessor {

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

}

impl Preprocessor for AspectAwarePreprocessor {

    fn preprocess(&mut self, image: GrayImage) -> GrayImage {
        let ratio = self.width as f32/image.width() as f32;
        let new_height = ((image.height() as f32*ratio).round() as u32).max(1);
        let resized = imageops::resize(&image, self.width, new_height, FilterType::Lanczos3);

        let mut canvas = GrayImage::new(self.width, self.height);
        let offset = (self.height as i64 - new_height as i64)/2;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let target_y = y as i64 + offset;
            if target_y >= 0 && target_y < self.height as i64 {
                canvas.put_pixel(x, target_y as u32, *pixel);
            }
        }
        canvas
    }

}

/// Rotates by a random angle, letting the canvas grow so no corner is cut
/// off, then resizes back to the configured shape.
pub struct RandomRotatePreprocessor {
    min_angle: i32,
    max_angle: i32,
    width: u32,
    height: u32,
    rng: StdRng,
}

impl RandomRotatePreprocessor {

    pub fn new(min_angle: i32, max_angle: i32, width: u32, height: u32) -> Self {
        Self::with_rng(min_angle, max_angle, width, height, StdRng::from_entropy())
    }

    pub fn seeded(min_angle: i32, max_angle: i32, width: u32, height: u32, seed: u64) -> Self {
        Self::with_rng(min_angle, max_angle, width, height, StdRng::seed_from_u64(seed))
    }

    fn with_rng(min_angle: i32, max_angle: i32, width: u32, height: u32, rng: StdRng) -> Self {
        Self { min_angle, max_angle, width, height, rng }
    }

    // rotate about the image center with the canvas grown to the rotated bounds
    fn rotate_bound(image: &GrayImage, theta: f32) -> GrayImage {
        let (width, height) = image.dimensions();
        let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
        let new_width = (height as f32*sin + width as f32*cos).round() as u32;
        let new_height = (height as f32*cos + width as f32*sin).round() as u32;

        let center = Projection::translate(-(width as f32)/2.0, -(height as f32)/2.0);
        let back = Projection::translate(new_width as f32/2.0, new_height as f32/2.0);
        let projection = back*Projection::rotate(theta)*center;

        let mut canvas = GrayImage::new(new_width, new_height);
        warp_into(image, &projection, Interpolation::Bilinear, Luma([0u8]), &mut canvas);
        canvas
    }

}

impl Preprocessor for RandomRotatePreprocessor {

    fn preprocess(&mut self, image: GrayImage) -> GrayImage {
        let angle = self.rng.gen_range(self.min_angle..=self.max_angle);
        let theta = angle as f32*std::f32::consts::PI/180.0;
        let rotated = Self::rotate_bound(&image, theta);
        imageops::resize(&rotated, self.width, self.height, FilterType::Triangle)
    }

}

/// Adds gaussian noise with a sigma drawn uniformly from `0..=max_sigma`.
pub struct RandomGaussianNoisePreprocessor {
    max_sigma: u32,
    rng: StdRng,
}

impl RandomGaussianNoisePreprocessor {

    pub fn new(max_sigma: u32) -> Self {
        Self { max_sigma, rng: StdRng::from_entropy() }
    }

    pub fn seeded(max_sigma: u32, seed: u64) -> Self {
        Self { max_sigma, rng: StdRng::seed_from_u64(seed) }
    }

}

impl Preprocessor for RandomGaussianNoisePreprocessor {

    fn preprocess(&mut self, image: GrayImage) -> GrayImage {
        let sigma = self.rng.gen_range(0..=self.max_sigma);
        if sigma == 0 {
            return image;
        }
        gaussian_noise(&image, 0.0, sigma as f64, self.rng.gen())
    }

}


#[cfg(test)]
mod test {

    use image::GrayImage;

    use super::*;

    #[test]
    fn aspect_aware_letterboxes_to_target_shape() {
        let mut p = AspectAwarePreprocessor::new(128, 64);
        let out = p.preprocess(GrayImage::from_pixel(151, 32, image::Luma([200])));
        assert_eq!(out.dimensions(), (128, 64));
        // the letterbox bands stay black
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(64, 32).0[0], 200);
    }

    #[test]
    fn random_rotate_resizes_back_to_target_shape() {
        let mut p = RandomRotatePreprocessor::seeded(-10, 10, 128, 64, 3);
        let out = p.preprocess(GrayImage::from_pixel(128, 64, image::Luma([80])));
        assert_eq!(out.dimensions(), (128, 64));
    }

    #[test]
    fn gaussian_noise_keeps_shape() {
        let mut p = RandomGaussianNoisePreprocessor::seeded(8, 11);
        let out = p.preprocess(GrayImage::from_pixel(16, 8, image::Luma([128])));
        assert_eq!(out.dimensions(), (16, 8));
    }
}
