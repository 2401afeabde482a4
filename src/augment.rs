use image::{imageops, GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into_with, Interpolation};
use imageproc::noise::gaussian_noise;
use ndarray::Array2;
use palette::{Hsv, Srgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{GlprError, GlprErrorKind};

const ROTATION_VARIATION: f32 = 0.8;
const PLATE_SCALE: f32 = 0.8;

// row major 2x3 affine matrix [m00, m01, m02, m10, m11, m12]
type Affine = [f32; 6];

/// Composites license plate crops over random background crops with a
/// randomized 3d-rotation-derived affine warp, brightness and blur
/// perturbation, and normalizes the result to `[0, 1]`.
///
/// The background pool is validated once at construction, every image must
/// be at least output-sized in both dimensions so random crop origins can
/// never leave the image.
#[derive(Debug)]
pub struct ImageAugmentor {
    out_width: u32,
    out_height: u32,
    backgrounds: Vec<GrayImage>,
    noise_sigma: Option<f64>,
    rng: StdRng,
}

impl ImageAugmentor {

    pub fn new(out_width: u32, out_height: u32, backgrounds: Vec<GrayImage>) -> Result<Self, GlprError> {
        Self::with_rng(out_width, out_height, backgrounds, StdRng::from_entropy())
    }

    /// Deterministic augmentation sequence for a fixed seed.
    pub fn seeded(out_width: u32, out_height: u32, backgrounds: Vec<GrayImage>, seed: u64) -> Result<Self, GlprError> {
        Self::with_rng(out_width, out_height, backgrounds, StdRng::seed_from_u64(seed))
    }

    fn with_rng(out_width: u32, out_height: u32, backgrounds: Vec<GrayImage>, rng: StdRng) -> Result<Self, GlprError> {
        for (index, background) in backgrounds.iter().enumerate() {
            let (width, height) = background.dimensions();
            if width < out_width || height < out_height {
                return Err(GlprErrorKind::BackgroundTooSmall {
                    index,
                    actual: (width, height),
                    required: (out_width, out_height),
                }.into());
            }
        }
        Ok(Self { out_width, out_height, backgrounds, noise_sigma: None, rng })
    }

    /// Additive gaussian noise stage between compositing and blur, off by
    /// default.
    pub fn set_gaussian_noise(&mut self, sigma: Option<f64>) {
        self.noise_sigma = sigma;
    }

    /// Composite one plate image onto a random background crop. The result
    /// always has the configured output shape (rows = height, columns =
    /// width) with every value in `[0, 1]`.
    pub fn generate_plate_image(&mut self, plate: &GrayImage) -> Array2<f32> {
        let background = self.random_background_crop();

        // one brightness factor shared by both images, each keeps its own
        // uniform offset draw
        let factor = self.rng.gen_range(0.0..0.7f32);
        let background = self.brightness(&background, factor);
        let plate = self.brightness(plate, factor);

        let m = self.make_affine_transform(plate.dimensions(), (self.out_width, self.out_height), ROTATION_VARIATION);
        let inverse = invert_affine(&m);
        let warped_plate = self.warp(&plate, &inverse);
        let mask = GrayImage::from_pixel(plate.width(), plate.height(), Luma([255]));
        let warped_mask = self.warp(&mask, &inverse);

        // alpha blend the warped plate over the background wherever the
        // warped mask says plate content exists
        let mut out = GrayImage::new(self.out_width, self.out_height);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let alpha = warped_mask.get_pixel(x, y).0[0] as f32/255.0;
            let plate_value = warped_plate.get_pixel(x, y).0[0] as f32;
            let background_value = background.get_pixel(x, y).0[0] as f32;
            let value = plate_value*alpha + background_value*(1.0 - alpha);
            *pixel = Luma([value.round().min(255.0) as u8]);
        }

        let out = match self.noise_sigma {
            Some(sigma) => gaussian_noise(&out, 0.0, sigma, self.rng.gen()),
            None => out,
        };

        let kernel = self.rng.gen_range(1..=3u32);
        let out = box_blur(&out, kernel);
        normalize(&out)
    }

    // uniform background pick, then a crop origin uniform over the valid range
    fn random_background_crop(&mut self) -> GrayImage {
        let index = self.rng.gen_range(0..self.backgrounds.len());
        let background = &self.backgrounds[index];
        let x = self.rng.gen_range(0..=background.width() - self.out_width);
        let y = self.rng.gen_range(0..=background.height() - self.out_height);
        imageops::crop_imm(background, x, y, self.out_width, self.out_height).to_image()
    }

    /// Scale the value channel in hsv space by `factor` plus a fresh uniform
    /// draw in `[0, 1)`, clipped to the representable range.
    fn brightness(&mut self, image: &GrayImage, factor: f32) -> GrayImage {
        let scale = factor + self.rng.gen::<f32>();
        let mut out = GrayImage::new(image.width(), image.height());
        for (x, y, pixel) in image.enumerate_pixels() {
            let gray = pixel.0[0] as f32/255.0;
            let hsv = Hsv::from(Srgb::new(gray, gray, gray));
            let value = (hsv.value*scale).min(1.0);
            let rgb = Srgb::from(Hsv::new(hsv.hue, hsv.saturation, value));
            let luma = 0.299*rgb.red + 0.587*rgb.green + 0.114*rgb.blue;
            out.put_pixel(x, y, Luma([(luma*255.0).round().min(255.0) as u8]));
        }
        out
    }

    /// 2d affine transform derived from a random 3d rotation, projected to
    /// the image plane, scaled and translated so the source center lands on
    /// the destination center.
    fn make_affine_transform(&mut self, from: (u32, u32), to: (u32, u32), rotation_variation: f32) -> Affine {
        let roll = self.rng.gen_range(-0.3..0.3f32)*rotation_variation;
        let pitch = self.rng.gen_range(-0.2..0.2f32)*rotation_variation;
        let yaw = self.rng.gen_range(-1.2..1.2f32)*rotation_variation;

        let rotation = euler_to_mat(yaw, pitch, roll);
        let m00 = rotation[0][0]*PLATE_SCALE;
        let m01 = rotation[0][1]*PLATE_SCALE;
        let m10 = rotation[1][0]*PLATE_SCALE;
        let m11 = rotation[1][1]*PLATE_SCALE;

        let center_from = (from.0 as f32/2.0, from.1 as f32/2.0);
        let center_to = (to.0 as f32/2.0, to.1 as f32/2.0);
        let m02 = center_to.0 - m00*center_from.0 - m01*center_from.1;
        let m12 = center_to.1 - m10*center_from.0 - m11*center_from.1;

        [m00, m01, m02, m10, m11, m12]
    }

    // warp into an output-shaped canvas, pixels outside the transform are zero
    fn warp(&self, image: &GrayImage, inverse: &Affine) -> GrayImage {
        let [m00, m01, m02, m10, m11, m12] = *inverse;
        let mut canvas = GrayImage::new(self.out_width, self.out_height);
        warp_into_with(
            image,
            |x, y| (m00*x + m01*y + m02, m10*x + m11*y + m12),
            Interpolation::Bilinear,
            Luma([0u8]),
            &mut canvas,
        );
        canvas
    }

}

// M = Rz(roll) * Rx(pitch) * Ry(yaw), all rotating clockwise
fn euler_to_mat(yaw: f32, pitch: f32, roll: f32) -> [[f32; 3]; 3] {
    let (s, c) = yaw.sin_cos();
    let m_yaw = [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]];

    let (s, c) = pitch.sin_cos();
    let m_pitch = [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]];

    let (s, c) = roll.sin_cos();
    let m_roll = [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]];

    mat3_mul(&m_roll, &mat3_mul(&m_pitch, &m_yaw))
}

fn mat3_mul(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for row in 0..3 {
        for col in 0..3 {
            for k in 0..3 {
                out[row][col] += a[row][k]*b[k][col];
            }
        }
    }
    out
}

fn invert_affine(m: &Affine) -> Affine {
    let [m00, m01, m02, m10, m11, m12] = *m;
    let det = m00*m11 - m01*m10;
    let i00 = m11/det;
    let i01 = -m01/det;
    let i10 = -m10/det;
    let i11 = m00/det;
    let i02 = -(i00*m02 + i01*m12);
    let i12 = -(i10*m02 + i11*m12);
    [i00, i01, i02, i10, i11, i12]
}

// mean filter with the window anchored like an even-sized convolution,
// replicated borders
fn box_blur(image: &GrayImage, kernel: u32) -> GrayImage {
    if kernel <= 1 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let anchor = (kernel as i64 - 1)/2;
    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let mut sum = 0.0f32;
        for dy in 0..kernel as i64 {
            for dx in 0..kernel as i64 {
                let sx = (x as i64 + dx - anchor).max(0).min(width as i64 - 1);
                let sy = (y as i64 + dy - anchor).max(0).min(height as i64 - 1);
                sum += image.get_pixel(sx as u32, sy as u32).0[0] as f32;
            }
        }
        let mean = sum/(kernel*kernel) as f32;
        *pixel = Luma([mean.round().min(255.0) as u8]);
    }
    out
}

// 8 bit image to float matrix in [0, 1], rows = height
fn normalize(image: &GrayImage) -> Array2<f32> {
    Array2::from_shape_fn((image.height() as usize, image.width() as usize), |(y, x)| {
        image.get_pixel(x as u32, y as u32).0[0] as f32/255.0
    })
}


#[cfg(test)]
mod test {

    use image::GrayImage;

    use super::*;
    use crate::error::GlprErrorKind;

    fn plate() -> GrayImage {
        GrayImage::from_fn(151, 32, |x, y| image::Luma([((x + y*3) % 256) as u8]))
    }

    fn backgrounds() -> Vec<GrayImage> {
        vec![
            GrayImage::from_pixel(256, 256, image::Luma([90])),
            GrayImage::from_fn(200, 100, |x, y| image::Luma([((x*y) % 256) as u8])),
        ]
    }

    #[test]
    fn output_has_configured_shape_and_unit_range() {
        let mut augmentor = ImageAugmentor::seeded(128, 64, backgrounds(), 42).unwrap();
        for _ in 0..8 {
            let out = augmentor.generate_plate_image(&plate());
            assert_eq!(out.dim(), (64, 128));
            assert!(out.iter().all(|v| *v >= 0.0 && *v <= 1.0));
        }
    }

    #[test]
    fn same_seed_reproduces_the_same_image() {
        let mut a = ImageAugmentor::seeded(128, 64, backgrounds(), 7).unwrap();
        let mut b = ImageAugmentor::seeded(128, 64, backgrounds(), 7).unwrap();
        assert_eq!(a.generate_plate_image(&plate()), b.generate_plate_image(&plate()));
    }

    #[test]
    fn background_of_exactly_output_shape_is_accepted() {
        let pool = vec![GrayImage::from_pixel(128, 64, image::Luma([50]))];
        let mut augmentor = ImageAugmentor::seeded(128, 64, pool, 1).unwrap();
        let out = augmentor.generate_plate_image(&plate());
        assert_eq!(out.dim(), (64, 128));
    }

    #[test]
    fn undersized_background_is_rejected_at_construction() {
        let pool = vec![GrayImage::from_pixel(127, 64, image::Luma([50]))];
        let res = ImageAugmentor::seeded(128, 64, pool, 1);
        assert!(matches!(res.unwrap_err().kind(), GlprErrorKind::BackgroundTooSmall { .. }));
    }

    #[test]
    fn zero_rotation_transform_scales_about_the_centers() {
        let mut augmentor = ImageAugmentor::seeded(128, 64, backgrounds(), 0).unwrap();
        let m = augmentor.make_affine_transform((151, 32), (128, 64), 0.0);
        assert!((m[0] - 0.8).abs() < 1e-6);
        assert!(m[1].abs() < 1e-6);
        assert!(m[3].abs() < 1e-6);
        assert!((m[4] - 0.8).abs() < 1e-6);
        // the source center must land on the destination center
        let (cx, cy) = (151.0/2.0, 32.0/2.0);
        assert!((m[0]*cx + m[1]*cy + m[2] - 64.0).abs() < 1e-4);
        assert!((m[3]*cx + m[4]*cy + m[5] - 32.0).abs() < 1e-4);
    }

    #[test]
    fn inverse_affine_undoes_the_transform() {
        let m = [0.7, -0.1, 12.0, 0.2, 0.9, -3.0];
        let inv = invert_affine(&m);
        let (x, y) = (31.0f32, 17.0f32);
        let (tx, ty) = (m[0]*x + m[1]*y + m[2], m[3]*x + m[4]*y + m[5]);
        let (rx, ry) = (inv[0]*tx + inv[1]*ty + inv[2], inv[3]*tx + inv[4]*ty + inv[5]);
        assert!((rx - x).abs() < 1e-3);
        assert!((ry - y).abs() < 1e-3);
    }
}
