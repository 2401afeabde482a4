use image::GrayImage;
use ndarray::{s, Array1, Array2, Array4};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::augment::ImageAugmentor;
use crate::codec::LabelCodec;
use crate::error::GlprError;

/// Fill value for unused label grid cells. Deliberately outside the class
/// id range so padding can never be mistaken for alphabet index 0 by the
/// consuming loss.
pub const LABEL_FILL: i32 = -1;

/// The four aligned tensors a CTC-style loss consumes per training step.
pub struct TrainingBatch {
    /// augmented images, transposed and channel expanded, (batch, width, height, 1)
    pub inputs: Array4<f32>,
    /// encoded labels, left aligned, padded with [`LABEL_FILL`], (batch, max_text_len)
    pub labels: Array2<i32>,
    /// per sample timestep count, constant width / downsample_factor
    pub input_lengths: Array1<u32>,
    /// per sample true character count
    pub label_lengths: Array1<u32>,
}

/// Owns a permutation over one dataset split and yields model-ready batches,
/// reshuffling at every epoch boundary.
pub struct DatasetGenerator {
    images: Vec<GrayImage>,
    labels: Vec<String>,
    img_width: u32,
    img_height: u32,
    max_text_len: usize,
    batch_size: usize,
    input_length: u32,
    indexes: Vec<usize>,
    batch_index: usize,
    augmentor: ImageAugmentor,
    rng: StdRng,
}

impl DatasetGenerator {

    pub fn new(images: Vec<GrayImage>, labels: Vec<String>, img_width: u32, img_height: u32,
               downsample_factor: u32, max_text_len: usize, batch_size: usize,
               augmentor: ImageAugmentor) -> Self {
        Self::with_rng(images, labels, img_width, img_height, downsample_factor, max_text_len,
            batch_size, augmentor, StdRng::from_entropy())
    }

    /// Deterministic batch order for a fixed seed.
    pub fn seeded(images: Vec<GrayImage>, labels: Vec<String>, img_width: u32, img_height: u32,
                  downsample_factor: u32, max_text_len: usize, batch_size: usize,
                  augmentor: ImageAugmentor, seed: u64) -> Self {
        Self::with_rng(images, labels, img_width, img_height, downsample_factor, max_text_len,
            batch_size, augmentor, StdRng::seed_from_u64(seed))
    }

    fn with_rng(images: Vec<GrayImage>, labels: Vec<String>, img_width: u32, img_height: u32,
                downsample_factor: u32, max_text_len: usize, batch_size: usize,
                augmentor: ImageAugmentor, mut rng: StdRng) -> Self {
        let mut indexes: Vec<usize> = (0..labels.len()).collect();
        indexes.shuffle(&mut rng);
        Self {
            images,
            labels,
            img_width,
            img_height,
            max_text_len,
            batch_size,
            input_length: img_width/downsample_factor,
            indexes,
            batch_index: 0,
            augmentor,
            rng,
        }
    }

    /// The raw images and labels of the next batch in permutation order.
    /// Once a full epoch is consumed the cursor resets and a fresh
    /// permutation is drawn, so every record appears exactly once per epoch.
    pub fn next_batch(&mut self) -> (Vec<GrayImage>, Vec<String>) {
        if self.batch_index >= self.labels.len()/self.batch_size {
            self.batch_index = 0;
            self.indexes.shuffle(&mut self.rng);
        }
        let start = self.batch_index*self.batch_size;
        let end = (start + self.batch_size).min(self.indexes.len());
        let batch = &self.indexes[start..end];
        self.batch_index += 1;
        (batch.iter().map(|i| self.images[*i].clone()).collect(),
         batch.iter().map(|i| self.labels[*i].clone()).collect())
    }

    /// Lazy batch sequence, one `next_batch` per pull. Infinite unless
    /// `passes` bounds the number of produced batches.
    pub fn generate(&mut self, passes: Option<u64>) -> Batches<'_> {
        Batches { generator: self, remaining: passes }
    }

    fn build_batch(&mut self) -> Result<TrainingBatch, GlprError> {
        let (images, labels) = self.next_batch();
        let batch_size = images.len();

        let mut inputs = Array4::<f32>::ones(
            (batch_size, self.img_width as usize, self.img_height as usize, 1));
        let mut label_grid = Array2::<i32>::from_elem((batch_size, self.max_text_len), LABEL_FILL);
        let input_lengths = Array1::<u32>::from_elem(batch_size, self.input_length);
        let mut label_lengths = Array1::<u32>::zeros(batch_size);

        for (i, (image, number)) in images.iter().zip(&labels).enumerate() {
            let augmented = self.augmentor.generate_plate_image(image);
            // axes reordered so width comes first, trailing channel axis added
            inputs.slice_mut(s![i, .., .., 0]).assign(&augmented.t());

            let encoded = LabelCodec::encode(number)?;
            for (j, class) in encoded.iter().enumerate() {
                label_grid[[i, j]] = *class as i32;
            }
            label_lengths[i] = encoded.len() as u32;
        }

        Ok(TrainingBatch { inputs, labels: label_grid, input_lengths, label_lengths })
    }

}

/// Pull-based batch sequence borrowed from a [`DatasetGenerator`].
pub struct Batches<'a> {
    generator: &'a mut DatasetGenerator,
    remaining: Option<u64>,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Result<TrainingBatch, GlprError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.remaining.as_mut() {
            Some(0) => return None,
            Some(remaining) => *remaining -= 1,
            None => {},
        }
        Some(self.generator.build_batch())
    }
}


#[cfg(test)]
mod test {

    use image::GrayImage;

    use super::{DatasetGenerator, LABEL_FILL};
    use crate::augment::ImageAugmentor;

    fn augmentor(seed: u64) -> ImageAugmentor {
        let pool = vec![GrayImage::from_pixel(128, 64, image::Luma([70]))];
        ImageAugmentor::seeded(128, 64, pool, seed).unwrap()
    }

    fn generator(count: u8, batch_size: usize, seed: u64) -> DatasetGenerator {
        let images: Vec<GrayImage> = (0..count)
            .map(|i| GrayImage::from_pixel(151, 32, image::Luma([i])))
            .collect();
        let labels: Vec<String> = (0..count).map(|i| format!("A{}", i)).collect();
        DatasetGenerator::seeded(images, labels, 128, 64, 4, 10, batch_size, augmentor(seed), seed)
    }

    #[test]
    fn one_epoch_covers_every_record_exactly_once() {
        let mut generator = generator(10, 2, 5);
        let mut seen = Vec::new();
        for _ in 0..5 {
            let (images, labels) = generator.next_batch();
            assert_eq!(images.len(), 2);
            // pairing must survive the permutation
            for (image, label) in images.iter().zip(&labels) {
                let record: u8 = label[1..].parse().unwrap();
                assert_eq!(image.get_pixel(0, 0).0[0], record);
            }
            seen.extend(labels);
        }
        seen.sort();
        let mut expected: Vec<String> = (0..10).map(|i| format!("A{}", i)).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn epoch_boundary_reshuffles_and_keeps_covering() {
        let mut generator = generator(6, 2, 9);
        for _ in 0..3 {
            generator.next_batch();
        }
        // second epoch, cursor must have reset
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (_, labels) = generator.next_batch();
            seen.extend(labels);
        }
        seen.sort();
        let mut expected: Vec<String> = (0..6).map(|i| format!("A{}", i)).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn generate_is_bounded_by_passes() {
        let mut generator = generator(8, 2, 3);
        let batches: Vec<_> = generator.generate(Some(3)).collect();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.is_ok()));
    }

    #[test]
    fn batch_tensors_have_the_contract_shapes() {
        let mut generator = generator(4, 2, 1);
        let batch = generator.generate(Some(1)).next().unwrap().unwrap();

        assert_eq!(batch.inputs.dim(), (2, 128, 64, 1));
        assert_eq!(batch.labels.dim(), (2, 10));
        assert_eq!(batch.input_lengths.len(), 2);
        assert_eq!(batch.label_lengths.len(), 2);

        // input length is width over downsample factor for every sample
        assert!(batch.input_lengths.iter().all(|v| *v == 32));
        assert!(batch.inputs.iter().all(|v| *v >= 0.0 && *v <= 1.0));

        for i in 0..2 {
            let len = batch.label_lengths[i] as usize;
            assert_eq!(len, 2);
            // left aligned classes, fill sentinel beyond the true length
            for j in 0..10 {
                if j < len {
                    assert!(batch.labels[[i, j]] >= 0);
                } else {
                    assert_eq!(batch.labels[[i, j]], LABEL_FILL);
                }
            }
        }
    }

    #[test]
    fn labels_outside_the_alphabet_fail_the_batch() {
        let images = vec![GrayImage::from_pixel(151, 32, image::Luma([1]))];
        let labels = vec!["Aé".to_string()];
        let mut generator = DatasetGenerator::seeded(images, labels, 128, 64, 4, 10, 1, augmentor(2), 2);
        let batch = generator.generate(Some(1)).next().unwrap();
        assert!(batch.is_err());
    }
}
