use image::GrayImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use std::convert::TryInto;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{GlprError, GlprErrorKind};
use crate::preprocess::Preprocessor;

// container layout: header | capacity image records | capacity label slots
const MAGIC: [u8; 4] = *b"GLPD";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 40;
const COUNT_OFFSET: u64 = 16;

pub const DEFAULT_BUF_SIZE: usize = 1000;

/// Append-only writer for one dataset container file.
///
/// Records are buffered in memory and flushed to the preallocated on-disk
/// arrays in bulk, so building a large corpus doesn't turn into one disk
/// write per image. The destination must not exist, delete it manually to
/// rebuild a dataset.
#[derive(Debug)]
pub struct DatasetWriter {
    file: File,
    capacity: u64,
    width: u32,
    height: u32,
    max_text_len: usize,
    // payload bytes per label slot, without the leading length byte
    label_slot: usize,
    buf_size: usize,
    image_buffer: Vec<GrayImage>,
    label_buffer: Vec<String>,
    // next free record position on disk
    index: u64,
}

impl DatasetWriter {

    pub fn create(path: impl AsRef<Path>, capacity: u64, width: u32, height: u32, max_text_len: usize) -> Result<Self, GlprError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(GlprErrorKind::AlreadyExists(path.to_path_buf()).into());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = match OpenOptions::new().read(true).write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(GlprErrorKind::AlreadyExists(path.to_path_buf()).into());
            },
            Err(e) => return Err(e.into()),
        };

        // worst case utf-8 width per character
        let label_slot = 4*max_text_len;
        let image_bytes = width as u64*height as u64;
        let total = HEADER_LEN + capacity*image_bytes + capacity*(1 + label_slot as u64);
        file.set_len(total)?;

        let mut writer = Self {
            file,
            capacity,
            width,
            height,
            max_text_len,
            label_slot,
            buf_size: DEFAULT_BUF_SIZE,
            image_buffer: Vec::new(),
            label_buffer: Vec::new(),
            index: 0,
        };
        writer.write_header()?;
        Ok(writer)
    }

    pub fn with_buf_size(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size.max(1);
        self
    }

    fn write_header(&mut self) -> Result<(), GlprError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&MAGIC)?;
        self.file.write_all(&VERSION.to_le_bytes())?;
        self.file.write_all(&self.capacity.to_le_bytes())?;
        self.file.write_all(&self.index.to_le_bytes())?;
        self.file.write_all(&self.height.to_le_bytes())?;
        self.file.write_all(&self.width.to_le_bytes())?;
        self.file.write_all(&(self.max_text_len as u32).to_le_bytes())?;
        self.file.write_all(&(self.label_slot as u32).to_le_bytes())?;
        Ok(())
    }

    /// Append images and their labels to the buffer, flushing to disk once
    /// the buffer holds `buf_size` records. Every record is validated before
    /// anything of the call is buffered.
    pub fn add(&mut self, images: Vec<GrayImage>, labels: Vec<String>) -> Result<(), GlprError> {
        if images.len() != labels.len() {
            return Err(GlprErrorKind::LengthMismatch { images: images.len(), labels: labels.len() }.into());
        }
        let pending = self.index + (self.image_buffer.len() + images.len()) as u64;
        if pending > self.capacity {
            return Err(GlprErrorKind::CapacityExceeded { capacity: self.capacity }.into());
        }
        for image in &images {
            if image.dimensions() != (self.width, self.height) {
                return Err(GlprErrorKind::ShapeMismatch {
                    expected: (self.width, self.height),
                    actual: image.dimensions(),
                }.into());
            }
        }
        for label in &labels {
            if label.chars().count() > self.max_text_len {
                return Err(GlprErrorKind::LabelTooLong {
                    label: label.clone(),
                    max_len: self.max_text_len,
                }.into());
            }
        }

        self.image_buffer.extend(images);
        self.label_buffer.extend(labels);
        if self.image_buffer.len() >= self.buf_size {
            self.flush()?;
        }
        Ok(())
    }

    // write the buffered records contiguously at the next free offset
    fn flush(&mut self) -> Result<(), GlprError> {
        let count = self.image_buffer.len() as u64;
        let image_bytes = self.width as u64*self.height as u64;

        self.file.seek(SeekFrom::Start(HEADER_LEN + self.index*image_bytes))?;
        for image in &self.image_buffer {
            self.file.write_all(image.as_raw())?;
        }

        let labels_offset = HEADER_LEN + self.capacity*image_bytes;
        let slot = 1 + self.label_slot as u64;
        self.file.seek(SeekFrom::Start(labels_offset + self.index*slot))?;
        let mut slot_buf = vec![0u8; slot as usize];
        for label in &self.label_buffer {
            let bytes = label.as_bytes();
            slot_buf.iter_mut().for_each(|b| *b = 0);
            slot_buf[0] = bytes.len() as u8;
            slot_buf[1..1 + bytes.len()].copy_from_slice(bytes);
            self.file.write_all(&slot_buf)?;
        }

        self.index += count;
        self.image_buffer.clear();
        self.label_buffer.clear();
        debug!(records = count, total = self.index, "flushed container buffer");
        Ok(())
    }

    /// Flush the remaining buffer, write the final record count and sync.
    pub fn close(mut self) -> Result<(), GlprError> {
        if !self.image_buffer.is_empty() {
            self.flush()?;
        }
        self.file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        self.file.write_all(&self.index.to_le_bytes())?;
        self.file.sync_all()?;
        info!(records = self.index, "container closed");
        Ok(())
    }

}

/// Loads a whole container into memory, optionally shuffled and truncated,
/// then runs each image through the configured preprocessor chain.
pub struct DatasetLoader {
    preprocessors: Vec<Box<dyn Preprocessor>>,
    rng: StdRng,
}

impl DatasetLoader {

    pub fn new() -> Self {
        Self::with_preprocessors(Vec::new())
    }

    pub fn with_preprocessors(preprocessors: Vec<Box<dyn Preprocessor>>) -> Self {
        Self { preprocessors, rng: StdRng::from_entropy() }
    }

    /// Deterministic shuffle order for a fixed seed.
    pub fn seeded(preprocessors: Vec<Box<dyn Preprocessor>>, seed: u64) -> Self {
        Self { preprocessors, rng: StdRng::seed_from_u64(seed) }
    }

    /// Read the full images and labels arrays. One random permutation is
    /// applied to both arrays when `shuffle` is set, so a record keeps its
    /// label. `max_items` truncates after the shuffle, which makes the cut
    /// a random subset instead of a file prefix.
    pub fn load(&mut self, path: impl AsRef<Path>, shuffle: bool, max_items: Option<usize>) -> Result<(Vec<GrayImage>, Vec<String>), GlprError> {
        let path = path.as_ref();
        let mut file = File::open(path)?;

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if header[0..4] != MAGIC {
            return Err(GlprErrorKind::CorruptContainer("bad magic".to_string()).into());
        }
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(GlprErrorKind::CorruptContainer(format!("unsupported version {}", version)).into());
        }
        let capacity = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let count = u64::from_le_bytes(header[16..24].try_into().unwrap());
        let height = u32::from_le_bytes(header[24..28].try_into().unwrap());
        let width = u32::from_le_bytes(header[28..32].try_into().unwrap());
        let label_slot = u32::from_le_bytes(header[36..40].try_into().unwrap()) as usize;
        if count > capacity {
            return Err(GlprErrorKind::CorruptContainer(format!("count {} above capacity {}", count, capacity)).into());
        }

        let image_bytes = width as usize*height as usize;
        let mut raw = vec![0u8; count as usize*image_bytes];
        file.read_exact(&mut raw)?;
        let mut images: Vec<GrayImage> = Vec::with_capacity(count as usize);
        for chunk in raw.chunks_exact(image_bytes) {
            let image = GrayImage::from_raw(width, height, chunk.to_vec())
                .ok_or_else(|| GlprError::from(GlprErrorKind::CorruptContainer("truncated image record".to_string())))?;
            images.push(image);
        }

        let labels_offset = HEADER_LEN + capacity*image_bytes as u64;
        file.seek(SeekFrom::Start(labels_offset))?;
        let slot = 1 + label_slot;
        let mut raw = vec![0u8; count as usize*slot];
        file.read_exact(&mut raw)?;
        let mut labels: Vec<String> = Vec::with_capacity(count as usize);
        for chunk in raw.chunks_exact(slot) {
            let len = chunk[0] as usize;
            if len > label_slot {
                return Err(GlprErrorKind::CorruptContainer("label length above slot size".to_string()).into());
            }
            let label = std::str::from_utf8(&chunk[1..1 + len])
                .map_err(|_| GlprError::from(GlprErrorKind::CorruptContainer("label is not utf-8".to_string())))?;
            labels.push(label.to_string());
        }

        if shuffle {
            let mut indexes: Vec<usize> = (0..images.len()).collect();
            indexes.shuffle(&mut self.rng);
            images = indexes.iter().map(|i| images[*i].clone()).collect();
            labels = indexes.iter().map(|i| labels[*i].clone()).collect();
        }

        if let Some(max_items) = max_items {
            images.truncate(max_items);
            labels.truncate(max_items);
        }

        for i in 0..images.len() {
            let mut image = std::mem::replace(&mut images[i], GrayImage::new(0, 0));
            for p in self.preprocessors.iter_mut() {
                image = p.preprocess(image);
            }
            images[i] = image;
        }

        info!(records = images.len(), path = %path.display(), "loaded container");
        Ok((images, labels))
    }

}

impl Default for DatasetLoader {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod test {

    use image::GrayImage;

    use std::fs;
    use std::path::PathBuf;

    use super::{DatasetLoader, DatasetWriter};
    use crate::error::GlprErrorKind;

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("glpr-dataset-{}-{}", std::process::id(), name));
        let _ = fs::remove_file(&path);
        path
    }

    // every pixel carries the record number, so image/label pairing is checkable
    fn sample_image(value: u8) -> GrayImage {
        GrayImage::from_pixel(5, 3, image::Luma([value]))
    }

    #[test]
    fn write_then_load_preserves_insertion_order() {
        let path = temp_path("order");
        let mut writer = DatasetWriter::create(&path, 5, 5, 3, 10).unwrap().with_buf_size(2);
        for i in 0..5u8 {
            writer.add(vec![sample_image(i)], vec![format!("A{}", i)]).unwrap();
        }
        writer.close().unwrap();

        let mut loader = DatasetLoader::new();
        let (images, labels) = loader.load(&path, false, None).unwrap();
        assert_eq!(images.len(), 5);
        assert_eq!(labels.len(), 5);
        for i in 0..5u8 {
            assert_eq!(images[i as usize].get_pixel(0, 0).0[0], i);
            assert_eq!(labels[i as usize], format!("A{}", i));
        }
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn create_refuses_existing_path() {
        let path = temp_path("exists");
        let writer = DatasetWriter::create(&path, 1, 5, 3, 10).unwrap();
        writer.close().unwrap();

        let res = DatasetWriter::create(&path, 1, 5, 3, 10);
        assert!(matches!(res.unwrap_err().kind(), GlprErrorKind::AlreadyExists(_)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn add_rejects_wrong_shape_and_long_labels() {
        let path = temp_path("reject");
        let mut writer = DatasetWriter::create(&path, 4, 5, 3, 4).unwrap();

        let res = writer.add(vec![GrayImage::new(4, 3)], vec!["A".to_string()]);
        assert!(matches!(res.unwrap_err().kind(), GlprErrorKind::ShapeMismatch { .. }));

        let res = writer.add(vec![sample_image(0)], vec!["TOOLONG".to_string()]);
        assert!(matches!(res.unwrap_err().kind(), GlprErrorKind::LabelTooLong { .. }));

        let res = writer.add(vec![sample_image(0)], vec![]);
        assert!(matches!(res.unwrap_err().kind(), GlprErrorKind::LengthMismatch { .. }));

        // rejected records must not occupy container slots
        writer.add(vec![sample_image(7)], vec!["OK".to_string()]).unwrap();
        writer.close().unwrap();
        let (images, labels) = DatasetLoader::new().load(&path, false, None).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(labels[0], "OK");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn add_rejects_records_above_capacity() {
        let path = temp_path("capacity");
        let mut writer = DatasetWriter::create(&path, 2, 5, 3, 10).unwrap();
        writer.add(vec![sample_image(0), sample_image(1)], vec!["A".to_string(), "B".to_string()]).unwrap();
        let res = writer.add(vec![sample_image(2)], vec!["C".to_string()]);
        assert!(matches!(res.unwrap_err().kind(), GlprErrorKind::CapacityExceeded { .. }));
        writer.close().unwrap();
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn partial_buffer_is_flushed_on_close() {
        let path = temp_path("partial");
        let mut writer = DatasetWriter::create(&path, 3, 5, 3, 10).unwrap().with_buf_size(1000);
        writer.add(vec![sample_image(0), sample_image(1), sample_image(2)],
            vec!["A".to_string(), "B".to_string(), "C".to_string()]).unwrap();
        writer.close().unwrap();

        let (images, _) = DatasetLoader::new().load(&path, false, None).unwrap();
        assert_eq!(images.len(), 3);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn shuffled_load_keeps_pairs_aligned() {
        let path = temp_path("shuffle");
        let mut writer = DatasetWriter::create(&path, 10, 5, 3, 10).unwrap().with_buf_size(4);
        for i in 0..10u8 {
            writer.add(vec![sample_image(i)], vec![format!("A{}", i)]).unwrap();
        }
        writer.close().unwrap();

        let mut loader = DatasetLoader::seeded(Vec::new(), 99);
        let (images, labels) = loader.load(&path, true, Some(4)).unwrap();
        assert_eq!(images.len(), 4);
        assert_eq!(labels.len(), 4);
        for (image, label) in images.iter().zip(&labels) {
            let record: u8 = label[1..].parse().unwrap();
            assert_eq!(image.get_pixel(0, 0).0[0], record);
        }

        // same seed gives the same permutation
        let mut loader = DatasetLoader::seeded(Vec::new(), 99);
        let (_, labels_again) = loader.load(&path, true, Some(4)).unwrap();
        assert_eq!(labels, labels_again);

        // unshuffled loads keep insertion order
        let (_, in_order) = DatasetLoader::new().load(&path, false, None).unwrap();
        let expected: Vec<String> = (0..10).map(|i| format!("A{}", i)).collect();
        assert_eq!(in_order, expected);
        let _ = fs::remove_file(&path);
    }
}
