pub mod augment;
pub mod codec;
pub mod dataset;
pub mod error;
pub mod generator;
pub mod preprocess;
pub mod utils;

// network input size
pub const IMAGE_WIDTH: u32 = 128;
pub const IMAGE_HEIGHT: u32 = 64;

// size the plate images are rendered at before augmentation
pub const PLATE_WIDTH: u32 = 151;
pub const PLATE_HEIGHT: u32 = 32;

// background tiles are stored square at this side length
pub const BACKGROUND_SIZE: u32 = 256;

pub const MAX_TEXT_LEN: usize = 10;
// pool size ** number of pool layers in the recognition network
pub const DOWNSAMPLE_FACTOR: u32 = 4;
