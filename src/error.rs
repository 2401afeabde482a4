use image::ImageError;

use std::error::Error;
use std::fmt;
use std::io::Error as IOError;
use std::path::PathBuf;

#[derive(Debug)]
pub struct GlprError(GlprErrorKind);

#[derive(Debug)]
pub enum GlprErrorKind {
    IOError(IOError),
    ImageError(ImageError),
    /// writer refuses to touch an existing container file
    AlreadyExists(PathBuf),
    /// image dimensions don't match the declared container shape, (width, height)
    ShapeMismatch { expected: (u32, u32), actual: (u32, u32) },
    LabelTooLong { label: String, max_len: usize },
    /// a label character has no class index in the alphabet
    UnknownCharacter(char),
    /// images and labels passed to the writer differ in length
    LengthMismatch { images: usize, labels: usize },
    /// more records added than the container was created for
    CapacityExceeded { capacity: u64 },
    CorruptContainer(String),
    /// a background image is smaller than the augmentor output shape, (width, height)
    BackgroundTooSmall { index: usize, actual: (u32, u32), required: (u32, u32) },
}

impl GlprError {
    pub fn kind(&self) -> &GlprErrorKind {
        &self.0
    }
}

impl<T> From<T> for GlprError
where T: Into<GlprErrorKind>
{
    fn from(e: T) -> Self {
        Self(e.into())
    }
}

impl fmt::Display for GlprError {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            GlprErrorKind::IOError(e) => e.fmt(f),
            GlprErrorKind::ImageError(e) => e.fmt(f),
            GlprErrorKind::AlreadyExists(path) => {
                write!(f, "container {:?} already exists, delete it manually before writing", path)
            },
            GlprErrorKind::ShapeMismatch { expected, actual } => {
                write!(f, "image shape {}x{} doesn't match container shape {}x{}",
                    actual.0, actual.1, expected.0, expected.1)
            },
            GlprErrorKind::LabelTooLong { label, max_len } => {
                write!(f, "label {:?} is longer than {} characters", label, max_len)
            },
            GlprErrorKind::UnknownCharacter(c) => {
                write!(f, "character {:?} is not in the alphabet", c)
            },
            GlprErrorKind::LengthMismatch { images, labels } => {
                write!(f, "got {} images but {} labels", images, labels)
            },
            GlprErrorKind::CapacityExceeded { capacity } => {
                write!(f, "container was created for {} records", capacity)
            },
            GlprErrorKind::CorruptContainer(msg) => {
                write!(f, "corrupt container: {}", msg)
            },
            GlprErrorKind::BackgroundTooSmall { index, actual, required } => {
                write!(f, "background image {} is {}x{}, augmentor needs at least {}x{}",
                    index, actual.0, actual.1, required.0, required.1)
            },
        }
    }
}

impl Error for GlprError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.kind() {
            GlprErrorKind::IOError(e) => Some(e),
            GlprErrorKind::ImageError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IOError> for GlprErrorKind {
    fn from(e: IOError) -> Self {
        Self::IOError(e)
    }
}

impl From<ImageError> for GlprErrorKind {
    fn from(e: ImageError) -> Self {
        Self::ImageError(e)
    }
}
