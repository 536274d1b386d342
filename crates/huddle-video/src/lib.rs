pub mod facade;
pub mod h264;
pub mod jpeg;
pub mod pixel;

pub use facade::{h264_available, CodecFacade};
pub use pixel::PixelBuffer;
