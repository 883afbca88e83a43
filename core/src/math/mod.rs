pub mod complex;
pub mod fft;
pub mod stats;
pub mod window;

pub use fft::GateFft;
pub use window::WindowType;
