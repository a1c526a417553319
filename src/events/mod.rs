pub mod window;

pub use window::{Point, Size, WindowEvent, WindowStyle};
