//! Минимальный набор для окон верхнего уровня поверх X11.
//!
//! Приложение владеет единственным соединением с дисплеем и циклом событий,
//! который ждёт одновременно сокет X11 и канал пробуждения. Окна не рисуют
//! ничего сами: они лишь показываются, двигаются, меняют размер и сообщают
//! об этом через [`WindowEvent`].

pub mod application;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod utils;
pub mod window;

pub use application::{Application, ApplicationHandler};
pub use config::Config;
pub use display::LoopProxy;
pub use error::{AutkError, ConnectionErrorKind, Result};
pub use events::{Point, Size, WindowEvent, WindowStyle};
pub use window::{Window, WindowHandler};
