pub mod notifier;
pub mod pipe;

pub use notifier::Notifier;
pub use pipe::{poll_readable, PosixPipe, Readiness};

// ✅ Макросы условного логирования для горячего пути цикла событий
#[macro_export]
macro_rules! debug_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! trace_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!($($arg)*);
        }
    };
}
