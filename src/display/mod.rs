pub mod atoms;
pub mod dry_run;
pub mod event;
pub mod provider;
pub mod transport;
pub mod wakeup;
pub mod window;
pub mod x11;

/// Идентификатор окна, выданный сервером (XID)
pub type WindowId = u32;

pub use dry_run::{DryRunServer, DryRunTransport};
pub use provider::DisplayProvider;
pub use transport::{create_transport, Transport};
pub use wakeup::LoopProxy;
pub use window::{WindowNotification, WindowProvider};
