//! Провайдер дисплея: владеет соединением, реестром окон и циклом событий.

use super::atoms::{AtomName, ATOM_ATOM};
use super::event::Notification;
use super::transport::{create_transport, PropertyValue, Transport};
use super::wakeup::{Drained, LoopProxy, WakeupChannel};
use super::window::{clamp_size, WindowProvider};
use super::WindowId;
use crate::error::{AutkError, ConnectionErrorKind, Result};
use crate::events::{Size, WindowStyle};
use crate::utils::poll_readable;
use crate::{autk_error, debug_if_enabled};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, error, info};

struct DisplayState {
    transport: Option<Box<dyn Transport>>,
    registry: HashMap<WindowId, Weak<WindowProvider>>,
    /// Приходили ли уже синтетические ConfigureNotify
    synthetic_configure_seen: bool,
}

pub(crate) struct DisplayShared {
    state: RefCell<DisplayState>,
    wakeup: WakeupChannel,
    running: Cell<bool>,
    disposed: Cell<bool>,
}

impl DisplayShared {
    pub(super) fn with_transport<R>(
        &self,
        f: impl FnOnce(&mut dyn Transport) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.borrow_mut();
        match state.transport.as_mut() {
            Some(transport) => f(transport.as_mut()),
            None => AutkError::invalid_state("соединение с дисплеем закрыто"),
        }
    }

    pub(super) fn unregister(&self, id: WindowId) {
        self.state.borrow_mut().registry.remove(&id);
    }

    /// Доставить уведомление окну-владельцу.
    ///
    /// Заимствование состояния отпускается до вызова провайдера: обработчики
    /// окна могут снова обращаться к дисплею.
    fn dispatch(&self, id: WindowId, notification: Notification) {
        let (provider, trust_location) = {
            let mut state = self.state.borrow_mut();
            let Some(provider) = state.registry.get(&id).and_then(Weak::upgrade) else {
                debug_if_enabled!("Устаревшее событие {:?} для окна {:#x}", notification, id);
                return;
            };

            let trust_location = match notification {
                Notification::Configured { synthetic, .. } => {
                    if synthetic {
                        state.synthetic_configure_seen = true;
                    }
                    synthetic == state.synthetic_configure_seen
                }
                _ => true,
            };
            (provider, trust_location)
        };

        match notification {
            Notification::CloseRequested => provider.on_close_requested(),
            Notification::Destroyed => {
                debug!("Окно {:#x} уничтожено сервером", id);
                self.unregister(id);
                provider.invalidate();
            }
            Notification::Mapped => provider.on_visibility_changed(true),
            Notification::Unmapped => provider.on_visibility_changed(false),
            Notification::Configured { location, size, .. } => {
                provider.on_configured(trust_location.then_some(location), size)
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        info!("Закрытие дисплея");

        let (transport, windows) = {
            let mut state = self.state.borrow_mut();
            let mut windows: Vec<_> = state.registry.drain().collect();
            windows.sort_by_key(|(id, _)| *id);
            (state.transport.take(), windows)
        };

        if let Some(mut transport) = transport {
            transport.close();
        }
        self.wakeup.close();

        for (_, window) in windows {
            if let Some(window) = window.upgrade() {
                window.invalidate();
            }
        }
    }
}

struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct DisplayProvider {
    shared: Rc<DisplayShared>,
}

impl DisplayProvider {
    /// Подключиться к X-серверу; `None` означает `$DISPLAY`
    pub fn open(display_name: Option<&str>) -> Result<Self> {
        Self::with_transport(create_transport(display_name, false)?)
    }

    pub fn with_transport(transport: Box<dyn Transport>) -> Result<Self> {
        let wakeup = WakeupChannel::new()?;
        Ok(Self {
            shared: Rc::new(DisplayShared {
                state: RefCell::new(DisplayState {
                    transport: Some(transport),
                    registry: HashMap::new(),
                    synthetic_configure_seen: false,
                }),
                wakeup,
                running: Cell::new(false),
                disposed: Cell::new(false),
            }),
        })
    }

    pub fn create_window(&self, style: WindowStyle, size: Size) -> Result<Rc<WindowProvider>> {
        let (width, height) = clamp_size(size);

        let id = self.shared.with_transport(|t| {
            let id = t.generate_id()?;
            t.create_window(id, width, height)?;

            let atoms = t.atoms();
            let protocols = atoms.get(AtomName::WmProtocols);
            let delete_window = atoms.get(AtomName::WmDeleteWindow);
            let window_type = atoms.get(AtomName::NetWmWindowType);
            let style_type = atoms.get(AtomName::window_type(style));

            t.change_property(id, protocols, ATOM_ATOM, PropertyValue::Atoms(&[delete_window]))?;
            t.change_property(id, window_type, ATOM_ATOM, PropertyValue::Atoms(&[style_type]))?;
            Ok(id)
        })?;

        let provider = Rc::new(WindowProvider::new(
            Rc::downgrade(&self.shared),
            id,
            style,
            Size::new(width.into(), height.into()),
        ));
        self.shared
            .state
            .borrow_mut()
            .registry
            .insert(id, Rc::downgrade(&provider));

        info!("Создано окно {:#x} ({:?}, {}x{})", id, style, width, height);
        Ok(provider)
    }

    /// Живое окно по идентификатору
    pub fn window(&self, id: WindowId) -> Option<Rc<WindowProvider>> {
        self.shared.state.borrow().registry.get(&id).and_then(Weak::upgrade)
    }

    pub fn window_count(&self) -> usize {
        self.shared.state.borrow().registry.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.get()
    }

    pub fn proxy(&self) -> LoopProxy {
        self.shared.wakeup.proxy()
    }

    pub fn post_quit(&self) -> Result<()> {
        self.shared.wakeup.post_quit()
    }

    pub fn post_action(&self, action: impl FnOnce() + Send + 'static) -> Result<()> {
        self.shared.wakeup.post_action(action)
    }

    /// Цикл событий. Возвращается после маркера выхода или закрытия дисплея.
    pub fn run(&self) -> Result<()> {
        if self.shared.running.get() {
            return AutkError::invalid_state("цикл событий уже запущен");
        }
        let transport_fd = self.shared.with_transport(|t| Ok(t.as_raw_fd()))?;
        let wakeup_fd = self
            .shared
            .wakeup
            .as_raw_fd()
            .ok_or_else(|| autk_error!(invalid_state, "канал пробуждения закрыт"))?;

        self.shared.running.set(true);
        let _guard = RunningGuard(&self.shared.running);
        info!("Цикл событий запущен");

        let result = self.run_loop(transport_fd, wakeup_fd);
        match &result {
            Ok(()) => info!("Цикл событий остановлен"),
            Err(e) => error!("Цикл событий прерван: {}", e),
        }
        result
    }

    fn run_loop(&self, transport_fd: RawFd, wakeup_fd: RawFd) -> Result<()> {
        loop {
            if self.is_disposed() {
                return Ok(());
            }

            let buffered = self.shared.with_transport(|t| {
                t.flush()?;
                t.check_connection()?;
                t.has_buffered_events()
            })?;

            // Уже прочитанные события не разбудят poll, поэтому не спим
            let timeout = buffered.then_some(Duration::ZERO);
            let [native, wakeup] = poll_readable([transport_fd, wakeup_fd], timeout)?;

            if native.error || native.hangup {
                return Err(AutkError::connection(
                    ConnectionErrorKind::Io,
                    "сокет X11 закрыт или в ошибке",
                ));
            }
            if wakeup.error || wakeup.hangup {
                return Err(AutkError::Wakeup(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "канал пробуждения закрыт или в ошибке",
                )));
            }

            if native.readable || buffered {
                self.dispatch_pending()?;
            }

            if wakeup.readable && !self.is_disposed() {
                if self.shared.wakeup.drain_one()? == Drained::Quit {
                    return Ok(());
                }
            }
        }
    }

    /// Разобрать все события, которые транспорт уже может выдать
    fn dispatch_pending(&self) -> Result<()> {
        loop {
            let decoded = {
                let mut state = self.shared.state.borrow_mut();
                let Some(transport) = state.transport.as_mut() else {
                    return Ok(());
                };
                let Some(event) = transport.poll_for_event()? else {
                    return Ok(());
                };
                event.decode(transport.atoms())
            };

            if let Some((id, notification)) = decoded {
                self.shared.dispatch(id, notification);
            }
        }
    }

    /// Закрыть соединение и сделать недействительными все окна.
    /// Повторный вызов ничего не делает.
    pub fn dispose(&self) {
        self.shared.dispose();
    }
}

impl Drop for DisplayProvider {
    fn drop(&mut self) {
        self.dispose();
    }
}
