//! Эмуляция X-сервера с простым оконным менеджером в памяти.
//!
//! Используется в режиме `--dry-run` и в тестах: запросы копятся до `flush`,
//! после чего «сервер» применяет их и ставит в очередь те же уведомления,
//! что прислал бы настоящий X-сервер.

use super::atoms::{Atom, AtomName, Atoms};
use super::event::NativeEvent;
use super::transport::{ConfigureRequest, PropertyValue, Transport};
use super::WindowId;
use crate::error::{AutkError, ConnectionErrorKind, Result};
use crate::utils::PosixPipe;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use tracing::{debug, info, trace};

const RESOURCE_BASE: u32 = 0x0040_0000;
const FIRST_ATOM: Atom = 0x100;
const CASCADE_STEP: i16 = 32;
const BAD_WINDOW: u8 = 3;

/// Данные свойства в том виде, в каком их сохранил сервер
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyData {
    Bytes(Vec<u8>),
    Atoms(Vec<Atom>),
}

impl From<PropertyValue<'_>> for PropertyData {
    fn from(value: PropertyValue<'_>) -> Self {
        match value {
            PropertyValue::Bytes(data) => PropertyData::Bytes(data.to_vec()),
            PropertyValue::Atoms(data) => PropertyData::Atoms(data.to_vec()),
        }
    }
}

/// Запрос, полученный сервером
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateWindow {
        window: WindowId,
        width: u16,
        height: u16,
    },
    DestroyWindow(WindowId),
    MapWindow(WindowId),
    UnmapWindow(WindowId),
    ConfigureWindow(WindowId, ConfigureRequest),
    ChangeProperty {
        window: WindowId,
        property: Atom,
        ty: Atom,
        data: PropertyData,
    },
}

impl Request {
    pub fn window(&self) -> WindowId {
        match self {
            Request::CreateWindow { window, .. } | Request::ChangeProperty { window, .. } => *window,
            Request::DestroyWindow(window)
            | Request::MapWindow(window)
            | Request::UnmapWindow(window)
            | Request::ConfigureWindow(window, _) => *window,
        }
    }
}

/// Состояние окна на стороне сервера
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerWindow {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub mapped: bool,
    /// Оконный менеджер уже выбрал позицию для окна
    pub placed: bool,
    pub properties: HashMap<Atom, (Atom, PropertyData)>,
}

struct ServerState {
    next_id: u32,
    windows: HashMap<WindowId, ServerWindow>,
    outgoing: Vec<Request>,
    processed: Vec<Request>,
    events: VecDeque<NativeEvent>,
    sequence: u16,
    placed_count: i16,
    window_manager: bool,
    failure: Option<ConnectionErrorKind>,
    closed: bool,
    signal: PosixPipe,
    // Байтов в сигнальном канале; не больше, чем событий в очереди
    signalled: usize,
}

impl ServerState {
    fn push_event(&mut self, event: NativeEvent) {
        self.events.push_back(event);
        // Один байт на событие: дескриптор готов, пока очередь не пуста.
        // Полный канал готов к чтению и без этого байта.
        match self.signal.writer.write(&[1]) {
            Ok(_) => self.signalled += 1,
            Err(e) => trace!("Сигнальный канал эмулятора не принял байт: {}", e),
        }
    }

    fn pop_event(&mut self) -> Option<NativeEvent> {
        let event = self.events.pop_front()?;
        // Байт забираем, только когда событий стало меньше, чем байтов в канале
        if self.events.len() < self.signalled {
            let mut byte = [0u8; 1];
            match self.signal.reader.read(&mut byte) {
                Ok(_) => self.signalled -= 1,
                Err(e) => trace!("Сигнальный канал эмулятора не отдал байт: {}", e),
            }
        }
        Some(event)
    }

    fn bad_window(&mut self, window: WindowId) {
        let sequence = self.sequence;
        self.push_event(NativeEvent::Error {
            code: BAD_WINDOW,
            sequence,
            bad_value: window,
        });
    }

    fn apply(&mut self, request: Request) {
        self.sequence = self.sequence.wrapping_add(1);
        debug!("[DRY RUN] Сервер обрабатывает {:?}", request);

        match &request {
            Request::CreateWindow {
                window,
                width,
                height,
            } => {
                self.windows.insert(
                    *window,
                    ServerWindow {
                        width: *width,
                        height: *height,
                        ..ServerWindow::default()
                    },
                );
            }
            Request::DestroyWindow(window) => match self.windows.remove(window) {
                Some(state) => {
                    if state.mapped {
                        self.push_event(NativeEvent::UnmapNotify { window: *window });
                    }
                    self.push_event(NativeEvent::DestroyNotify { window: *window });
                }
                None => self.bad_window(*window),
            },
            Request::MapWindow(window) => self.map(*window),
            Request::UnmapWindow(window) => match self.windows.get_mut(window) {
                Some(state) if state.mapped => {
                    state.mapped = false;
                    self.push_event(NativeEvent::UnmapNotify { window: *window });
                }
                Some(_) => {}
                None => self.bad_window(*window),
            },
            Request::ConfigureWindow(window, change) => self.configure(*window, *change),
            Request::ChangeProperty {
                window,
                property,
                ty,
                data,
            } => match self.windows.get_mut(window) {
                Some(state) => {
                    state.properties.insert(*property, (*ty, data.clone()));
                }
                None => self.bad_window(*window),
            },
        }

        self.processed.push(request);
    }

    fn map(&mut self, window: WindowId) {
        let window_manager = self.window_manager;
        let cascade = self.placed_count;
        let Some(state) = self.windows.get_mut(&window) else {
            self.bad_window(window);
            return;
        };
        if state.mapped {
            return;
        }
        state.mapped = true;

        let placement = if window_manager && !state.placed {
            state.placed = true;
            let offset = CASCADE_STEP.saturating_mul(cascade.saturating_add(1));
            Some((offset, offset, state.width, state.height))
        } else {
            None
        };

        self.push_event(NativeEvent::MapNotify { window });
        if let Some((x, y, width, height)) = placement {
            self.placed_count = self.placed_count.saturating_add(1);
            // Оконный менеджер сообщает положение рамки в координатах корня
            self.push_event(NativeEvent::ConfigureNotify {
                window,
                synthetic: true,
                x,
                y,
                width,
                height,
            });
        }
    }

    fn configure(&mut self, window: WindowId, change: ConfigureRequest) {
        let window_manager = self.window_manager;
        let Some(state) = self.windows.get_mut(&window) else {
            self.bad_window(window);
            return;
        };

        let moved = change.x.is_some_and(|x| x != state.x) || change.y.is_some_and(|y| y != state.y);
        state.x = change.x.unwrap_or(state.x);
        state.y = change.y.unwrap_or(state.y);
        state.width = change.width.unwrap_or(state.width);
        state.height = change.height.unwrap_or(state.height);
        let (x, y, width, height) = (state.x, state.y, state.width, state.height);

        self.push_event(NativeEvent::ConfigureNotify {
            window,
            synthetic: false,
            x,
            y,
            width,
            height,
        });
        if window_manager && moved {
            self.push_event(NativeEvent::ConfigureNotify {
                window,
                synthetic: true,
                x,
                y,
                width,
                height,
            });
        }
    }
}

/// Управляющий дескриптор эмулированного сервера (для тестов и отладки)
#[derive(Clone)]
pub struct DryRunServer {
    state: Rc<RefCell<ServerState>>,
    atoms: Atoms,
}

impl DryRunServer {
    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    /// Оконный менеджер просит закрыть окно (WM_DELETE_WINDOW)
    pub fn request_close(&self, window: WindowId) {
        self.inject(NativeEvent::ClientMessage {
            window,
            message_type: self.atoms.get(AtomName::WmProtocols),
            format: 32,
            data: [self.atoms.get(AtomName::WmDeleteWindow), 0, 0, 0, 0],
        });
    }

    /// Запросы, уже применённые сервером (после flush)
    pub fn requests(&self) -> Vec<Request> {
        self.state.borrow().processed.clone()
    }

    pub fn requests_for(&self, window: WindowId) -> Vec<Request> {
        self.state
            .borrow()
            .processed
            .iter()
            .filter(|r| r.window() == window)
            .cloned()
            .collect()
    }

    /// Запросы, ожидающие flush
    pub fn pending_requests(&self) -> usize {
        self.state.borrow().outgoing.len()
    }

    pub fn window(&self, window: WindowId) -> Option<ServerWindow> {
        self.state.borrow().windows.get(&window).cloned()
    }

    pub fn property(&self, window: WindowId, property: Atom) -> Option<(Atom, PropertyData)> {
        self.state
            .borrow()
            .windows
            .get(&window)
            .and_then(|w| w.properties.get(&property).cloned())
    }

    /// Поставить произвольное событие в очередь, как будто его прислал сервер
    pub fn inject(&self, event: NativeEvent) {
        self.state.borrow_mut().push_event(event);
    }

    /// Уничтожить окно со стороны сервера (например, умер родительский дисплей)
    pub fn destroy_remotely(&self, window: WindowId) {
        let mut state = self.state.borrow_mut();
        state.apply(Request::DestroyWindow(window));
        state.processed.pop();
    }

    pub fn set_window_manager(&self, enabled: bool) {
        self.state.borrow_mut().window_manager = enabled;
    }

    /// Смоделировать обрыв соединения
    pub fn break_connection(&self, kind: ConnectionErrorKind) {
        self.state.borrow_mut().failure = Some(kind);
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

pub struct DryRunTransport {
    server: DryRunServer,
    atoms: Atoms,
    fd: RawFd,
}

impl DryRunTransport {
    pub fn new() -> Result<Self> {
        let signal = PosixPipe::new(true)?;
        let fd = signal.reader.as_raw_fd();

        let mut next_atom = FIRST_ATOM;
        let atoms = Atoms::intern(
            |name| {
                let atom = next_atom;
                next_atom += 1;
                debug!("[DRY RUN] InternAtom {} -> {}", name, atom);
                Ok(atom)
            },
            |_, atom| Ok(atom),
        )?;

        info!("Dry-run: эмулированный X-сервер готов");
        Ok(Self {
            server: DryRunServer {
                state: Rc::new(RefCell::new(ServerState {
                    next_id: RESOURCE_BASE,
                    windows: HashMap::new(),
                    outgoing: Vec::new(),
                    processed: Vec::new(),
                    events: VecDeque::new(),
                    sequence: 0,
                    placed_count: 0,
                    window_manager: true,
                    failure: None,
                    closed: false,
                    signal,
                    signalled: 0,
                })),
                atoms: atoms.clone(),
            },
            atoms,
            fd,
        })
    }

    pub fn server(&self) -> DryRunServer {
        self.server.clone()
    }

    fn submit(&mut self, request: Request) -> Result<()> {
        self.check_connection()?;
        self.server.state.borrow_mut().outgoing.push(request);
        Ok(())
    }
}

impl Transport for DryRunTransport {
    fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    fn generate_id(&mut self) -> Result<WindowId> {
        self.check_connection()?;
        let mut state = self.server.state.borrow_mut();
        state.next_id += 1;
        Ok(state.next_id)
    }

    fn create_window(&mut self, window: WindowId, width: u16, height: u16) -> Result<()> {
        self.submit(Request::CreateWindow {
            window,
            width,
            height,
        })
    }

    fn destroy_window(&mut self, window: WindowId) -> Result<()> {
        self.submit(Request::DestroyWindow(window))
    }

    fn map_window(&mut self, window: WindowId) -> Result<()> {
        self.submit(Request::MapWindow(window))
    }

    fn unmap_window(&mut self, window: WindowId) -> Result<()> {
        self.submit(Request::UnmapWindow(window))
    }

    fn configure_window(&mut self, window: WindowId, request: ConfigureRequest) -> Result<()> {
        self.submit(Request::ConfigureWindow(window, request))
    }

    fn change_property(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        value: PropertyValue<'_>,
    ) -> Result<()> {
        self.submit(Request::ChangeProperty {
            window,
            property,
            ty,
            data: value.into(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.check_connection()?;
        let mut state = self.server.state.borrow_mut();
        let outgoing = std::mem::take(&mut state.outgoing);
        for request in outgoing {
            state.apply(request);
        }
        Ok(())
    }

    fn check_connection(&self) -> Result<()> {
        let state = self.server.state.borrow();
        if let Some(kind) = state.failure {
            return Err(AutkError::connection(kind, "dry-run: соединение разорвано"));
        }
        if state.closed {
            return AutkError::invalid_state("dry-run: соединение закрыто");
        }
        Ok(())
    }

    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    fn poll_for_event(&mut self) -> Result<Option<NativeEvent>> {
        self.check_connection()?;
        Ok(self.server.state.borrow_mut().pop_event())
    }

    fn close(&mut self) {
        let mut state = self.server.state.borrow_mut();
        if !state.closed {
            state.closed = true;
            state.outgoing.clear();
            info!("Dry-run: соединение закрыто");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::poll_readable;
    use std::time::Duration;

    #[test]
    fn requests_apply_only_on_flush() {
        let mut transport = DryRunTransport::new().unwrap();
        let server = transport.server();
        let id = transport.generate_id().unwrap();

        transport.create_window(id, 100, 50).unwrap();
        transport.map_window(id).unwrap();
        assert_eq!(server.pending_requests(), 2);
        assert!(server.window(id).is_none());

        transport.flush().unwrap();
        assert_eq!(server.pending_requests(), 0);
        assert!(server.window(id).unwrap().mapped);
        assert_eq!(transport.poll_for_event().unwrap(), Some(NativeEvent::MapNotify { window: id }));
    }

    #[test]
    fn descriptor_is_readable_while_events_are_queued() {
        let mut transport = DryRunTransport::new().unwrap();
        let server = transport.server();
        let fd = transport.as_raw_fd();

        let [idle] = poll_readable([fd], Some(Duration::ZERO)).unwrap();
        assert!(!idle.readable);

        server.inject(NativeEvent::Unknown { response_type: 40 });
        let [ready] = poll_readable([fd], Some(Duration::ZERO)).unwrap();
        assert!(ready.readable);

        assert!(transport.poll_for_event().unwrap().is_some());
        let [drained] = poll_readable([fd], Some(Duration::ZERO)).unwrap();
        assert!(!drained.readable);
    }

    #[test]
    fn descriptor_stays_readable_when_events_outgrow_signal_pipe() {
        // Больше стандартной ёмкости канала в 64 КиБ
        const EVENTS: usize = 1 << 17;

        let mut transport = DryRunTransport::new().unwrap();
        let server = transport.server();
        let fd = transport.as_raw_fd();
        for _ in 0..EVENTS {
            server.inject(NativeEvent::Unknown { response_type: 40 });
        }

        for remaining in (0..EVENTS).rev() {
            assert!(transport.poll_for_event().unwrap().is_some());
            if remaining % 4096 == 0 {
                let [state] = poll_readable([fd], Some(Duration::ZERO)).unwrap();
                assert_eq!(state.readable, remaining > 0, "осталось {}", remaining);
            }
        }
        assert_eq!(transport.poll_for_event().unwrap(), None);
    }

    #[test]
    fn window_manager_places_window_with_synthetic_configure() {
        let mut transport = DryRunTransport::new().unwrap();
        let id = transport.generate_id().unwrap();
        transport.create_window(id, 640, 480).unwrap();
        transport.map_window(id).unwrap();
        transport.flush().unwrap();

        assert_eq!(transport.poll_for_event().unwrap(), Some(NativeEvent::MapNotify { window: id }));
        assert_eq!(
            transport.poll_for_event().unwrap(),
            Some(NativeEvent::ConfigureNotify {
                window: id,
                synthetic: true,
                x: 32,
                y: 32,
                width: 640,
                height: 480,
            })
        );
        assert_eq!(transport.poll_for_event().unwrap(), None);
    }

    #[test]
    fn requests_for_unknown_window_produce_bad_window() {
        let mut transport = DryRunTransport::new().unwrap();
        transport.map_window(0xdead).unwrap();
        transport.flush().unwrap();
        assert!(matches!(
            transport.poll_for_event().unwrap(),
            Some(NativeEvent::Error { code: BAD_WINDOW, bad_value: 0xdead, .. })
        ));
    }

    #[test]
    fn broken_connection_fails_every_call() {
        let mut transport = DryRunTransport::new().unwrap();
        transport.server().break_connection(ConnectionErrorKind::Io);
        let err = transport.flush().unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Io));
        assert!(transport.generate_id().is_err());
    }
}
