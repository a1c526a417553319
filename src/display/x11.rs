use super::atoms::{Atom, Atoms};
use super::event::NativeEvent;
use super::transport::{ConfigureRequest, PropertyValue, Transport};
use super::WindowId;
use crate::autk_error;
use crate::error::{AutkError, ConnectionErrorKind, Result};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, error, info};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::xproto::{
    ConfigureWindowAux, ConnectionExt as _, CreateWindowAux, EventMask, PropMode, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

/// Транспорт поверх XCB-протокола (x11rb)
pub struct X11Transport {
    conn: Option<RustConnection>,
    fd: RawFd,
    root: u32,
    root_depth: u8,
    root_visual: u32,
    atoms: Atoms,
    failure: Option<(ConnectionErrorKind, String)>,
    peeked: Option<Event>,
}

impl X11Transport {
    pub fn connect(display_name: Option<&str>) -> Result<Self> {
        info!(
            "Подключение к X11 дисплею: {}",
            display_name.unwrap_or("$DISPLAY")
        );

        let (conn, screen_num) = x11rb::connect(display_name).map_err(map_connect_error)?;

        let screen = conn.setup().roots.get(screen_num).ok_or_else(|| {
            autk_error!(
                connection,
                ConnectionErrorKind::InvalidScreen,
                "экран по умолчанию {} отсутствует",
                screen_num
            )
        })?;
        let (root, root_depth, root_visual) = (screen.root, screen.root_depth, screen.root_visual);

        // Все InternAtom уходят одним пакетом, ответы собираются после
        let atoms = Atoms::intern(
            |name| {
                conn.intern_atom(false, name.as_bytes())
                    .map_err(|e| map_connection_error(&e))
            },
            |name, cookie| cookie.reply().map(|r| r.atom).map_err(|e| map_reply_error(name, e)),
        )?;

        let fd = conn.stream().as_raw_fd();
        info!(
            "Соединение X11 установлено: экран {}, корневое окно {:#x}, глубина {}",
            screen_num, root, root_depth
        );

        Ok(Self {
            conn: Some(conn),
            fd,
            root,
            root_depth,
            root_visual,
            atoms,
            failure: None,
            peeked: None,
        })
    }

    fn request<F>(&mut self, what: &str, f: F) -> Result<()>
    where
        F: FnOnce(&RustConnection) -> std::result::Result<(), ConnectionError>,
    {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| autk_error!(invalid_state, "соединение X11 закрыто ({})", what))?;

        match f(conn) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(what, &e)),
        }
    }

    fn fail(&mut self, what: &str, err: &ConnectionError) -> AutkError {
        let mapped = map_connection_error(err);
        if let AutkError::Connection { kind, detail } = &mapped {
            error!("Соединение X11 сломано при {}: {}", what, detail);
            self.failure.get_or_insert((*kind, detail.clone()));
        }
        mapped
    }

    fn next_raw_event(&mut self) -> Result<Option<Event>> {
        if let Some(event) = self.peeked.take() {
            return Ok(Some(event));
        }
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| autk_error!(invalid_state, "соединение X11 закрыто"))?;
        match conn.poll_for_event() {
            Ok(event) => Ok(event),
            Err(e) => Err(self.fail("чтении событий", &e)),
        }
    }
}

impl Transport for X11Transport {
    fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    fn generate_id(&mut self) -> Result<WindowId> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| autk_error!(invalid_state, "соединение X11 закрыто"))?;
        match conn.generate_id() {
            Ok(id) => Ok(id),
            Err(ReplyOrIdError::ConnectionError(e)) => Err(self.fail("выделении XID", &e)),
            Err(ReplyOrIdError::IdsExhausted) => {
                Err(autk_error!(protocol, "идентификаторы окон исчерпаны"))
            }
            Err(ReplyOrIdError::X11Error(e)) => {
                Err(autk_error!(protocol, "ошибка XC-MISC при выделении XID: {:?}", e))
            }
        }
    }

    fn create_window(&mut self, window: WindowId, width: u16, height: u16) -> Result<()> {
        let (root, depth, visual) = (self.root, self.root_depth, self.root_visual);
        debug!("CreateWindow {:#x} {}x{}", window, width, height);
        self.request("CreateWindow", |c| {
            let aux = CreateWindowAux::new().event_mask(EventMask::STRUCTURE_NOTIFY);
            c.create_window(
                depth,
                window,
                root,
                0,
                0,
                width,
                height,
                0,
                WindowClass::INPUT_OUTPUT,
                visual,
                &aux,
            )
            .map(drop)
        })
    }

    fn destroy_window(&mut self, window: WindowId) -> Result<()> {
        self.request("DestroyWindow", |c| c.destroy_window(window).map(drop))
    }

    fn map_window(&mut self, window: WindowId) -> Result<()> {
        self.request("MapWindow", |c| c.map_window(window).map(drop))
    }

    fn unmap_window(&mut self, window: WindowId) -> Result<()> {
        self.request("UnmapWindow", |c| c.unmap_window(window).map(drop))
    }

    fn configure_window(&mut self, window: WindowId, request: ConfigureRequest) -> Result<()> {
        let mut aux = ConfigureWindowAux::new();
        if let Some(x) = request.x {
            aux = aux.x(i32::from(x));
        }
        if let Some(y) = request.y {
            aux = aux.y(i32::from(y));
        }
        if let Some(width) = request.width {
            aux = aux.width(u32::from(width));
        }
        if let Some(height) = request.height {
            aux = aux.height(u32::from(height));
        }
        self.request("ConfigureWindow", |c| c.configure_window(window, &aux).map(drop))
    }

    fn change_property(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        value: PropertyValue<'_>,
    ) -> Result<()> {
        self.request("ChangeProperty", |c| match value {
            PropertyValue::Bytes(data) => c
                .change_property8(PropMode::REPLACE, window, property, ty, data)
                .map(drop),
            PropertyValue::Atoms(data) => c
                .change_property32(PropMode::REPLACE, window, property, ty, data)
                .map(drop),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.request("flush", |c| c.flush())
    }

    fn check_connection(&self) -> Result<()> {
        if let Some((kind, detail)) = &self.failure {
            return Err(AutkError::connection(*kind, detail.clone()));
        }
        if self.conn.is_none() {
            return AutkError::invalid_state("соединение X11 закрыто");
        }
        Ok(())
    }

    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    fn has_buffered_events(&mut self) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.next_raw_event()?;
        }
        Ok(self.peeked.is_some())
    }

    fn poll_for_event(&mut self) -> Result<Option<NativeEvent>> {
        Ok(self.next_raw_event()?.map(translate_event))
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            self.peeked = None;
            info!("Соединение X11 закрыто");
        }
    }
}

impl Drop for X11Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn translate_event(event: Event) -> NativeEvent {
    match event {
        Event::ClientMessage(e) => NativeEvent::ClientMessage {
            window: e.window,
            message_type: e.type_,
            format: e.format,
            data: e.data.as_data32(),
        },
        Event::DestroyNotify(e) => NativeEvent::DestroyNotify { window: e.window },
        Event::MapNotify(e) => NativeEvent::MapNotify { window: e.window },
        Event::UnmapNotify(e) => NativeEvent::UnmapNotify { window: e.window },
        Event::ConfigureNotify(e) => NativeEvent::ConfigureNotify {
            window: e.window,
            synthetic: e.response_type & 0x80 != 0,
            x: e.x,
            y: e.y,
            width: e.width,
            height: e.height,
        },
        Event::Error(e) => NativeEvent::Error {
            code: e.error_code,
            sequence: e.sequence,
            bad_value: e.bad_value,
        },
        other => NativeEvent::Unknown {
            response_type: other.response_type(),
        },
    }
}

fn map_connect_error(err: ConnectError) -> AutkError {
    let kind = match &err {
        ConnectError::IoError(_) => ConnectionErrorKind::Io,
        ConnectError::InsufficientMemory => ConnectionErrorKind::OutOfMemory,
        ConnectError::DisplayParsingError(_) => ConnectionErrorKind::InvalidDisplayName,
        ConnectError::InvalidScreen => ConnectionErrorKind::InvalidScreen,
        _ => ConnectionErrorKind::Unknown,
    };
    AutkError::connection(kind, format!("не удалось открыть дисплей: {}", err))
}

fn map_connection_error(err: &ConnectionError) -> AutkError {
    let kind = match err {
        ConnectionError::UnsupportedExtension => ConnectionErrorKind::UnsupportedExtension,
        ConnectionError::MaximumRequestLengthExceeded => ConnectionErrorKind::RequestLengthExceeded,
        ConnectionError::FdPassingFailed => ConnectionErrorKind::FdPassingFailed,
        ConnectionError::InsufficientMemory => ConnectionErrorKind::OutOfMemory,
        ConnectionError::IoError(_) => ConnectionErrorKind::Io,
        _ => ConnectionErrorKind::Unknown,
    };
    AutkError::connection(kind, err.to_string())
}

fn map_reply_error(atom_name: &str, err: ReplyError) -> AutkError {
    match err {
        ReplyError::ConnectionError(e) => map_connection_error(&e),
        ReplyError::X11Error(e) => {
            autk_error!(protocol, "InternAtom {} завершился ошибкой: {:?}", atom_name, e)
        }
    }
}
