//! Декодирование нативных событий.
//!
//! Транспорт переводит события протокола в закрытое перечисление
//! [`NativeEvent`], а [`NativeEvent::decode`] превращает его в типизированное
//! уведомление для конкретного окна. Таблица разбора исчерпывающая: любое
//! событие, не относящееся к жизненному циклу окна, явно отбрасывается здесь.

use super::atoms::{Atom, AtomName, Atoms};
use super::WindowId;
use crate::events::{Point, Size};
use crate::trace_if_enabled;
use tracing::warn;

/// Событие протокола в том виде, в каком его доставил транспорт
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEvent {
    ClientMessage {
        window: WindowId,
        message_type: Atom,
        format: u8,
        data: [u32; 5],
    },
    DestroyNotify {
        window: WindowId,
    },
    MapNotify {
        window: WindowId,
    },
    UnmapNotify {
        window: WindowId,
    },
    ConfigureNotify {
        window: WindowId,
        /// Событие отправлено клиентом (обычно оконным менеджером), а не сервером
        synthetic: bool,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
    },
    /// Асинхронная ошибка запроса, пришедшая в потоке событий
    Error {
        code: u8,
        sequence: u16,
        bad_value: u32,
    },
    Unknown {
        response_type: u8,
    },
}

/// Уведомление для одного окна после декодирования
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    CloseRequested,
    Destroyed,
    Mapped,
    Unmapped,
    Configured {
        location: Point,
        size: Size,
        synthetic: bool,
    },
}

impl NativeEvent {
    /// Окно, к которому относится событие, если оно есть
    pub fn window(&self) -> Option<WindowId> {
        match *self {
            NativeEvent::ClientMessage { window, .. }
            | NativeEvent::DestroyNotify { window }
            | NativeEvent::MapNotify { window }
            | NativeEvent::UnmapNotify { window }
            | NativeEvent::ConfigureNotify { window, .. } => Some(window),
            NativeEvent::Error { .. } | NativeEvent::Unknown { .. } => None,
        }
    }

    pub fn decode(self, atoms: &Atoms) -> Option<(WindowId, Notification)> {
        match self {
            NativeEvent::ClientMessage {
                window,
                message_type,
                format,
                data,
            } => {
                let is_close = message_type == atoms.get(AtomName::WmProtocols)
                    && format == 32
                    && data[0] == atoms.get(AtomName::WmDeleteWindow);
                if is_close {
                    Some((window, Notification::CloseRequested))
                } else {
                    trace_if_enabled!(
                        "Пропускаем ClientMessage типа {} ({:?}) для окна {}",
                        message_type,
                        atoms.lookup(message_type),
                        window
                    );
                    None
                }
            }
            NativeEvent::DestroyNotify { window } => Some((window, Notification::Destroyed)),
            NativeEvent::MapNotify { window } => Some((window, Notification::Mapped)),
            NativeEvent::UnmapNotify { window } => Some((window, Notification::Unmapped)),
            NativeEvent::ConfigureNotify {
                window,
                synthetic,
                x,
                y,
                width,
                height,
            } => Some((
                window,
                Notification::Configured {
                    location: Point::new(x.into(), y.into()),
                    size: Size::new(width.into(), height.into()),
                    synthetic,
                },
            )),
            NativeEvent::Error {
                code,
                sequence,
                bad_value,
            } => {
                warn!(
                    "Асинхронная ошибка X11: код {}, запрос #{}, значение {:#x}",
                    code, sequence, bad_value
                );
                None
            }
            NativeEvent::Unknown { response_type } => {
                trace_if_enabled!("Пропускаем событие с кодом {}", response_type);
                None
            }
        }
    }
}
