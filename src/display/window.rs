use super::atoms::{AtomName, ATOM_STRING, ATOM_WM_ICON_NAME, ATOM_WM_NAME};
use super::provider::DisplayShared;
use super::transport::{ConfigureRequest, PropertyValue};
use super::WindowId;
use crate::debug_if_enabled;
use crate::error::{AutkError, Result};
use crate::events::{Point, Size, WindowStyle};
use crate::utils::Notifier;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::rc::Weak;
use tracing::{debug, info, warn};

/// Уведомление провайдера окна для фасада
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowNotification {
    CloseRequested,
    VisibilityChanged(bool),
    Moved(Point),
    Resized(Size),
    /// Идентификатор ещё действителен на момент этого уведомления
    Disposing { id: WindowId },
    Disposed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Shadow {
    visible: bool,
    size: Size,
    location: Point,
    title: Option<String>,
}

/// Оболочка одного окна верхнего уровня.
///
/// Живёт в двух состояниях: живое и недействительное (конечное). Переход
/// происходит при явном `dispose`, при закрытии дисплея или при получении
/// DestroyNotify от сервера, и срабатывает ровно один раз.
pub struct WindowProvider {
    display: Weak<DisplayShared>,
    id: Cell<Option<WindowId>>,
    style: WindowStyle,
    invalidated: Cell<bool>,
    shadow: RefCell<Shadow>,
    notifier: Notifier<WindowNotification>,
}

impl WindowProvider {
    pub(super) fn new(
        display: Weak<DisplayShared>,
        id: WindowId,
        style: WindowStyle,
        size: Size,
    ) -> Self {
        Self {
            display,
            id: Cell::new(Some(id)),
            style,
            invalidated: Cell::new(false),
            shadow: RefCell::new(Shadow {
                size,
                ..Shadow::default()
            }),
            notifier: Notifier::new(),
        }
    }

    pub fn id(&self) -> Option<WindowId> {
        self.id.get()
    }

    pub fn style(&self) -> WindowStyle {
        self.style
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.get()
    }

    pub fn is_visible(&self) -> bool {
        self.shadow.borrow().visible
    }

    pub fn size(&self) -> Size {
        self.shadow.borrow().size
    }

    pub fn location(&self) -> Point {
        self.shadow.borrow().location
    }

    pub fn title(&self) -> Option<String> {
        self.shadow.borrow().title.clone()
    }

    pub fn subscribe(&self, observer: impl FnMut(WindowNotification) + 'static) {
        self.notifier.subscribe(observer);
    }

    pub fn unsubscribe(&self) {
        self.notifier.unsubscribe();
    }

    /// Отправить запрос, если окно живо; `None` означает, что окна уже нет
    fn live_request<R>(
        &self,
        f: impl FnOnce(WindowId, &mut dyn super::transport::Transport) -> Result<R>,
    ) -> Result<Option<R>> {
        let Some(id) = self.id.get() else {
            return Ok(None);
        };
        let Some(display) = self.display.upgrade() else {
            return Ok(None);
        };
        display.with_transport(|t| f(id, t)).map(Some)
    }

    /// Показать или скрыть окно.
    ///
    /// Теневое состояние меняется только после MapNotify/UnmapNotify.
    pub fn set_visible(&self, visible: bool) -> Result<()> {
        if self.is_invalidated() {
            if visible {
                return AutkError::invalid_state("нельзя показать уничтоженное окно");
            }
            return Ok(());
        }

        self.live_request(|id, t| {
            debug!("{} окна {:#x}", if visible { "Map" } else { "Unmap" }, id);
            if visible {
                t.map_window(id)
            } else {
                t.unmap_window(id)
            }
        })?;
        Ok(())
    }

    pub fn set_title(&self, title: Option<&str>) -> Result<()> {
        if self.is_invalidated() {
            return Ok(());
        }

        let text = title.unwrap_or("");
        let legacy = encode_latin1(text);
        let sent = self.live_request(|id, t| {
            let utf8 = t.atoms().get(AtomName::Utf8String);
            let net_name = t.atoms().get(AtomName::NetWmName);
            let net_icon_name = t.atoms().get(AtomName::NetWmIconName);

            t.change_property(id, ATOM_WM_NAME, ATOM_STRING, PropertyValue::Bytes(&legacy))?;
            t.change_property(id, ATOM_WM_ICON_NAME, ATOM_STRING, PropertyValue::Bytes(&legacy))?;
            t.change_property(id, net_name, utf8, PropertyValue::Bytes(text.as_bytes()))?;
            t.change_property(id, net_icon_name, utf8, PropertyValue::Bytes(text.as_bytes()))
        })?;

        if sent.is_some() {
            self.shadow.borrow_mut().title = title.map(str::to_owned);
        }
        Ok(())
    }

    pub fn set_size(&self, size: Size) -> Result<()> {
        if self.is_invalidated() {
            return Ok(());
        }
        let (width, height) = clamp_size(size);
        self.live_request(|id, t| {
            t.configure_window(
                id,
                ConfigureRequest {
                    width: Some(width),
                    height: Some(height),
                    ..ConfigureRequest::default()
                },
            )
        })?;
        Ok(())
    }

    pub fn set_location(&self, location: Point) -> Result<()> {
        if self.is_invalidated() {
            return Ok(());
        }
        let (x, y) = clamp_location(location);
        self.live_request(|id, t| {
            t.configure_window(
                id,
                ConfigureRequest {
                    x: Some(x),
                    y: Some(y),
                    ..ConfigureRequest::default()
                },
            )
        })?;
        Ok(())
    }

    /// Уничтожить окно. Повторный вызов ничего не делает.
    pub fn dispose(&self) {
        if self.is_invalidated() {
            return;
        }
        if let Err(e) = self.live_request(|id, t| t.destroy_window(id)) {
            warn!("Не удалось отправить DestroyWindow: {}", e);
        }
        self.invalidate();
    }

    /// Переход в недействительное состояние
    pub(super) fn invalidate(&self) {
        if self.invalidated.replace(true) {
            return;
        }

        let id = self.id.get();
        if let Some(id) = id {
            info!("Окно {:#x} уничтожается", id);
            self.notifier.emit(WindowNotification::Disposing { id });
            if let Some(display) = self.display.upgrade() {
                display.unregister(id);
            }
        }

        self.id.set(None);
        *self.shadow.borrow_mut() = Shadow::default();
        self.notifier.emit(WindowNotification::Disposed);
    }

    pub(super) fn on_close_requested(&self) {
        if !self.is_invalidated() {
            self.notifier.emit(WindowNotification::CloseRequested);
        }
    }

    pub(super) fn on_visibility_changed(&self, visible: bool) {
        if self.is_invalidated() {
            return;
        }
        let changed = {
            let mut shadow = self.shadow.borrow_mut();
            let changed = shadow.visible != visible;
            shadow.visible = visible;
            changed
        };
        if changed {
            self.notifier.emit(WindowNotification::VisibilityChanged(visible));
        }
    }

    /// Новая геометрия от сервера. `location` равен `None`, если координатам
    /// этого события нельзя доверять.
    pub(super) fn on_configured(&self, location: Option<Point>, size: Size) {
        if self.is_invalidated() {
            return;
        }

        let mut changes: SmallVec<[WindowNotification; 2]> = SmallVec::new();
        {
            let mut shadow = self.shadow.borrow_mut();
            if shadow.size != size {
                shadow.size = size;
                changes.push(WindowNotification::Resized(size));
            }
            if let Some(location) = location {
                if shadow.location != location {
                    shadow.location = location;
                    changes.push(WindowNotification::Moved(location));
                }
            }
        }

        for change in changes {
            debug_if_enabled!("Окно {:?}: {:?}", self.id.get(), change);
            self.notifier.emit(change);
        }
    }
}

impl Drop for WindowProvider {
    fn drop(&mut self) {
        if !self.invalidated.get() {
            self.dispose();
        }
    }
}

/// Размер в допустимом для протокола диапазоне 1..=65535
pub fn clamp_size(size: Size) -> (u16, u16) {
    let clamp = |v: u32| v.clamp(1, u32::from(u16::MAX)) as u16;
    (clamp(size.width), clamp(size.height))
}

pub fn clamp_location(location: Point) -> (i16, i16) {
    let clamp = |v: i32| v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
    (clamp(location.x), clamp(location.y))
}

/// Кодирование для свойств типа STRING (ISO 8859-1)
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_clamped_to_protocol_range() {
        assert_eq!(clamp_size(Size::new(0, 0)), (1, 1));
        assert_eq!(clamp_size(Size::new(640, 480)), (640, 480));
        assert_eq!(clamp_size(Size::new(100_000, 65_536)), (65_535, 65_535));
    }

    #[test]
    fn locations_are_clamped_to_i16() {
        assert_eq!(clamp_location(Point::new(-40_000, 40_000)), (i16::MIN, i16::MAX));
        assert_eq!(clamp_location(Point::new(-5, 17)), (-5, 17));
    }

    #[test]
    fn latin1_replaces_unrepresentable_characters() {
        assert_eq!(encode_latin1("Café"), vec![b'C', b'a', b'f', 0xE9]);
        assert_eq!(encode_latin1("Окно 1"), b"???? 1".to_vec());
        assert!(encode_latin1("").is_empty());
    }
}
