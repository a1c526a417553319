use crate::application::{AppInner, Application};
use crate::display::{WindowId, WindowNotification, WindowProvider};
use crate::error::Result;
use crate::events::{Point, Size, WindowEvent, WindowStyle};
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Заголовок главного окна по умолчанию: имя исполняемого файла
pub static DEFAULT_TITLE: Lazy<String> = Lazy::new(|| {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
});

pub const DEFAULT_SIZE: Size = Size::new(640, 480);

/// Получатель событий окна
pub trait WindowHandler {
    fn event(&mut self, window: &Window, event: &WindowEvent);

    /// Оконный менеджер просит закрыть окно. По умолчанию окно уничтожается.
    fn close_requested(&mut self, window: &Window) {
        window.dispose();
    }
}

impl<F> WindowHandler for F
where
    F: FnMut(&Window, &WindowEvent),
{
    fn event(&mut self, window: &Window, event: &WindowEvent) {
        self(window, event)
    }
}

pub(crate) struct WindowShared {
    key: u64,
    provider: Rc<WindowProvider>,
    app: Weak<AppInner>,
    handler: RefCell<Option<Box<dyn WindowHandler>>>,
}

impl WindowShared {
    fn on_notification(self: &Rc<Self>, notification: WindowNotification) {
        let event = match notification {
            WindowNotification::CloseRequested => Some(WindowEvent::CloseRequested),
            WindowNotification::VisibilityChanged(visible) => Some(WindowEvent::visibility(visible)),
            WindowNotification::Moved(location) => Some(WindowEvent::Moved(location)),
            WindowNotification::Resized(size) => Some(WindowEvent::Resized(size)),
            WindowNotification::Disposing { .. } => None,
            WindowNotification::Disposed => Some(WindowEvent::Disposed),
        };

        let Some(event) = event else {
            return;
        };
        let window = Window::from_shared(self.clone());
        self.deliver(&window, &event);

        if event.is_terminal() {
            self.handler.borrow_mut().take();
            if let Some(app) = self.app.upgrade() {
                app.window_disposed(self.key);
            }
        }
    }

    fn deliver(&self, window: &Window, event: &WindowEvent) {
        let taken = self.handler.borrow_mut().take();
        let Some(mut handler) = taken else {
            if *event == WindowEvent::CloseRequested {
                window.dispose();
            }
            return;
        };

        handler.event(window, event);
        if *event == WindowEvent::CloseRequested {
            handler.close_requested(window);
        }

        let mut slot = self.handler.borrow_mut();
        if slot.is_none() {
            *slot = Some(handler);
        }
    }
}

/// Окно верхнего уровня.
///
/// Дешёвый клонируемый дескриптор; окно живёт, пока не уничтожено явно,
/// сервером или вместе с приложением.
#[derive(Clone)]
pub struct Window {
    shared: Rc<WindowShared>,
}

impl Window {
    pub fn new(app: &Application, style: WindowStyle, size: Size) -> Result<Self> {
        let inner = app.inner();
        let provider = inner.display.create_window(style, size)?;
        let shared = Rc::new(WindowShared {
            key: inner.next_key(),
            provider,
            app: Rc::downgrade(inner),
            handler: RefCell::new(None),
        });

        let weak = Rc::downgrade(&shared);
        shared.provider.subscribe(move |notification| {
            if let Some(shared) = weak.upgrade() {
                shared.on_notification(notification);
            }
        });

        inner
            .windows
            .borrow_mut()
            .insert(shared.key, shared.clone());
        Ok(Self { shared })
    }

    /// Обычное окно стандартного размера с именем программы в заголовке
    pub fn main(app: &Application) -> Result<Self> {
        let window = Self::new(app, WindowStyle::Normal, DEFAULT_SIZE)?;
        window.set_title(Some(DEFAULT_TITLE.as_str()))?;
        Ok(window)
    }

    pub(crate) fn from_shared(shared: Rc<WindowShared>) -> Self {
        Self { shared }
    }

    pub fn set_handler(&self, handler: impl WindowHandler + 'static) {
        if self.is_disposed() {
            debug!("Обработчик для уничтоженного окна не устанавливается");
            return;
        }
        *self.shared.handler.borrow_mut() = Some(Box::new(handler));
    }

    pub fn clear_handler(&self) {
        self.shared.handler.borrow_mut().take();
    }

    pub fn id(&self) -> Option<WindowId> {
        self.shared.provider.id()
    }

    pub fn style(&self) -> WindowStyle {
        self.shared.provider.style()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.provider.is_invalidated()
    }

    pub fn is_visible(&self) -> bool {
        self.shared.provider.is_visible()
    }

    pub fn set_visible(&self, visible: bool) -> Result<()> {
        self.shared.provider.set_visible(visible)
    }

    pub fn show(&self) -> Result<()> {
        self.set_visible(true)
    }

    pub fn hide(&self) -> Result<()> {
        self.set_visible(false)
    }

    pub fn size(&self) -> Size {
        self.shared.provider.size()
    }

    pub fn set_size(&self, size: Size) -> Result<()> {
        self.shared.provider.set_size(size)
    }

    pub fn location(&self) -> Point {
        self.shared.provider.location()
    }

    pub fn set_location(&self, location: Point) -> Result<()> {
        self.shared.provider.set_location(location)
    }

    pub fn title(&self) -> Option<String> {
        self.shared.provider.title()
    }

    pub fn set_title(&self, title: Option<&str>) -> Result<()> {
        self.shared.provider.set_title(title)
    }

    pub fn dispose(&self) {
        self.shared.provider.dispose();
    }
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Window {}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id())
            .field("style", &self.style())
            .field("visible", &self.is_visible())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::tests::{dry_app, serial};
    use crate::error::AutkError;

    fn record(window: &Window) -> Rc<RefCell<Vec<WindowEvent>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        window.set_handler(move |_: &Window, event: &WindowEvent| sink.borrow_mut().push(*event));
        log
    }

    /// Одна итерация цикла событий
    fn pump(app: &Application) {
        app.quit().unwrap();
        app.run().unwrap();
    }

    #[test]
    fn provider_notifications_become_public_events() {
        let _serial = serial();
        let (app, _server) = dry_app();
        let window = Window::new(&app, WindowStyle::Normal, Size::new(640, 480)).unwrap();
        let keep_alive = Window::new(&app, WindowStyle::Normal, Size::new(10, 10)).unwrap();
        let log = record(&window);

        window.show().unwrap();
        pump(&app);
        assert_eq!(
            *log.borrow(),
            vec![WindowEvent::Shown, WindowEvent::Moved(Point::new(32, 32))]
        );

        log.borrow_mut().clear();
        window.set_size(Size::new(800, 600)).unwrap();
        window.hide().unwrap();
        pump(&app);
        assert_eq!(
            *log.borrow(),
            vec![WindowEvent::Resized(Size::new(800, 600)), WindowEvent::Hidden]
        );

        log.borrow_mut().clear();
        window.dispose();
        window.dispose();
        pump(&app);
        assert_eq!(*log.borrow(), vec![WindowEvent::Disposed]);
        assert_eq!(app.windows(), vec![keep_alive]);
    }

    #[test]
    fn close_request_disposes_by_default() {
        let _serial = serial();
        let (app, server) = dry_app();
        let window = Window::new(&app, WindowStyle::Dialog, Size::new(10, 10)).unwrap();
        let log = record(&window);

        server.request_close(window.id().unwrap());
        pump(&app);

        assert!(window.is_disposed());
        assert_eq!(
            *log.borrow(),
            vec![WindowEvent::CloseRequested, WindowEvent::Disposed]
        );
    }

    struct KeepOpen(Rc<RefCell<u32>>);

    impl WindowHandler for KeepOpen {
        fn event(&mut self, _window: &Window, _event: &WindowEvent) {}

        fn close_requested(&mut self, _window: &Window) {
            *self.0.borrow_mut() += 1;
        }
    }

    #[test]
    fn handler_can_refuse_to_close() {
        let _serial = serial();
        let (app, server) = dry_app();
        let window = Window::new(&app, WindowStyle::Normal, Size::new(10, 10)).unwrap();
        let refused = Rc::new(RefCell::new(0));
        window.set_handler(KeepOpen(refused.clone()));

        server.request_close(window.id().unwrap());
        server.request_close(window.id().unwrap());
        pump(&app);

        assert!(!window.is_disposed());
        assert_eq!(*refused.borrow(), 2);
    }

    #[test]
    fn main_window_uses_program_name_as_title() {
        let _serial = serial();
        let (app, _server) = dry_app();
        let window = Window::main(&app).unwrap();
        assert_eq!(window.title().as_deref(), Some(DEFAULT_TITLE.as_str()));
        assert!(!DEFAULT_TITLE.is_empty());
        assert_eq!(window.size(), DEFAULT_SIZE);
    }

    #[test]
    fn disposed_window_ignores_setters_except_show() {
        let _serial = serial();
        let (app, server) = dry_app();
        let window = Window::new(&app, WindowStyle::Normal, Size::new(10, 10)).unwrap();
        let id = window.id().unwrap();
        window.set_title(Some("до")).unwrap();
        window.dispose();

        assert_eq!(window.id(), None);
        assert_eq!(window.title(), None);
        assert!(window.set_title(Some("после")).is_ok());
        assert!(window.set_location(Point::new(5, 5)).is_ok());
        assert!(matches!(window.show(), Err(AutkError::InvalidState(_))));

        pump(&app);
        let after_dispose = server
            .requests_for(id)
            .into_iter()
            .skip_while(|r| !matches!(r, crate::display::dry_run::Request::DestroyWindow(_)))
            .count();
        assert_eq!(after_dispose, 1);
    }
}
