//! Приложение: единственный на процесс владелец дисплея и набора окон.

use crate::config::Config;
use crate::display::{create_transport, DisplayProvider, LoopProxy, Transport};
use crate::error::{AutkError, Result};
use crate::window::{Window, WindowShared};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

static INSTANCE: AtomicBool = AtomicBool::new(false);

/// Точки расширения жизненного цикла приложения
pub trait ApplicationHandler {
    fn started(&mut self, _app: &Application) {}

    fn stopped(&mut self, _app: &Application) {}

    /// Закрыто последнее окно. По умолчанию завершает цикл событий.
    fn last_window_closed(&mut self, app: &Application) {
        if let Err(e) = app.quit() {
            warn!("Не удалось завершить цикл после закрытия последнего окна: {}", e);
        }
    }
}

struct DefaultHandler;

impl ApplicationHandler for DefaultHandler {}

/// Право на единственный экземпляр; освобождается при drop
struct InstanceClaim;

impl InstanceClaim {
    fn acquire() -> Result<Self> {
        INSTANCE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InstanceClaim)
            .or_else(|_| AutkError::invalid_state("Application уже создан в этом процессе"))
    }
}

impl Drop for InstanceClaim {
    fn drop(&mut self) {
        INSTANCE.store(false, Ordering::Release);
    }
}

pub(crate) struct AppInner {
    pub(crate) display: DisplayProvider,
    pub(crate) windows: RefCell<BTreeMap<u64, Rc<WindowShared>>>,
    next_key: Cell<u64>,
    handler: RefCell<Option<Box<dyn ApplicationHandler>>>,
    running: Cell<bool>,
    tearing_down: Cell<bool>,
    // Последним: экземпляр освобождается после закрытия дисплея
    _claim: InstanceClaim,
}

impl AppInner {
    pub(crate) fn next_key(&self) -> u64 {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        key
    }

    /// Окно уничтожено: убрать его из набора живых окон
    pub(crate) fn window_disposed(self: &Rc<Self>, key: u64) {
        let removed = self.windows.borrow_mut().remove(&key);
        if removed.is_none() || self.tearing_down.get() {
            return;
        }
        let empty = self.windows.borrow().is_empty();
        drop(removed);

        if empty {
            info!("Закрыто последнее окно");
            Application::from_inner(self.clone())
                .with_handler(|handler, app| handler.last_window_closed(app));
        }
    }
}

impl Drop for AppInner {
    fn drop(&mut self) {
        self.tearing_down.set(true);
        self.display.dispose();
        self.windows.get_mut().clear();
        debug!("Application освобождён");
    }
}

pub struct Application {
    inner: Rc<AppInner>,
}

impl Application {
    /// Подключиться к дисплею из `$DISPLAY`
    pub fn new() -> Result<Self> {
        Self::open(None, false)
    }

    pub fn open(display_name: Option<&str>, dry_run: bool) -> Result<Self> {
        let claim = InstanceClaim::acquire()?;
        let transport = create_transport(display_name, dry_run)?;
        Self::build(claim, transport)
    }

    /// Открыть приложение по проверенной конфигурации
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        config.validate()?;
        Self::open(config.display.name.as_deref(), dry_run)
    }

    pub fn with_transport(transport: Box<dyn Transport>) -> Result<Self> {
        let claim = InstanceClaim::acquire()?;
        Self::build(claim, transport)
    }

    fn build(claim: InstanceClaim, transport: Box<dyn Transport>) -> Result<Self> {
        let display = DisplayProvider::with_transport(transport)?;
        info!("Application создан");
        Ok(Self {
            inner: Rc::new(AppInner {
                display,
                windows: RefCell::new(BTreeMap::new()),
                next_key: Cell::new(0),
                handler: RefCell::new(Some(Box::new(DefaultHandler))),
                running: Cell::new(false),
                tearing_down: Cell::new(false),
                _claim: claim,
            }),
        })
    }

    pub(crate) fn from_inner(inner: Rc<AppInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<AppInner> {
        &self.inner
    }

    /// Существует ли сейчас экземпляр в процессе
    pub fn exists() -> bool {
        INSTANCE.load(Ordering::Acquire)
    }

    pub fn set_handler(&self, handler: impl ApplicationHandler + 'static) {
        *self.inner.handler.borrow_mut() = Some(Box::new(handler));
    }

    fn with_handler(&self, f: impl FnOnce(&mut dyn ApplicationHandler, &Application)) {
        let taken = self.inner.handler.borrow_mut().take();
        let Some(mut handler) = taken else {
            return;
        };
        f(handler.as_mut(), self);

        // Обработчик мог поставить себе замену
        let mut slot = self.inner.handler.borrow_mut();
        if slot.is_none() {
            *slot = Some(handler);
        }
    }

    /// Запустить цикл событий до `quit`
    pub fn run(&self) -> Result<()> {
        if self.inner.running.replace(true) {
            return AutkError::invalid_state("Application::run уже выполняется");
        }
        let _guard = RunGuard(&self.inner.running);

        self.with_handler(|handler, app| handler.started(app));
        let result = self.inner.display.run();
        self.with_handler(|handler, app| handler.stopped(app));
        result
    }

    pub fn quit(&self) -> Result<()> {
        self.inner.display.post_quit()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Дескриптор для других потоков
    pub fn proxy(&self) -> LoopProxy {
        self.inner.display.proxy()
    }

    pub fn display(&self) -> &DisplayProvider {
        &self.inner.display
    }

    /// Живые окна в порядке создания
    pub fn windows(&self) -> Vec<Window> {
        self.inner
            .windows
            .borrow()
            .values()
            .cloned()
            .map(Window::from_shared)
            .collect()
    }

    pub fn window_count(&self) -> usize {
        self.inner.windows.borrow().len()
    }
}

struct RunGuard<'a>(&'a Cell<bool>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::display::{DryRunServer, DryRunTransport};
    use crate::events::{Size, WindowStyle};
    use parking_lot::{Mutex, MutexGuard};
    use std::thread;
    use std::time::Duration;

    static TEST_LOCK: Mutex<()> = Mutex::new(());

    /// Тесты с Application выполняются по одному: экземпляр один на процесс
    pub(crate) fn serial() -> MutexGuard<'static, ()> {
        TEST_LOCK.lock()
    }

    pub(crate) fn dry_app() -> (Application, DryRunServer) {
        let transport = DryRunTransport::new().unwrap();
        let server = transport.server();
        (Application::with_transport(Box::new(transport)).unwrap(), server)
    }

    #[derive(Default)]
    struct Recorder {
        log: Rc<RefCell<Vec<&'static str>>>,
        quit_on_last: bool,
        nested: Rc<RefCell<Option<Result<()>>>>,
    }

    impl ApplicationHandler for Recorder {
        fn started(&mut self, app: &Application) {
            self.log.borrow_mut().push("started");
            *self.nested.borrow_mut() = Some(app.run());
        }

        fn stopped(&mut self, _app: &Application) {
            self.log.borrow_mut().push("stopped");
        }

        fn last_window_closed(&mut self, app: &Application) {
            self.log.borrow_mut().push("last_window_closed");
            if self.quit_on_last {
                app.quit().unwrap();
            }
        }
    }

    #[test]
    fn only_one_instance_at_a_time() {
        let _serial = serial();
        let (app, _server) = dry_app();
        assert!(Application::exists());

        let second = Application::with_transport(Box::new(DryRunTransport::new().unwrap()));
        assert!(matches!(second, Err(AutkError::InvalidState(_))));

        drop(app);
        assert!(!Application::exists());
        let (_again, _server) = dry_app();
    }

    #[test]
    fn invalid_config_is_rejected_before_connecting() {
        let _serial = serial();
        let mut config = Config::default();
        config.window.width = 0;

        let result = Application::from_config(&config, true);
        assert!(matches!(result, Err(AutkError::Config(_))));
        assert!(!Application::exists());

        config.window.width = 320;
        let app = Application::from_config(&config, true).unwrap();
        assert!(Application::exists());
        drop(app);
    }

    #[test]
    fn closing_last_window_stops_run() {
        let _serial = serial();
        let (app, server) = dry_app();
        let log = Rc::new(RefCell::new(Vec::new()));
        app.set_handler(Recorder {
            log: log.clone(),
            quit_on_last: true,
            ..Recorder::default()
        });

        let window = Window::new(&app, WindowStyle::Normal, Size::new(200, 100)).unwrap();
        let id = window.id().unwrap();
        server.request_close(id);

        app.run().unwrap();
        assert!(window.is_disposed());
        assert_eq!(app.window_count(), 0);
        assert_eq!(*log.borrow(), vec!["started", "last_window_closed", "stopped"]);
    }

    #[test]
    fn last_window_policy_can_be_overridden() {
        let _serial = serial();
        let (app, server) = dry_app();
        let log = Rc::new(RefCell::new(Vec::new()));
        app.set_handler(Recorder {
            log: log.clone(),
            quit_on_last: false,
            ..Recorder::default()
        });

        let window = Window::new(&app, WindowStyle::Normal, Size::new(200, 100)).unwrap();
        server.request_close(window.id().unwrap());
        app.quit().unwrap();
        app.run().unwrap();

        assert!(window.is_disposed());
        assert!(log.borrow().contains(&"last_window_closed"));
        // Цикл остановил только явный quit
        assert_eq!(log.borrow().last(), Some(&"stopped"));
    }

    #[test]
    fn nested_run_is_rejected() {
        let _serial = serial();
        let (app, _server) = dry_app();
        let nested = Rc::new(RefCell::new(None));
        app.set_handler(Recorder {
            nested: nested.clone(),
            ..Recorder::default()
        });

        app.quit().unwrap();
        app.run().unwrap();
        assert!(matches!(
            nested.borrow_mut().take(),
            Some(Err(AutkError::InvalidState(_)))
        ));
        assert!(!app.is_running());
    }

    #[test]
    fn windows_lists_live_windows_in_creation_order() {
        let _serial = serial();
        let (app, _server) = dry_app();
        let first = Window::new(&app, WindowStyle::Normal, Size::new(10, 10)).unwrap();
        let second = Window::new(&app, WindowStyle::Dialog, Size::new(10, 10)).unwrap();
        let third = Window::new(&app, WindowStyle::Utility, Size::new(10, 10)).unwrap();

        second.dispose();
        let ids: Vec<_> = app.windows().iter().map(|w| w.id()).collect();
        assert_eq!(ids, vec![first.id(), third.id()]);
    }

    #[test]
    fn dropping_application_invalidates_windows() {
        let _serial = serial();
        let (app, server) = dry_app();
        let window = Window::new(&app, WindowStyle::Normal, Size::new(10, 10)).unwrap();

        drop(app);
        assert!(window.is_disposed());
        assert!(server.is_closed());
        assert!(matches!(window.set_visible(true), Err(AutkError::InvalidState(_))));
        assert!(window.set_visible(false).is_ok());
    }

    #[test]
    fn proxy_quits_from_another_thread() {
        let _serial = serial();
        let (app, _server) = dry_app();
        let _window = Window::new(&app, WindowStyle::Normal, Size::new(10, 10)).unwrap();

        let proxy = app.proxy();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            proxy.post_quit().unwrap();
        });
        app.run().unwrap();
        handle.join().unwrap();
    }
}
