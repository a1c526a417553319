use super::atoms::{Atom, Atoms};
use super::event::NativeEvent;
use super::WindowId;
use crate::error::Result;
use std::os::unix::io::RawFd;
use tracing::info;

/// Данные свойства окна в одном из форматов протокола
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValue<'a> {
    /// Формат 8: строки
    Bytes(&'a [u8]),
    /// Формат 32: списки атомов
    Atoms(&'a [Atom]),
}

/// Запрос ConfigureWindow; `None` означает «не менять»
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigureRequest {
    pub x: Option<i16>,
    pub y: Option<i16>,
    pub width: Option<u16>,
    pub height: Option<u16>,
}

/// Клиент нативного оконного протокола.
///
/// Все запросы буферизуются и уходят на сервер при [`Transport::flush`].
/// Синхронно ждут ответа только открытие соединения и разрешение атомов.
pub trait Transport {
    fn atoms(&self) -> &Atoms;

    fn generate_id(&mut self) -> Result<WindowId>;

    /// Создать окно верхнего уровня, подписанное на StructureNotify
    fn create_window(&mut self, window: WindowId, width: u16, height: u16) -> Result<()>;

    fn destroy_window(&mut self, window: WindowId) -> Result<()>;

    fn map_window(&mut self, window: WindowId) -> Result<()>;

    fn unmap_window(&mut self, window: WindowId) -> Result<()>;

    fn configure_window(&mut self, window: WindowId, request: ConfigureRequest) -> Result<()>;

    fn change_property(
        &mut self,
        window: WindowId,
        property: Atom,
        ty: Atom,
        value: PropertyValue<'_>,
    ) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Состояние соединения; ошибка здесь всегда фатальна
    fn check_connection(&self) -> Result<()>;

    /// Дескриптор, готовность которого на чтение означает новые события
    fn as_raw_fd(&self) -> RawFd;

    /// Есть ли уже прочитанные, но не выданные события.
    /// Такие события не разбудят poll(2), поэтому цикл не должен засыпать.
    fn has_buffered_events(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn poll_for_event(&mut self) -> Result<Option<NativeEvent>>;

    /// Закрыть соединение. Повторный вызов ничего не делает.
    fn close(&mut self);
}

/// Фабрика транспорта в зависимости от флага dry_run
pub fn create_transport(display_name: Option<&str>, dry_run: bool) -> Result<Box<dyn Transport>> {
    if dry_run {
        info!("Dry-run режим - используется эмуляция X-сервера в памяти");
        Ok(Box::new(super::dry_run::DryRunTransport::new()?))
    } else {
        Ok(Box::new(super::x11::X11Transport::connect(display_name)?))
    }
}
