//! Канал пробуждения цикла событий.
//!
//! Через канал идут только однобайтовые маркеры, сами действия лежат в
//! отдельной очереди под мьютексом. Каждому поставленному действию
//! соответствует ровно один байт `Action`, обе очереди остаются синхронными.

use crate::autk_error;
use crate::error::{AutkError, Result};
use crate::utils::PosixPipe;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use tracing::{debug, trace, warn};

type Action = Box<dyn FnOnce() + Send + 'static>;

/// Код маркера в канале
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Marker {
    Nop = 0,
    Quit = 1,
    Action = 2,
}

impl Marker {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Marker::Nop),
            1 => Some(Marker::Quit),
            2 => Some(Marker::Action),
            _ => None,
        }
    }
}

/// Пишущий конец канала и маркеры, которые в него пока не поместились
struct Writer {
    file: File,
    owed: VecDeque<Marker>,
}

impl Writer {
    /// Дописать задолженные маркеры по порядку, пока канал их принимает
    fn flush_owed(&mut self) -> io::Result<()> {
        while let Some(&marker) = self.owed.front() {
            match self.file.write(&[marker as u8]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(_) => {
                    self.owed.pop_front();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

struct Shared {
    queue: Mutex<VecDeque<Action>>,
    // None после закрытия канала
    writer: Mutex<Option<Writer>>,
}

impl Shared {
    fn send(&self, marker: Marker, action: Option<Action>) -> Result<()> {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return AutkError::invalid_state("цикл событий уже завершён, канал пробуждения закрыт");
        };

        let queued = action.is_some();
        if let Some(action) = action {
            self.queue.lock().push_back(action);
        }

        // Маркер встаёт за задолженными, иначе нарушится порядок с очередью
        writer.owed.push_back(marker);
        if let Err(e) = writer.flush_owed() {
            // Новый маркер ещё в хвосте: убираем его вместе с действием
            writer.owed.pop_back();
            if queued {
                self.queue.lock().pop_back();
            }
            return Err(AutkError::Wakeup(e));
        }

        if !writer.owed.is_empty() {
            trace!(
                "Канал пробуждения заполнен, маркеров в ожидании: {}",
                writer.owed.len()
            );
        }
        Ok(())
    }

    /// Вызывается после каждого чтения: освободилось место под долг
    fn flush_owed(&self) -> Result<()> {
        match self.writer.lock().as_mut() {
            Some(writer) => writer.flush_owed().map_err(AutkError::Wakeup),
            None => Ok(()),
        }
    }
}

/// Потокобезопасный дескриптор для обращения к циклу событий из других потоков
#[derive(Clone)]
pub struct LoopProxy {
    shared: Arc<Shared>,
}

impl LoopProxy {
    /// Выполнить `action` в потоке цикла событий
    pub fn post_action(&self, action: impl FnOnce() + Send + 'static) -> Result<()> {
        self.shared.send(Marker::Action, Some(Box::new(action)))
    }

    /// Попросить цикл завершиться. Повторные вызовы безвредны.
    pub fn post_quit(&self) -> Result<()> {
        self.shared.send(Marker::Quit, None)
    }
}

impl std::fmt::Debug for LoopProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopProxy")
            .field("closed", &self.shared.writer.lock().is_none())
            .finish()
    }
}

/// Что сделал [`WakeupChannel::drain_one`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    Nop,
    Quit,
    Action,
}

pub struct WakeupChannel {
    shared: Arc<Shared>,
    reader: RefCell<Option<File>>,
}

impl WakeupChannel {
    pub fn new() -> Result<Self> {
        // Неблокирующий: поток цикла не должен ждать на собственном канале
        let pipe = PosixPipe::new(true)?;
        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                writer: Mutex::new(Some(Writer {
                    file: pipe.writer,
                    owed: VecDeque::new(),
                })),
            }),
            reader: RefCell::new(Some(pipe.reader)),
        })
    }

    pub fn proxy(&self) -> LoopProxy {
        LoopProxy {
            shared: self.shared.clone(),
        }
    }

    pub fn post_action(&self, action: impl FnOnce() + Send + 'static) -> Result<()> {
        self.shared.send(Marker::Action, Some(Box::new(action)))
    }

    pub fn post_quit(&self) -> Result<()> {
        self.shared.send(Marker::Quit, None)
    }

    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.reader.borrow().as_ref().map(|r| r.as_raw_fd())
    }

    pub fn is_closed(&self) -> bool {
        self.reader.borrow().is_none()
    }

    pub fn pending_actions(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Прочитать ровно один маркер и выполнить связанную с ним работу.
    ///
    /// Вызывается только из потока цикла и только когда дескриптор готов,
    /// на пустом канале вернётся `Wakeup` с `WouldBlock`.
    pub fn drain_one(&self) -> Result<Drained> {
        let mut byte = [0u8; 1];
        {
            let mut reader = self.reader.borrow_mut();
            let Some(file) = reader.as_mut() else {
                return AutkError::invalid_state("канал пробуждения закрыт");
            };
            match file.read(&mut byte) {
                Ok(0) => {
                    return Err(AutkError::Wakeup(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "пишущий конец канала пробуждения закрыт",
                    )))
                }
                Ok(_) => {}
                Err(e) => return Err(AutkError::Wakeup(e)),
            }
        }
        self.shared.flush_owed()?;

        match Marker::from_byte(byte[0]) {
            Some(Marker::Nop) => Ok(Drained::Nop),
            Some(Marker::Quit) => Ok(Drained::Quit),
            Some(Marker::Action) => {
                // Замок отпускается до вызова: действие может поставить следующее
                let action = self.shared.queue.lock().pop_front();
                match action {
                    Some(action) => action(),
                    None => warn!("Маркер действия без действия в очереди"),
                }
                Ok(Drained::Action)
            }
            None => Err(autk_error!(
                protocol,
                "неизвестный маркер в канале пробуждения: {}",
                byte[0]
            )),
        }
    }

    /// Закрыть оба конца канала. Недоставленные действия отбрасываются.
    pub fn close(&self) {
        let writer = self.shared.writer.lock().take();
        let reader = self.reader.borrow_mut().take();
        if writer.is_none() && reader.is_none() {
            return;
        }

        let dropped = std::mem::take(&mut *self.shared.queue.lock());
        if !dropped.is_empty() {
            debug!("Канал пробуждения закрыт, отброшено действий: {}", dropped.len());
        }
    }
}

impl Drop for WakeupChannel {
    fn drop(&mut self) {
        self.close();
    }
}
