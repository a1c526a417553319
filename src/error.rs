use std::fmt;
use thiserror::Error;

/// Причина, по которой нативный транспорт стал непригоден.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    Io,
    UnsupportedExtension,
    OutOfMemory,
    RequestLengthExceeded,
    InvalidDisplayName,
    InvalidScreen,
    FdPassingFailed,
    Unknown,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionErrorKind::Io => "ошибка ввода-вывода соединения",
            ConnectionErrorKind::UnsupportedExtension => "расширение не поддерживается сервером",
            ConnectionErrorKind::OutOfMemory => "недостаточно памяти",
            ConnectionErrorKind::RequestLengthExceeded => "превышена допустимая длина запроса",
            ConnectionErrorKind::InvalidDisplayName => "неверное имя дисплея",
            ConnectionErrorKind::InvalidScreen => "неверный экран по умолчанию",
            ConnectionErrorKind::FdPassingFailed => "не удалось передать файловый дескриптор",
            ConnectionErrorKind::Unknown => "неизвестная ошибка соединения",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum AutkError {
    #[error("Ошибка соединения с дисплеем ({kind}): {detail}")]
    Connection {
        kind: ConnectionErrorKind,
        detail: String,
    },

    #[error("Недопустимое состояние: {0}")]
    InvalidState(String),

    #[error("Ошибка протокола: {0}")]
    Protocol(String),

    #[error("Ошибка канала пробуждения: {0}")]
    Wakeup(#[source] std::io::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),
}

impl AutkError {
    pub fn connection(kind: ConnectionErrorKind, detail: impl Into<String>) -> Self {
        AutkError::Connection {
            kind,
            detail: detail.into(),
        }
    }

    pub fn invalid_state<T>(msg: impl Into<String>) -> Result<T> {
        Err(AutkError::InvalidState(msg.into()))
    }

    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            AutkError::Connection { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AutkError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! autk_error {
    (invalid_state, $($arg:tt)*) => {
        $crate::error::AutkError::InvalidState(format!($($arg)*))
    };
    (protocol, $($arg:tt)*) => {
        $crate::error::AutkError::Protocol(format!($($arg)*))
    };
    (connection, $kind:expr, $($arg:tt)*) => {
        $crate::error::AutkError::connection($kind, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_kinds_have_distinct_messages() {
        let kinds = [
            ConnectionErrorKind::Io,
            ConnectionErrorKind::UnsupportedExtension,
            ConnectionErrorKind::OutOfMemory,
            ConnectionErrorKind::RequestLengthExceeded,
            ConnectionErrorKind::InvalidDisplayName,
            ConnectionErrorKind::InvalidScreen,
            ConnectionErrorKind::FdPassingFailed,
            ConnectionErrorKind::Unknown,
        ];
        let messages: std::collections::HashSet<String> =
            kinds.iter().map(|k| k.to_string()).collect();
        assert_eq!(messages.len(), kinds.len());
    }

    #[test]
    fn macro_builds_variants() {
        let err = autk_error!(invalid_state, "окно {} уничтожено", 7);
        assert!(matches!(err, AutkError::InvalidState(ref m) if m == "окно 7 уничтожено"));

        let err = autk_error!(connection, ConnectionErrorKind::InvalidScreen, "экран {}", 3);
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::InvalidScreen));
    }
}
