use std::fs::File;
use std::io;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Анонимный канал ОС: пара (чтение, запись), оба конца с O_CLOEXEC
#[derive(Debug)]
pub struct PosixPipe {
    pub reader: File,
    pub writer: File,
}

impl PosixPipe {
    pub fn new(nonblocking: bool) -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        let mut flags = libc::O_CLOEXEC;
        if nonblocking {
            flags |= libc::O_NONBLOCK;
        }

        // SAFETY: fds указывает на массив из двух c_int, как требует pipe2(2)
        if unsafe { libc::pipe2(fds.as_mut_ptr(), flags) } != 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: pipe2 вернул два новых дескриптора, которыми больше никто не владеет
        let (reader, writer) = unsafe {
            (
                OwnedFd::from_raw_fd(fds[0]),
                OwnedFd::from_raw_fd(fds[1]),
            )
        };

        Ok(Self {
            reader: File::from(reader),
            writer: File::from(writer),
        })
    }
}

/// Результат poll(2) для одного дескриптора
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl Readiness {
    fn from_revents(revents: libc::c_short) -> Self {
        Self {
            readable: revents & libc::POLLIN != 0,
            error: revents & (libc::POLLERR | libc::POLLNVAL) != 0,
            hangup: revents & libc::POLLHUP != 0,
        }
    }
}

/// Ждать готовности на чтение любого из дескрипторов.
///
/// `None` означает бесконечное ожидание. EINTR перезапускает ожидание.
pub fn poll_readable<const N: usize>(
    fds: [RawFd; N],
    timeout: Option<Duration>,
) -> io::Result<[Readiness; N]> {
    let mut items = fds.map(|fd| libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    });
    let timeout_ms = match timeout {
        None => -1,
        Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    };

    loop {
        // SAFETY: items живёт до конца вызова, длина передаётся точно
        let rc = unsafe { libc::poll(items.as_mut_ptr(), N as libc::nfds_t, timeout_ms) };
        if rc >= 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    Ok(items.map(|item| Readiness::from_revents(item.revents)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn pipe_becomes_readable_after_write() {
        let mut pipe = PosixPipe::new(false).unwrap();
        let [before] = poll_readable([pipe.reader.as_raw_fd()], Some(Duration::ZERO)).unwrap();
        assert!(!before.readable);

        pipe.writer.write_all(&[7]).unwrap();
        let [after] = poll_readable([pipe.reader.as_raw_fd()], Some(Duration::ZERO)).unwrap();
        assert!(after.readable);

        let mut byte = [0u8; 1];
        pipe.reader.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], 7);
    }

    #[test]
    fn nonblocking_read_on_empty_pipe_would_block() {
        let mut pipe = PosixPipe::new(true).unwrap();
        let mut byte = [0u8; 1];
        let err = pipe.reader.read(&mut byte).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn closed_writer_reports_hangup() {
        let pipe = PosixPipe::new(false).unwrap();
        let reader = pipe.reader;
        drop(pipe.writer);
        let [state] = poll_readable([reader.as_raw_fd()], Some(Duration::ZERO)).unwrap();
        assert!(state.hangup);
    }
}
