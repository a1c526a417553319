//! Таблица атомов X11, которые нужны провайдеру дисплея.
//!
//! Все имена перечислены явно в [`AtomName::ALL`] и разрешаются за один
//! пакетный проход: сначала отправляются все запросы, затем собираются все ответы.

use crate::autk_error;
use crate::error::Result;
use crate::events::WindowStyle;

pub type Atom = u32;

// Предопределённые атомы протокола X11 (не требуют InternAtom)
pub const ATOM_NONE: Atom = 0;
pub const ATOM_ATOM: Atom = 4;
pub const ATOM_STRING: Atom = 31;
pub const ATOM_WM_ICON_NAME: Atom = 37;
pub const ATOM_WM_NAME: Atom = 39;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomName {
    WmProtocols,
    WmDeleteWindow,
    NetWmName,
    NetWmIconName,
    Utf8String,
    NetWmWindowType,
    NetWmWindowTypeNormal,
    NetWmWindowTypeDialog,
    NetWmWindowTypeUtility,
}

const ATOM_COUNT: usize = 9;

impl AtomName {
    /// Порядок совпадает с порядком объявления вариантов
    pub const ALL: [AtomName; ATOM_COUNT] = [
        AtomName::WmProtocols,
        AtomName::WmDeleteWindow,
        AtomName::NetWmName,
        AtomName::NetWmIconName,
        AtomName::Utf8String,
        AtomName::NetWmWindowType,
        AtomName::NetWmWindowTypeNormal,
        AtomName::NetWmWindowTypeDialog,
        AtomName::NetWmWindowTypeUtility,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            AtomName::WmProtocols => "WM_PROTOCOLS",
            AtomName::WmDeleteWindow => "WM_DELETE_WINDOW",
            AtomName::NetWmName => "_NET_WM_NAME",
            AtomName::NetWmIconName => "_NET_WM_ICON_NAME",
            AtomName::Utf8String => "UTF8_STRING",
            AtomName::NetWmWindowType => "_NET_WM_WINDOW_TYPE",
            AtomName::NetWmWindowTypeNormal => "_NET_WM_WINDOW_TYPE_NORMAL",
            AtomName::NetWmWindowTypeDialog => "_NET_WM_WINDOW_TYPE_DIALOG",
            AtomName::NetWmWindowTypeUtility => "_NET_WM_WINDOW_TYPE_UTILITY",
        }
    }

    pub fn window_type(style: WindowStyle) -> AtomName {
        match style {
            WindowStyle::Normal => AtomName::NetWmWindowTypeNormal,
            WindowStyle::Dialog => AtomName::NetWmWindowTypeDialog,
            WindowStyle::Utility => AtomName::NetWmWindowTypeUtility,
        }
    }
}

/// Разрешённые значения атомов текущего соединения
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atoms {
    values: [Atom; ATOM_COUNT],
}

impl Atoms {
    /// Разрешить все атомы за один круг запрос/ответ.
    ///
    /// `request` отправляет запрос и возвращает его «куки», `reply` дожидается
    /// ответа на ранее отправленный запрос. Нулевой атом в ответе считается
    /// ошибкой протокола.
    pub fn intern<C>(
        mut request: impl FnMut(&'static str) -> Result<C>,
        mut reply: impl FnMut(&'static str, C) -> Result<Atom>,
    ) -> Result<Self> {
        let cookies = AtomName::ALL
            .iter()
            .map(|name| request(name.name()))
            .collect::<Result<Vec<C>>>()?;

        let mut values = [ATOM_NONE; ATOM_COUNT];
        for (name, cookie) in AtomName::ALL.iter().zip(cookies) {
            let atom = reply(name.name(), cookie)?;
            if atom == ATOM_NONE {
                return Err(autk_error!(protocol, "InternAtom вернул None для {}", name.name()));
            }
            values[*name as usize] = atom;
        }

        Ok(Self { values })
    }

    pub fn get(&self, name: AtomName) -> Atom {
        self.values[name as usize]
    }

    pub fn lookup(&self, atom: Atom) -> Option<AtomName> {
        AtomName::ALL.iter().copied().find(|name| self.get(*name) == atom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutkError;

    #[test]
    fn all_is_in_declaration_order() {
        for (index, name) in AtomName::ALL.iter().enumerate() {
            assert_eq!(*name as usize, index);
        }
    }

    #[test]
    fn intern_sends_every_request_before_any_reply() {
        let log = std::cell::RefCell::new(Vec::new());

        let atoms = Atoms::intern(
            |name| {
                log.borrow_mut().push(format!("request {}", name));
                Ok(name.len() as Atom + 100)
            },
            |name, cookie| {
                log.borrow_mut().push(format!("reply {}", name));
                Ok(cookie)
            },
        )
        .unwrap();

        let log = log.into_inner();
        let first_reply = log.iter().position(|l| l.starts_with("reply")).unwrap();
        assert_eq!(first_reply, AtomName::ALL.len());
        assert_eq!(atoms.get(AtomName::WmProtocols), "WM_PROTOCOLS".len() as Atom + 100);
    }

    #[test]
    fn zero_reply_is_protocol_error() {
        let result = Atoms::intern(|_| Ok(()), |_, _| Ok(ATOM_NONE));
        assert!(matches!(result, Err(AutkError::Protocol(_))));
    }

    #[test]
    fn lookup_finds_name_by_value() {
        let mut next = 300;
        let atoms = Atoms::intern(
            |_| {
                next += 1;
                Ok(next)
            },
            |_, cookie| Ok(cookie),
        )
        .unwrap();

        let delete = atoms.get(AtomName::WmDeleteWindow);
        assert_eq!(atoms.lookup(delete), Some(AtomName::WmDeleteWindow));
        assert_eq!(atoms.lookup(ATOM_STRING), None);
        assert_eq!(
            AtomName::window_type(WindowStyle::Dialog),
            AtomName::NetWmWindowTypeDialog
        );
    }
}
