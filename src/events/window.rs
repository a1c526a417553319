use serde::{Deserialize, Serialize};
use std::fmt;

/// Положение окна в координатах экрана
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Размер клиентской области окна
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Назначение окна для оконного менеджера
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStyle {
    #[default]
    Normal,
    Dialog,
    Utility,
}

impl WindowStyle {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "normal" => Some(WindowStyle::Normal),
            "dialog" => Some(WindowStyle::Dialog),
            "utility" => Some(WindowStyle::Utility),
            _ => None,
        }
    }
}

/// Публичное событие жизненного цикла окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowEvent {
    /// Оконный менеджер просит закрыть окно
    CloseRequested,
    Shown,
    Hidden,
    Moved(Point),
    Resized(Size),
    /// Последнее событие окна; после него событий не бывает
    Disposed,
}

impl WindowEvent {
    pub fn visibility(visible: bool) -> Self {
        if visible {
            WindowEvent::Shown
        } else {
            WindowEvent::Hidden
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WindowEvent::Disposed)
    }
}

impl fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowEvent::CloseRequested => write!(f, "CloseRequested"),
            WindowEvent::Shown => write!(f, "VisibilityChanged: true"),
            WindowEvent::Hidden => write!(f, "VisibilityChanged: false"),
            WindowEvent::Moved(location) => write!(f, "Moved: {}, {}", location.x, location.y),
            WindowEvent::Resized(size) => write!(f, "Resized: {}, {}", size.width, size.height),
            WindowEvent::Disposed => write!(f, "Disposed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_parsing() {
        assert_eq!(WindowStyle::parse("Normal"), Some(WindowStyle::Normal));
        assert_eq!(WindowStyle::parse("dialog"), Some(WindowStyle::Dialog));
        assert_eq!(WindowStyle::parse("UTILITY"), Some(WindowStyle::Utility));
        assert_eq!(WindowStyle::parse("splash"), None);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(WindowEvent::Moved(Point::new(10, -4)).to_string(), "Moved: 10, -4");
        assert_eq!(
            WindowEvent::Resized(Size::new(640, 480)).to_string(),
            "Resized: 640, 480"
        );
        assert_eq!(WindowEvent::visibility(true), WindowEvent::Shown);
        assert!(WindowEvent::Disposed.is_terminal());
        assert!(!WindowEvent::Hidden.is_terminal());
    }

    #[test]
    fn test_size_is_empty() {
        assert!(Size::new(0, 10).is_empty());
        assert!(!Size::new(1, 1).is_empty());
    }
}
