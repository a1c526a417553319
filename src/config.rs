use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::events::{Point, Size, WindowStyle};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub display: DisplayConfig,
    pub window: WindowConfig,
    pub application: ApplicationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Имя X11 дисплея; без него берётся $DISPLAY
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: Option<String>,
    pub width: u32,
    pub height: u32,
    pub style: String,
    pub x: Option<i32>,
    pub y: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub quit_on_last_window_closed: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: None,
            width: 640,
            height: 480,
            style: "normal".to_string(),
            x: None,
            y: None,
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            quit_on_last_window_closed: true,
        }
    }
}

impl WindowConfig {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Начальное положение, если задана хотя бы одна координата
    pub fn location(&self) -> Option<Point> {
        match (self.x, self.y) {
            (None, None) => None,
            (x, y) => Some(Point::new(x.unwrap_or(0), y.unwrap_or(0))),
        }
    }

    pub fn style(&self) -> WindowStyle {
        WindowStyle::parse(&self.style).unwrap_or_default()
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("AUTK_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "compact" | "pretty" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Валидация настроек окна
        if WindowStyle::parse(&self.window.style).is_none() {
            anyhow::bail!("Неверный стиль окна: {}", self.window.style);
        }

        if self.window.size().is_empty() {
            anyhow::bail!(
                "Размер окна должен быть больше 0, получено {}",
                self.window.size()
            );
        }

        if let Some(name) = &self.display.name {
            if name.trim().is_empty() {
                anyhow::bail!("Пустое имя дисплея");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.application.quit_on_last_window_closed);
        assert_eq!(config.window.location(), None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "json".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.window.style = "popup".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.window.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_merges_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "autk.toml",
                r#"
                [display]
                name = ":1"

                [window]
                title = "Отладчик"
                style = "dialog"
                x = 100
                "#,
            )?;
            jail.set_env("AUTK_WINDOW__WIDTH", "1024");
            jail.set_env("AUTK_APPLICATION__QUIT_ON_LAST_WINDOW_CLOSED", "false");

            let config = Config::load("autk.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.display.name.as_deref(), Some(":1"));
            assert_eq!(config.window.title.as_deref(), Some("Отладчик"));
            assert_eq!(config.window.style(), WindowStyle::Dialog);
            assert_eq!(config.window.size(), Size::new(1024, 480));
            assert_eq!(config.window.location(), Some(Point::new(100, 0)));
            assert!(!config.application.quit_on_last_window_closed);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level, "info");
            assert_eq!(config.window.size(), Size::new(640, 480));
            Ok(())
        });
    }
}
