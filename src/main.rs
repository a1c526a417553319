use anyhow::Result;
use autk::window::DEFAULT_TITLE;
use autk::{Application, ApplicationHandler, Config, LoopProxy, Window, WindowEvent};
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "autk-events")]
#[command(about = "Отладчик событий окна: показывает окно и печатает всё, что с ним происходит")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "autk.toml")]
    config: String,

    /// Режим сухого запуска (эмуляция X-сервера в памяти)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает значение из конфигурации)
    #[arg(long)]
    log_level: Option<String>,
}

/// Показывает главное окно при старте и решает, что делать после его закрытия
struct EventDebugger {
    window: Window,
    quit_on_last_window_closed: bool,
}

impl ApplicationHandler for EventDebugger {
    fn started(&mut self, _app: &Application) {
        if let Err(e) = self.window.show() {
            error!("Не удалось показать окно: {}", e);
        }
    }

    fn stopped(&mut self, _app: &Application) {
        info!("Цикл событий завершён");
    }

    fn last_window_closed(&mut self, app: &Application) {
        if self.quit_on_last_window_closed {
            if let Err(e) = app.quit() {
                warn!("Не удалось завершить цикл событий: {}", e);
            }
        } else {
            info!("Окон не осталось, ожидаем Ctrl+C");
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Config::load(&args.config)?;

    // Инициализация системы логирования
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, &config.logging.format)?;

    info!("Запуск autk-events v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - вместо X-сервера используется эмуляция");
    }

    let app = Application::from_config(&config, args.dry_run)?;

    let window = Window::new(&app, config.window.style(), config.window.size())?;
    let title = config.window.title.as_deref().unwrap_or(DEFAULT_TITLE.as_str());
    window.set_title(Some(title))?;
    if let Some(location) = config.window.location() {
        window.set_location(location)?;
    }
    window.set_handler(|_: &Window, event: &WindowEvent| info!("{}", event));

    app.set_handler(EventDebugger {
        window,
        quit_on_last_window_closed: config.application.quit_on_last_window_closed,
    });

    spawn_signal_listener(app.proxy())?;

    info!("Все компоненты инициализированы");
    app.run()?;

    info!("autk-events завершил работу");
    Ok(())
}

/// Ctrl+C ловится в отдельном потоке и превращается в маркер выхода
fn spawn_signal_listener(proxy: LoopProxy) -> Result<()> {
    std::thread::Builder::new()
        .name("autk-signals".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Не удалось создать runtime для сигналов: {}", e);
                    return;
                }
            };

            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Получен сигнал завершения (Ctrl+C)");
                        if let Err(e) = proxy.post_quit() {
                            warn!("Не удалось передать запрос на завершение: {}", e);
                        }
                    }
                    Err(err) => {
                        error!("Ошибка при ожидании сигнала завершения: {}", err);
                    }
                }
            });
        })?;
    Ok(())
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
    }

    Ok(())
}
