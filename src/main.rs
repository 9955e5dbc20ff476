use sheetsync_lib::logging::{LogConfig, SizeRotatingWriter};
use sheetsync_lib::{AppConfig, AppState};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

/// 初始化日志系统
fn init_logging() {
    let config = LogConfig::from_env();

    let level = config.tracing_level();
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "sqlx=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    // 文件日志层，创建失败时只输出到控制台
    let file_layer = config
        .enabled
        .then(|| SizeRotatingWriter::new(&config.file, config.max_size_mb))
        .and_then(|writer| match writer {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!("无法打开日志文件 {:?}: {}", config.file, e);
                None
            }
        })
        .map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
        });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Ctrl-C（unix 下还有 SIGTERM）触发取消
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("无法监听 SIGTERM: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("收到退出信号");
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("配置无效: {}", e);
            std::process::exit(1);
        }
    };

    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("初始化失败: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let exit = state.engine().run(cancel).await;
    state.cleanup().await;

    std::process::exit(exit.exit_code());
}
