//! ログ出力の初期化
//!
//! `RUST_LOG` で出力レベルを指定できます（未指定時は `info`）。

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "info";

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// ログ初期化時のエラー
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// `RUST_LOG` の書式が不正
    #[error("Invalid log filter directive: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),
    /// グローバルなサブスクライバの登録に失敗
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 標準出力へのログ出力を初期化
///
/// 2回目以降、または別のサブスクライバが登録済みの場合は何もしません。
pub fn init() -> Result<(), LoggingError> {
    if INITIALIZED.get().is_some() || tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = build_env_filter()?;
    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stdout));
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = INITIALIZED.set(());

    tracing::debug!("Logging initialized");
    Ok(())
}

fn build_env_filter() -> Result<EnvFilter, LoggingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => Ok(EnvFilter::try_new(directives)?),
        _ => Ok(EnvFilter::try_new(DEFAULT_FILTER)?),
    }
}
