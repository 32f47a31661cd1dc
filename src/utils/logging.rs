use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn level_from_cli(cli: &crate::cli::args::Cli) -> tracing::Level {
    if cli.debug {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    }
}

/// `RUST_LOG` controls every target but `vfdash`, which follows `-v`/`-d`.
/// Without `RUST_LOG` other crates log at warn.
fn build_filter(level: tracing::Level, rust_log: Option<&str>) -> Result<EnvFilter> {
    let filter = match rust_log.map(str::trim).filter(|directives| !directives.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::new("warn"),
    };
    Ok(filter.add_directive(format!("vfdash={}", level).parse()?))
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
pub fn init(level: tracing::Level) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, rust_log.as_deref())?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
