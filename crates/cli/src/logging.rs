use anyhow::{anyhow, Result};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

/// Initialize console logging. `--debug` enables per-file trace output with
/// level and module prefixes; the default prints bare messages.
pub fn init(debug: bool) -> Result<()> {
    let (level, pattern) = if debug {
        (LevelFilter::Debug, "{l}:{M}: {m}{n}")
    } else {
        (LevelFilter::Info, "{m}{n}")
    };

    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(Root::builder().appender("console").build(level))
        .map_err(|e| anyhow!("failed to build log config: {e}"))?;

    log4rs::init_config(config).map_err(|e| anyhow!("failed to initialize logging: {e}"))?;
    Ok(())
}
