use chrono::Local;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::runtime::ConfigBuilder;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::Config;
use std::mem;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l})} [{h({t})}] {m}{n}";

fn file_appender(config: &mut ConfigBuilder) -> anyhow::Result<()> {
    let now = Local::now();
    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(format!("logs/{}.log", now.format("%Y-%m-%d_%H:%M:%S")))?;

    *config = mem::take(config).appender(Appender::builder().build("file", Box::new(file)));
    Ok(())
}

/// Installs the global logger.
///
/// Only records of this crate are emitted; `verbose` lowers the level from
/// info to debug, which includes every selection and registry retry.
pub fn create_logger(verbose: bool, log_to_file: bool) -> anyhow::Result<()> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut config = Config::builder();
    let mut logger = Logger::builder().appender("console");

    if log_to_file {
        file_appender(&mut config)?;
        logger = logger.appender("file");
    }

    let config = config
        .appender(Appender::builder().build("console", Box::new(console)))
        .logger(logger.build(env!("CARGO_CRATE_NAME"), level))
        .build(Root::builder().build(LevelFilter::Off))?;

    log4rs::init_config(config)?;
    Ok(())
}
