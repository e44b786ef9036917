use std::path::Path;

use error_stack::ResultExt;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

use crate::error::{RegridError, RegridResult};

fn pattern(rank: usize) -> String {
    format!("{{d(%Y-%m-%d %H:%M:%S)}} [rank {rank}] [{{l}}] {{M}} - {{m}}{{n}}")
}

/// Build the logger configuration: stderr always, plus a file if `log_file` is given.
pub fn logging_config(level: log::LevelFilter, rank: usize, log_file: Option<&Path>) -> RegridResult<Config> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(&format!("{{h({})}}", pattern(rank)))))
        .target(Target::Stderr)
        .build();

    let mut config = Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = log_file {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(&pattern(rank))))
            .build(path)
            .change_context_lazy(|| RegridError::context(format!("opening log file {}", path.display())))?;
        config = config.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    config
        .build(root.build(level))
        .change_context_lazy(|| RegridError::configuration("invalid logger configuration"))
}

pub fn init_logging(level: log::LevelFilter, rank: usize, log_file: Option<&Path>) -> RegridResult<()> {
    let config = logging_config(level, rank, log_file)?;
    log4rs::init_config(config).change_context_lazy(|| RegridError::configuration("failed to initialize logger"))?;
    Ok(())
}
