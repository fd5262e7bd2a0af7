use std::io;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const STDOUT_FILTER: &str =
    "info,web_request=info,embedding=info,vector_search=info,db_query=warn,sqlx=off";
const FILE_FILTER: &str = "info,embedding=debug,vector_search=debug,db_query=info,sqlx=warn";

pub fn configure_logging() {
    // Connection chatter from the HTTP stack is never useful on the console
    let custom_filter = FilterFn::new(|metadata| {
        !(metadata.level() > &Level::INFO
            && (metadata.target().starts_with("hyper") || metadata.target().starts_with("h2")))
    });

    // Stdout log configuration, RUST_LOG wins over the default
    let stdout_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(STDOUT_FILTER));
    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_filter(stdout_filter)
        .with_filter(custom_filter);

    // File log configuration
    let file_appender = rolling::daily("logs", "proofmark.log");
    let file_log = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_filter(EnvFilter::new(FILE_FILTER));

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}
