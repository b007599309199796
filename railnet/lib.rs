pub mod builder;
pub mod config;
pub mod graph;
pub mod io;
pub mod merge;
pub mod projection;
pub mod route;
pub mod snap;

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}
