use tracing_subscriber::{
    filter::Directive, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Installs JSON logging on stderr, filtered by `RUST_LOG`.
///
/// `quiet` limits this crate to errors; stdout stays free for command output.
pub fn init_logging(quiet: bool) {
    let directive = if quiet {
        "campus_session=error"
    } else {
        "campus_session=info"
    };

    let filter = match directive.parse::<Directive>() {
        Ok(d) => EnvFilter::from_default_env().add_directive(d),
        Err(_) => EnvFilter::from_default_env(),
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(filter)
        .try_init();
}
