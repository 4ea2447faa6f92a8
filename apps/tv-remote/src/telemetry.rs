use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Registry,
};

const FALLBACK_FILTER: &str = "info";

/// Install the global subscriber. In `verbose` mode each line also carries the
/// emitting module and source location. An unparsable `filter` falls back to
/// `info` and is reported once the subscriber is up.
pub fn init_tracing(filter: &str, verbose: bool) -> Result<(), TryInitError> {
    let (env_filter, rejected) = parse_filter(filter);
    let fmt_layer = fmt::layer()
        .with_target(verbose)
        .with_file(verbose)
        .with_line_number(verbose);
    Registry::default().with(env_filter).with(fmt_layer).try_init()?;
    if let Some(err) = rejected {
        tracing::warn!(filter, error = %err, "invalid log filter, falling back to {FALLBACK_FILTER}");
    }
    Ok(())
}

fn parse_filter(filter: &str) -> (EnvFilter, Option<tracing_subscriber::filter::ParseError>) {
    match EnvFilter::try_new(filter) {
        Ok(env_filter) => (env_filter, None),
        Err(err) => (EnvFilter::new(FALLBACK_FILTER), Some(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filter_falls_back_to_info() {
        let (env_filter, rejected) = parse_filter("tv_remote=[[bogus");
        assert!(rejected.is_some());
        assert_eq!(env_filter.to_string(), FALLBACK_FILTER);

        let (_, rejected) = parse_filter("info,tv_remote=debug,adb_broker=debug");
        assert!(rejected.is_none());
    }

    #[test]
    fn subscriber_installs_once() {
        assert!(init_tracing("debug", true).is_ok());
        assert!(init_tracing("debug", false).is_err());
    }
}
