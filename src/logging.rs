use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "LINEAGE_LOG";
pub const DEFAULT_DIRECTIVE: &str = "package_lineage=info";

/// Installs a stderr fmt subscriber filtered by `LINEAGE_LOG`, falling back to
/// `default_directive`. Returns `false` when a global subscriber was already set.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init(DEFAULT_DIRECTIVE);
        assert!(!init(DEFAULT_DIRECTIVE));
    }
}
