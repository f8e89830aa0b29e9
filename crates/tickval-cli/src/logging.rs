//! Process-wide `tracing` subscriber.
//!
//! Logs go to stderr so stdout stays machine-readable JSON. `RUST_LOG` overrides the
//! filter; otherwise the level follows the deployment environment.

use tickval_core::DeploymentEnv;
use tracing_subscriber::EnvFilter;

pub fn init(env: DeploymentEnv) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(env)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match env {
        DeploymentEnv::Production => builder.json().try_init(),
        DeploymentEnv::Development | DeploymentEnv::Test => builder.try_init(),
    };
    if let Err(error) = installed {
        eprintln!("warning: logging not initialized: {error}");
    }
}

fn default_directives(env: DeploymentEnv) -> String {
    let level = match env {
        DeploymentEnv::Production => "info",
        DeploymentEnv::Development | DeploymentEnv::Test => "debug",
    };
    format!("warn,tickval={level},tickval_core={level},tickval_warehouse={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_logs_at_info_and_development_at_debug() {
        assert!(default_directives(DeploymentEnv::Production).contains("tickval_core=info"));
        assert!(default_directives(DeploymentEnv::Development).contains("tickval_core=debug"));
        assert!(default_directives(DeploymentEnv::Test).starts_with("warn,"));
    }
}
