// Logging and verbosity control

use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive
pub const LOG_ENV: &str = "TASKFORGE_LOG";

/// Verbosity selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbosityLevel {
    /// Warnings and errors only
    Quiet,
    /// `TASKFORGE_LOG`, or `info` when unset
    Normal,
    /// Debug output
    Verbose,
}

impl VerbosityLevel {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Filter directive for this level; flags win over the environment
    pub fn directive(&self, env: Option<&str>) -> String {
        match self {
            VerbosityLevel::Quiet => "warn".to_string(),
            VerbosityLevel::Verbose => "debug".to_string(),
            VerbosityLevel::Normal => match env.map(str::trim) {
                Some(directive) if !directive.is_empty() => directive.to_string(),
                _ => "info".to_string(),
            },
        }
    }
}

/// Install the stderr subscriber; stdout is reserved for command output
pub fn init_logging(verbose: bool, quiet: bool) {
    let level = VerbosityLevel::from_flags(verbose, quiet);
    let env = std::env::var(LOG_ENV).ok();
    let directive = level.directive(env.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber may already be installed when embedded or under test
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        assert_eq!(VerbosityLevel::from_flags(false, false), VerbosityLevel::Normal);
        assert_eq!(VerbosityLevel::from_flags(true, false), VerbosityLevel::Verbose);
        assert_eq!(VerbosityLevel::from_flags(true, true), VerbosityLevel::Quiet);
    }

    #[test]
    fn test_directive_defaults_to_info() {
        assert_eq!(VerbosityLevel::Normal.directive(None), "info");
        assert_eq!(VerbosityLevel::Normal.directive(Some("  ")), "info");
    }

    #[test]
    fn test_env_directive_used_without_flags() {
        let env = Some("taskforge_orchestration=trace");
        assert_eq!(VerbosityLevel::Normal.directive(env), "taskforge_orchestration=trace");
        assert_eq!(VerbosityLevel::Verbose.directive(env), "debug");
        assert_eq!(VerbosityLevel::Quiet.directive(env), "warn");
    }
}
