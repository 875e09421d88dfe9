pub type FrameworkResult<T> = Result<T, FrameworkError>;

/// Failure classes of the configuration/CLI layer. Every kind is fatal; the
/// recoverable conditions (missing optional defaults file, unknown plugin
/// choice from a defaults tier) are logged at their call sites and never
/// materialize as an error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameworkErrorKind {
    ConfigFileMissing,
    ConfigFileSyntax,
    UnknownSite,
    UnknownPlugin,
    UnknownArgument,
    EntryPoint,
    Download,
    EnvSetup,
    SelfTest,
    IoSystem,
}

impl FrameworkErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigFileMissing => "ConfigFileMissing",
            Self::ConfigFileSyntax => "ConfigFileSyntax",
            Self::UnknownSite => "UnknownSite",
            Self::UnknownPlugin => "UnknownPlugin",
            Self::UnknownArgument => "UnknownArgument",
            Self::EntryPoint => "EntryPoint",
            Self::Download => "Download",
            Self::EnvSetup => "EnvSetup",
            Self::SelfTest => "SelfTest",
            Self::IoSystem => "IoSystem",
        }
    }

    /// Usage-class failures exit with the argparse-style code 2; everything
    /// else is a fatal configuration or runtime error.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::UnknownArgument => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} [{}] {}", .kind.as_str(), .code, .message)]
pub struct FrameworkError {
    kind: FrameworkErrorKind,
    code: &'static str,
    message: String,
}

impl FrameworkError {
    pub fn new(
        kind: FrameworkErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn config_missing(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::ConfigFileMissing, code, message)
    }

    pub fn config_syntax(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::ConfigFileSyntax, code, message)
    }

    pub fn unknown_site(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::UnknownSite, code, message)
    }

    pub fn unknown_plugin(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::UnknownPlugin, code, message)
    }

    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::UnknownArgument, code, message)
    }

    pub fn entry_point(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::EntryPoint, code, message)
    }

    pub fn download(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::Download, code, message)
    }

    pub fn env_setup(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::EnvSetup, code, message)
    }

    pub fn self_test(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::SelfTest, code, message)
    }

    pub fn io_system(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FrameworkErrorKind::IoSystem, code, message)
    }

    pub const fn kind(&self) -> FrameworkErrorKind {
        self.kind
    }

    pub const fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.code, self.message)
    }

    pub fn fatal_exit_line(&self) -> String {
        format!("FATAL EXIT CODE: {}", self.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameworkError, FrameworkErrorKind};

    #[test]
    fn exit_mapping_is_stable() {
        let fatal = [
            FrameworkErrorKind::ConfigFileMissing,
            FrameworkErrorKind::ConfigFileSyntax,
            FrameworkErrorKind::UnknownSite,
            FrameworkErrorKind::UnknownPlugin,
            FrameworkErrorKind::EntryPoint,
            FrameworkErrorKind::Download,
            FrameworkErrorKind::EnvSetup,
            FrameworkErrorKind::SelfTest,
            FrameworkErrorKind::IoSystem,
        ];
        for kind in fatal {
            assert_eq!(kind.exit_code(), 1, "kind {}", kind.as_str());
        }
        assert_eq!(FrameworkErrorKind::UnknownArgument.exit_code(), 2);
    }

    #[test]
    fn fatal_error_renders_diagnostic_lines() {
        let error = FrameworkError::config_syntax(
            "CONFIG.SYNTAX",
            "sites/defaults.jsonc: line 4, column 11: expected value",
        );

        assert_eq!(error.exit_code(), 1);
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [CONFIG.SYNTAX] sites/defaults.jsonc: line 4, column 11: expected value"
        );
        assert_eq!(error.fatal_exit_line(), "FATAL EXIT CODE: 1");
    }

    #[test]
    fn usage_error_exits_with_argparse_code() {
        let error = FrameworkError::usage("CLI.USAGE", "unexpected argument '--bogus'");
        assert_eq!(error.exit_code(), 2);
        assert_eq!(error.kind(), FrameworkErrorKind::UnknownArgument);
    }
}
