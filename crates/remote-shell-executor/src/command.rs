//! Remote command line building utilities.

use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Failed to quote command: {0}")]
    QuoteError(#[from] shlex::QuoteError),
    #[error("Invalid environment variable name: {0}")]
    InvalidEnvName(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Quote the parts into a single POSIX shell line.
    ///
    /// # Errors
    /// Returns error if a part cannot be quoted (e.g. contains a NUL byte).
    pub fn to_command_line(&self) -> Result<String, CommandBuildError> {
        let words =
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        Ok(shlex::try_join(words)?)
    }
}

/// Builder for remote command lines.
///
/// The base is a single simple command (no pipes or redirections); every
/// word is re-quoted, so parameters never reach the remote shell unescaped.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base command.
    pub base: String,
    /// Optional parameters to append.
    pub params: Option<Vec<String>>,
    /// Remote directory to `cd` into first.
    pub working_dir: Option<String>,
    /// Environment assignments prefixed to the command.
    pub env: Vec<(String, String)>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: None,
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Create a builder from already-split words. Nothing is re-parsed.
    #[must_use]
    pub fn from_words<I>(words: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::new(String::new()).params(words)
    }

    /// Add parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Override the base command.
    #[must_use]
    pub fn override_base<S: Into<String>>(mut self, base: S) -> Self {
        self.base = base.into();
        self
    }

    /// Extend parameters.
    #[must_use]
    pub fn extend_params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let extra: Vec<String> = more.into_iter().map(Into::into).collect();
        match &mut self.params {
            Some(p) => p.extend(extra),
            None => self.params = Some(extra),
        }
        self
    }

    /// Run the command from this remote directory.
    #[must_use]
    pub fn current_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable for the command.
    #[must_use]
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Split the base and append parameters.
    ///
    /// # Errors
    /// Returns error if the base cannot be parsed or is empty.
    pub fn build_parts(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;
        if let Some(ref params) = self.params {
            parts.extend(params.iter().cloned());
        }

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }

    /// Build the full remote command line.
    ///
    /// # Errors
    /// Returns error if the command is invalid or cannot be quoted.
    pub fn build(&self) -> Result<String, CommandBuildError> {
        let command = self.build_parts()?.to_command_line()?;

        let mut line = String::new();
        if let Some(ref dir) = self.working_dir {
            line.push_str("cd ");
            line.push_str(&shlex::try_quote(dir)?);
            line.push_str(" && ");
        }
        for (key, value) in &self.env {
            if !is_env_name(key) {
                return Err(CommandBuildError::InvalidEnvName(key.clone()));
            }
            line.push_str(key);
            line.push('=');
            line.push_str(&shlex::try_quote(value)?);
            line.push(' ');
        }
        line.push_str(&command);

        tracing::trace!(command = %line, "Built remote command line");
        Ok(line)
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_is_unchanged() {
        let line = CommandBuilder::new("uptime").build().unwrap();
        assert_eq!(line, "uptime");
    }

    fn words(line: &str) -> Vec<String> {
        shlex::split(line).unwrap()
    }

    #[test]
    fn params_are_quoted() {
        let line = CommandBuilder::new("ls -la")
            .params(["/var/log/my app"])
            .extend_params(["it's"])
            .build()
            .unwrap();
        assert_eq!(words(&line), ["ls", "-la", "/var/log/my app", "it's"]);
    }

    #[test]
    fn injection_attempts_stay_literal() {
        let line = CommandBuilder::new("cat")
            .params(["x; rm -rf /", "$(id)"])
            .build()
            .unwrap();
        assert_eq!(words(&line), ["cat", "x; rm -rf /", "$(id)"]);
        assert!(!line.contains(" x; "));
    }

    #[test]
    fn working_dir_and_env_are_prefixed() {
        let line = CommandBuilder::new("make")
            .params(["test"])
            .current_dir("/srv/my project")
            .env("LANG", "C")
            .env("CFLAGS", "-O2 -g")
            .build()
            .unwrap();
        assert!(line.starts_with("cd "));
        assert_eq!(
            words(&line),
            ["cd", "/srv/my project", "&&", "LANG=C", "CFLAGS=-O2 -g", "make", "test"]
        );
    }

    #[test]
    fn override_base_replaces_program() {
        let parts = CommandBuilder::new("ls")
            .override_base("exa --long")
            .params(["/tmp"])
            .build_parts()
            .unwrap();
        assert_eq!(
            parts,
            CommandParts::new("exa".into(), vec!["--long".into(), "/tmp".into()])
        );
    }

    #[test]
    fn words_are_not_reparsed() {
        let parts = CommandBuilder::from_words(["my tool", "--flag=a b"])
            .build_parts()
            .unwrap();
        assert_eq!(parts.program, "my tool");
        assert_eq!(parts.args, ["--flag=a b"]);
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = CommandBuilder::new("   ").build().unwrap_err();
        assert!(matches!(err, CommandBuildError::EmptyCommand));
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        let err = CommandBuilder::new("echo 'oops").build().unwrap_err();
        assert!(matches!(err, CommandBuildError::InvalidBase(_)));
    }

    #[test]
    fn bad_env_name_is_rejected() {
        let err = CommandBuilder::new("env")
            .env("1BAD", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, CommandBuildError::InvalidEnvName(name) if name == "1BAD"));
    }

    #[test]
    fn nul_bytes_cannot_be_quoted() {
        let err = CommandBuilder::new("echo")
            .params(["a\0b"])
            .build()
            .unwrap_err();
        assert!(matches!(err, CommandBuildError::QuoteError(_)));
    }
}
