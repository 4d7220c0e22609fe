use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use thiserror::Error;

use super::pattern;

#[derive(Error, Debug, PartialEq)]
pub enum SshConfigError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("in {path:?}: {source}")]
    Included {
        path: PathBuf,
        source: Box<SshConfigError>,
    },
}

/// Same nesting limit as the OpenSSH client.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// The four fields the resolver cares about for one alias. Every field may be
/// missing; missing means "unspecified", never "cleared".
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HostConfigEntry {
    pub host_name: Option<String>,
    pub user: Option<String>,
    /// kept as text, the resolver decides what a valid port is
    pub port: Option<String>,
    pub identity_file: Option<String>,
}

impl HostConfigEntry {
    fn is_complete(&self) -> bool {
        self.host_name.is_some()
            && self.user.is_some()
            && self.port.is_some()
            && self.identity_file.is_some()
    }

    fn fill(&mut self, keyword: &str, value: &str) {
        let slot = match keyword {
            "hostname" => &mut self.host_name,
            "user" => &mut self.user,
            "port" => &mut self.port,
            "identityfile" => &mut self.identity_file,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    /// directives that appear before the first `Host` line
    Global,
    Host(Vec<String>),
    /// `Match` criteria are not evaluated, so these blocks never apply
    Match,
}

#[derive(Debug, PartialEq)]
struct Section {
    block: Block,
    directives: Vec<(String, String)>,
}

impl Section {
    fn new(block: Block) -> Self {
        Section {
            block,
            directives: Vec::new(),
        }
    }

    fn applies_to(&self, alias: &str) -> bool {
        match &self.block {
            Block::Global => true,
            Block::Host(patterns) => pattern::matches_any(alias, patterns.iter().map(String::as_str)),
            Block::Match => false,
        }
    }
}

/// A parsed `ssh_config(5)` file.
#[derive(Debug, PartialEq)]
pub struct SshConfig {
    sections: Vec<Section>,
}

impl SshConfig {
    /// Parses a single file's content. `Include` lines are not followed here
    /// since there is no directory to resolve them against.
    pub fn parse(content: &str) -> Result<SshConfig, SshConfigError> {
        let mut sections = vec![Section::new(Block::Global)];
        parse_into(content, &mut sections, None, 0)?;
        Ok(SshConfig { sections })
    }

    /// Collects the settings for `alias`. The first value obtained for a
    /// field wins, so specific `Host` blocks must come before `Host *`.
    pub fn lookup(&self, alias: &str) -> HostConfigEntry {
        let mut entry = HostConfigEntry::default();
        for section in self.sections.iter().filter(|s| s.applies_to(alias)) {
            for (keyword, value) in &section.directives {
                entry.fill(keyword, value);
            }
            if entry.is_complete() {
                break;
            }
        }
        entry
    }
}

/// Where `Include` patterns are resolved from.
struct Includes<'a> {
    /// relative patterns are taken from here, normally `~/.ssh`
    base_dir: &'a Path,
    home: Option<&'a Path>,
}

impl Includes<'_> {
    /// Expands one `Include` argument into the regular files it names, in
    /// glob (lexical) order.
    fn expand(&self, pattern: &str, line: usize) -> Result<Vec<PathBuf>, SshConfigError> {
        let expanded = match (pattern.strip_prefix("~/"), self.home) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(pattern),
        };
        let full = if expanded.is_relative() {
            self.base_dir.join(expanded)
        } else {
            expanded
        };
        let Some(text) = full.to_str() else {
            return Err(SshConfigError::Malformed {
                line,
                reason: format!("Include path {full:?} is not valid UTF-8"),
            });
        };

        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let entries = glob::glob_with(text, options).map_err(|e| SshConfigError::Malformed {
            line,
            reason: format!("bad Include pattern {pattern}: {e}"),
        })?;
        Ok(entries
            .filter_map(Result::ok)
            .filter(|path| path.is_file())
            .collect())
    }
}

/// Appends the sections found in `content` to `sections`. Included files are
/// spliced in where the `Include` line appears; afterwards the block that was
/// open before the include is resumed.
fn parse_into(
    content: &str,
    sections: &mut Vec<Section>,
    includes: Option<&Includes>,
    depth: usize,
) -> Result<(), SshConfigError> {
    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (keyword, rest) = split_keyword(trimmed);
        let keyword = keyword.to_ascii_lowercase();
        let args = split_args(rest, line)?;
        if args.is_empty() {
            return Err(SshConfigError::Malformed {
                line,
                reason: format!("missing argument for {keyword}"),
            });
        }

        match keyword.as_str() {
            "host" => sections.push(Section::new(Block::Host(args))),
            "match" => {
                tracing::debug!("ssh config line {line}: skipping Match block");
                sections.push(Section::new(Block::Match));
            }
            "include" => {
                let Some(includes) = includes else {
                    tracing::debug!("ssh config line {line}: Include is not followed");
                    continue;
                };
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(SshConfigError::Malformed {
                        line,
                        reason: String::from("Include nested too deeply"),
                    });
                }
                let resume = sections
                    .last()
                    .map(|s| s.block.clone())
                    .unwrap_or(Block::Global);
                for pattern in &args {
                    for path in includes.expand(pattern, line)? {
                        let included = match std::fs::read_to_string(&path) {
                            Ok(included) => included,
                            Err(e) => {
                                tracing::debug!("skipping unreadable include {:?}: {}", path, e);
                                continue;
                            }
                        };
                        parse_into(&included, sections, Some(includes), depth + 1).map_err(
                            |source| SshConfigError::Included {
                                path: path.clone(),
                                source: Box::new(source),
                            },
                        )?;
                    }
                }
                sections.push(Section::new(resume));
            }
            _ => {
                if keyword == "port" && args[0].parse::<u64>().is_ok_and(|p| p > u64::from(u16::MAX)) {
                    return Err(SshConfigError::Malformed {
                        line,
                        reason: format!("port {} is out of range", args[0]),
                    });
                }
                if let Some(current) = sections.last_mut() {
                    current.directives.push((keyword, args[0].clone()));
                }
            }
        }
    }
    Ok(())
}

/// Splits `Keyword value`, `Keyword=value` and `Keyword = value`.
fn split_keyword(line: &str) -> (&str, &str) {
    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let (keyword, rest) = line.split_at(end);
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest);
    (keyword, rest.trim())
}

/// Whitespace separated arguments with double-quote grouping. A `#` at the
/// start of an argument ends the line.
fn split_args(rest: &str, line: usize) -> Result<Vec<String>, SshConfigError> {
    let mut args = Vec::new();
    let mut chars = rest.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else { break };
        if first == '#' {
            break;
        }

        let mut arg = String::new();
        if first == '"' {
            chars.next();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                arg.push(c);
            }
            if !closed {
                return Err(SshConfigError::Malformed {
                    line,
                    reason: String::from("unterminated quote"),
                });
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                arg.push(c);
            }
        }
        args.push(arg);
    }
    Ok(args)
}

/// Reads host settings from one well-known file, following its `Include`
/// lines relative to the file's directory.
#[derive(Debug, Clone)]
pub struct HostConfigReader {
    path: PathBuf,
    home: Option<PathBuf>,
}

impl HostConfigReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HostConfigReader {
            path: path.into(),
            home: None,
        }
    }

    /// Lets `Include ~/...` patterns expand.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// A missing or unreadable file yields an empty entry; only a file that
    /// fails to parse is an error.
    pub fn read(&self, alias: &str) -> Result<HostConfigEntry, SshConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HostConfigEntry::default()),
            Err(e) => {
                tracing::debug!("ignoring unreadable ssh config {:?}: {}", self.path, e);
                return Ok(HostConfigEntry::default());
            }
        };
        let includes = Includes {
            base_dir: self.path.parent().unwrap_or(Path::new(".")),
            home: self.home.as_deref(),
        };
        let mut sections = vec![Section::new(Block::Global)];
        parse_into(&content, &mut sections, Some(&includes), 0)?;
        Ok(SshConfig { sections }.lookup(alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# personal hosts
Host myhost
    HostName example.com
    User alice
    Port 2222

Host *.internal !bastion.internal
    User root
    IdentityFile ~/.ssh/internal

Host "quoted"
    IdentityFile "~/My Keys/id_ed25519"

Host *
    User fallback
    Port 22
"#;

    #[test]
    fn reads_fields_for_alias() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        assert_eq!(
            config.lookup("myhost"),
            HostConfigEntry {
                host_name: Some(String::from("example.com")),
                user: Some(String::from("alice")),
                port: Some(String::from("2222")),
                identity_file: None,
            }
        );
    }

    #[test]
    fn first_matching_value_wins() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        let entry = config.lookup("db.internal");
        assert_eq!(entry.user.as_deref(), Some("root"));
        assert_eq!(entry.port.as_deref(), Some("22"));
        assert_eq!(entry.identity_file.as_deref(), Some("~/.ssh/internal"));
        assert_eq!(entry.host_name, None);
    }

    #[test]
    fn negated_pattern_excludes_host() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        let entry = config.lookup("bastion.internal");
        assert_eq!(entry.user.as_deref(), Some("fallback"));
        assert_eq!(entry.identity_file, None);
    }

    #[test]
    fn quoted_values_keep_spaces() {
        let config = SshConfig::parse(SAMPLE).unwrap();
        assert_eq!(
            config.lookup("quoted").identity_file.as_deref(),
            Some("~/My Keys/id_ed25519")
        );
    }

    #[test]
    fn unknown_alias_only_sees_wildcards() {
        let config = SshConfig::parse("Host myhost\n  User alice\n").unwrap();
        assert_eq!(config.lookup("other"), HostConfigEntry::default());
    }

    #[test]
    fn global_directives_apply_everywhere() {
        let config = SshConfig::parse("User everyone\nHost a\n  User alice\n").unwrap();
        assert_eq!(config.lookup("a").user.as_deref(), Some("everyone"));
        assert_eq!(config.lookup("b").user.as_deref(), Some("everyone"));
    }

    #[test]
    fn equals_separator_and_case_insensitive_keywords() {
        let config = SshConfig::parse("host box\n  HOSTNAME=10.0.0.1\n  port = 2200\n").unwrap();
        let entry = config.lookup("box");
        assert_eq!(entry.host_name.as_deref(), Some("10.0.0.1"));
        assert_eq!(entry.port.as_deref(), Some("2200"));
    }

    #[test]
    fn match_blocks_never_apply() {
        let config =
            SshConfig::parse("Match host box\n  User matched\nHost box\n  User hosted\n").unwrap();
        assert_eq!(config.lookup("box").user.as_deref(), Some("hosted"));
    }

    #[test]
    fn trailing_comment_is_dropped() {
        let config = SshConfig::parse("Host box\n  Port 2022 # staging\n").unwrap();
        assert_eq!(config.lookup("box").port.as_deref(), Some("2022"));
    }

    #[test]
    fn missing_argument_is_malformed() {
        let err = SshConfig::parse("Host box\n  User\n").unwrap_err();
        assert_eq!(
            err,
            SshConfigError::Malformed {
                line: 2,
                reason: String::from("missing argument for user"),
            }
        );
    }

    #[test]
    fn unterminated_quote_is_malformed() {
        let err = SshConfig::parse("Host box\n  IdentityFile \"~/key\n").unwrap_err();
        assert!(matches!(err, SshConfigError::Malformed { line: 2, .. }));
    }

    #[test]
    fn host_without_pattern_is_malformed() {
        assert!(SshConfig::parse("Host\n").is_err());
    }

    #[test]
    fn reader_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let reader = HostConfigReader::new(dir.path().join("config"));
        assert_eq!(reader.read("myhost").unwrap(), HostConfigEntry::default());
    }

    #[test]
    fn reader_reports_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "Host myhost\n  Port \"2222\n").unwrap();
        assert!(HostConfigReader::new(&path).read("myhost").is_err());
    }

    #[test]
    fn reader_parses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, SAMPLE).unwrap();
        let entry = HostConfigReader::new(&path).read("myhost").unwrap();
        assert_eq!(entry.host_name.as_deref(), Some("example.com"));
    }

    /// `~/.ssh/config` plus extra files under a throwaway home.
    fn ssh_dir(config: &str, extra: &[(&str, &str)]) -> (tempfile::TempDir, HostConfigReader) {
        let dir = tempfile::tempdir().unwrap();
        let ssh = dir.path().join(".ssh");
        std::fs::create_dir_all(ssh.join("config.d")).unwrap();
        std::fs::write(ssh.join("config"), config).unwrap();
        for (name, content) in extra {
            std::fs::write(ssh.join(name), content).unwrap();
        }
        let reader = HostConfigReader::new(ssh.join("config")).with_home(dir.path());
        (dir, reader)
    }

    #[test]
    fn include_glob_relative_to_config_dir() {
        let (_dir, reader) = ssh_dir(
            "Include config.d/*\n",
            &[
                (
                    "config.d/work",
                    "Host myhost\n  HostName example.com\n  User alice\n  Port 2222\n",
                ),
                ("config.d/other", "Host other\n  User bob\n"),
            ],
        );
        assert_eq!(
            reader.read("myhost").unwrap(),
            HostConfigEntry {
                host_name: Some(String::from("example.com")),
                user: Some(String::from("alice")),
                port: Some(String::from("2222")),
                identity_file: None,
            }
        );
        assert_eq!(reader.read("other").unwrap().user.as_deref(), Some("bob"));
    }

    #[test]
    fn include_is_spliced_in_place() {
        let (_dir, reader) = ssh_dir(
            "Host myhost\n  User first\nInclude ~/.ssh/config.d/late\nHost *\n  Port 2200\n",
            &[("config.d/late", "Host myhost\n  User second\n  HostName late.example.com\n")],
        );
        let entry = reader.read("myhost").unwrap();
        assert_eq!(entry.user.as_deref(), Some("first"));
        assert_eq!(entry.host_name.as_deref(), Some("late.example.com"));
        assert_eq!(entry.port.as_deref(), Some("2200"));
    }

    #[test]
    fn include_inside_host_block_resumes_that_block() {
        let (_dir, reader) = ssh_dir(
            "Host myhost\n  Include config.d/common\n  User alice\n",
            &[("config.d/common", "IdentityFile ~/.ssh/shared\nHost unrelated\n  Port 1\n")],
        );
        let entry = reader.read("myhost").unwrap();
        assert_eq!(entry.identity_file.as_deref(), Some("~/.ssh/shared"));
        assert_eq!(entry.user.as_deref(), Some("alice"));
        assert_eq!(entry.port, None);
    }

    #[test]
    fn include_without_matches_is_ignored() {
        let (_dir, reader) = ssh_dir("Include config.d/*.conf\nHost a\n  User alice\n", &[]);
        assert_eq!(reader.read("a").unwrap().user.as_deref(), Some("alice"));
    }

    #[test]
    fn recursive_include_hits_depth_limit() {
        let (_dir, reader) = ssh_dir("Include config\n", &[]);
        let mut err = &reader.read("a").unwrap_err();
        let mut nesting = 0;
        while let SshConfigError::Included { source, .. } = err {
            err = source.as_ref();
            nesting += 1;
        }
        assert_eq!(nesting, MAX_INCLUDE_DEPTH);
        assert!(matches!(err, SshConfigError::Malformed { line: 1, .. }));
    }

    #[test]
    fn malformed_included_file_names_the_file() {
        let (_dir, reader) = ssh_dir("Include config.d/bad\n", &[("config.d/bad", "Host\n")]);
        match reader.read("a").unwrap_err() {
            SshConfigError::Included { path, source } => {
                assert!(path.ends_with("config.d/bad"));
                assert!(matches!(*source, SshConfigError::Malformed { line: 1, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_alone_does_not_follow_include() {
        let config = SshConfig::parse("Include /nonexistent/*\nHost a\n  User alice\n").unwrap();
        assert_eq!(config.lookup("a").user.as_deref(), Some("alice"));
    }

    #[test]
    fn out_of_range_port_is_malformed() {
        let err = SshConfig::parse("Host box\n  Port 70000\n").unwrap_err();
        assert_eq!(
            err,
            SshConfigError::Malformed {
                line: 2,
                reason: String::from("port 70000 is out of range"),
            }
        );
        // not a number at all: left for the resolver to treat as unspecified
        let config = SshConfig::parse("Host box\n  Port ssh\n").unwrap();
        assert_eq!(config.lookup("box").port.as_deref(), Some("ssh"));
    }

    #[cfg(unix)]
    #[test]
    fn reader_treats_unreadable_file_as_missing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "Host myhost\n  User alice\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read_to_string(&path).is_ok() {
            // running as root, permissions are not enforced
            return;
        }
        assert_eq!(
            HostConfigReader::new(&path).read("myhost").unwrap(),
            HostConfigEntry::default()
        );
    }
}
