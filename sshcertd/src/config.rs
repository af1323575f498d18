//! Command line and environment handling for `sshcertd`.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Result, bail};

/// Environment variable naming the upstream agent socket.
pub const UPSTREAM_ENV: &str = "SSH_AUTH_SOCK";

pub const USAGE: &str = "\
Usage: sshcertd [--] <key-file>...

Serves the agent at $SSH_AUTH_SOCK on the socket-activated listeners, adding
every certificate from the key files next to the key it was issued for.

Options:
  -h, --help  Show this help message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Key files to index, in the order given.
    pub key_files: Vec<PathBuf>,
    /// Unix socket of the agent being augmented.
    pub upstream_socket: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
    Run(Config),
    Help,
}

impl Config {
    /// Read the process arguments and environment.
    pub fn from_env() -> Result<Invocation> {
        Self::parse(std::env::args_os().skip(1), std::env::var_os(UPSTREAM_ENV))
    }

    /// Parse `args` (without the program name) and the upstream socket value.
    pub fn parse(
        args: impl IntoIterator<Item = OsString>,
        upstream_socket: Option<OsString>,
    ) -> Result<Invocation> {
        let mut key_files = Vec::new();
        let mut options_done = false;

        for arg in args {
            if !options_done {
                match arg.to_str() {
                    Some("--") => {
                        options_done = true;
                        continue;
                    }
                    Some("-h" | "--help") => return Ok(Invocation::Help),
                    Some(opt) if opt.starts_with('-') && opt.len() > 1 => {
                        bail!("unknown option '{opt}' (see --help)");
                    }
                    _ => {}
                }
            }
            key_files.push(PathBuf::from(arg));
        }

        let upstream_socket = match upstream_socket {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => bail!("{UPSTREAM_ENV} is not set; cannot reach the upstream agent"),
        };

        Ok(Invocation::Run(Config {
            key_files,
            upstream_socket,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    fn sock() -> Option<OsString> {
        Some(OsString::from("/run/user/1000/agent.sock"))
    }

    #[test]
    fn positional_paths_in_order() {
        let parsed = Config::parse(args(&["a.pub", "certs/b.pub"]), sock()).unwrap();
        assert_eq!(
            parsed,
            Invocation::Run(Config {
                key_files: vec![PathBuf::from("a.pub"), PathBuf::from("certs/b.pub")],
                upstream_socket: PathBuf::from("/run/user/1000/agent.sock"),
            })
        );
    }

    #[test]
    fn no_key_files_is_allowed() {
        match Config::parse(args(&[]), sock()) {
            Ok(Invocation::Run(config)) => assert!(config.key_files.is_empty()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn help_wins_over_missing_socket() {
        match Config::parse(args(&["--help"]), None) {
            Ok(Invocation::Help) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn double_dash_ends_options() {
        match Config::parse(args(&["--", "-odd-name.pub", "--help"]), sock()) {
            Ok(Invocation::Run(config)) => assert_eq!(
                config.key_files,
                vec![PathBuf::from("-odd-name.pub"), PathBuf::from("--help")]
            ),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = Config::parse(args(&["--verbose"]), sock()).unwrap_err();
        assert!(err.to_string().contains("--verbose"));
    }

    #[test]
    fn missing_or_empty_socket_is_rejected() {
        assert!(Config::parse(args(&["a.pub"]), None).is_err());
        assert!(Config::parse(args(&["a.pub"]), Some(OsString::new())).is_err());
    }

    #[test]
    fn lone_dash_is_a_path() {
        match Config::parse(args(&["-"]), sock()) {
            Ok(Invocation::Run(config)) => assert_eq!(config.key_files, vec![PathBuf::from("-")]),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
