//! Command-line flag parsing for the instrumentation options.
//!
//! The instrumenter itself ships no binary; the wrapper that drives the
//! toolchain forwards its pass arguments here as an argv-style list.

use anyhow::Context;
use clap::{Arg, ArgAction, Command};

use crate::options::Options;

fn flags_command() -> Command {
    Command::new("whiro")
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("only-main")
                .long("only-main")
                .action(ArgAction::SetTrue)
                .help("Install inspection points only in the main function"),
        )
        .arg(
            Arg::new("inspect-stack")
                .long("inspect-stack")
                .action(ArgAction::SetTrue)
                .help("Inspect only the variables on the stack of functions"),
        )
        .arg(
            Arg::new("inspect-static")
                .long("inspect-static")
                .action(ArgAction::SetTrue)
                .help("Inspect only the static variables"),
        )
        .arg(
            Arg::new("inspect-heap")
                .long("inspect-heap")
                .action(ArgAction::SetTrue)
                .help("Inspect only the variables pointing to the heap (implies precise mode)"),
        )
        .arg(
            Arg::new("precise")
                .long("precise")
                .action(ArgAction::SetTrue)
                .help("Follow pointers instead of reporting their declared type"),
        )
        .arg(
            Arg::new("full-heap")
                .long("full-heap")
                .action(ArgAction::SetTrue)
                .help("Dump all live heap entries after every inspection point"),
        )
}

impl Options {
    /// Parses an argv-style flag list, e.g. `["--inspect-heap", "--full-heap"]`
    pub fn from_flags<I, S>(argv: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let matches = flags_command()
            .try_get_matches_from(argv.into_iter().map(Into::into))
            .context("invalid instrumentation flags")?;
        Ok(Self {
            only_main: matches.get_flag("only-main"),
            select_stack: matches.get_flag("inspect-stack"),
            select_static: matches.get_flag("inspect-static"),
            select_heap: matches.get_flag("inspect-heap"),
            precise: matches.get_flag("precise"),
            full_heap: matches.get_flag("full-heap"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_flags() {
        let options = Options::from_flags(["--inspect-heap", "--full-heap"]).unwrap();
        assert!(options.select_heap);
        assert!(options.full_heap);
        assert!(!options.only_main);
        assert!(options.track_pointers());
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(Options::from_flags(["--frobnicate"]).is_err());
    }

    #[test]
    fn empty_argv_gives_defaults() {
        let options = Options::from_flags(Vec::<String>::new()).unwrap();
        assert_eq!(options, Options::default());
    }
}
