// SPDX-License-Identifier: GPL-3.0-or-later

//! `-ve_*` argument family (§6). The toolkit only consumes arguments
//! that start with `-ve_`; everything else is left untouched for the
//! application to parse with its own `clap::Parser`, so this module
//! walks argv by hand, one `-ve_*` flag at a time, and leans on
//! `clap::Command::try_get_matches_from` only to validate the shape of
//! each flag's own operands.

use clap::{Arg, ArgAction, Command};

use crate::error::DebugFlags;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    pub options: Vec<(String, String)>,
    pub debug: DebugFlags,
}

fn ve_opt_command() -> Command {
    Command::new("-ve_opt")
        .no_binary_name(true)
        .disable_help_flag(true)
        .arg(Arg::new("name").required(true))
        .arg(Arg::new("value").required(true))
}

fn ve_debug_command() -> Command {
    Command::new("-ve_debug")
        .no_binary_name(true)
        .disable_help_flag(true)
        .arg(Arg::new("spec").required(true).action(ArgAction::Set))
}

/// Splits `argv` into toolkit-consumed options/debug spec and the
/// leftover arguments meant for the application.
pub fn parse(argv: &[String]) -> Result<(CliArgs, Vec<String>), clap::Error> {
    let mut result = CliArgs::default();
    let mut rest = Vec::new();
    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "-ve_opt" => {
                let operands = &argv[i + 1..(i + 3).min(argv.len())];
                let matches = ve_opt_command().try_get_matches_from(operands)?;
                let name: String = matches.get_one::<String>("name").unwrap().clone();
                let value: String = matches.get_one::<String>("value").unwrap().clone();
                result.options.push((name, value));
                i += 3;
            }
            "-ve_debug" => {
                let operands = &argv[i + 1..(i + 2).min(argv.len())];
                let matches = ve_debug_command().try_get_matches_from(operands)?;
                let spec: String = matches.get_one::<String>("spec").unwrap().clone();
                result.debug = DebugFlags::parse(&spec);
                i += 2;
            }
            other => {
                rest.push(other.to_string());
                i += 1;
            }
        }
    }
    Ok((result, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn collects_ve_opt_pairs_and_leaves_app_args() {
        let (parsed, rest) = parse(&argv(&[
            "--fullscreen",
            "-ve_opt",
            "renderer",
            "gl",
            "-ve_opt",
            "vsync",
            "1",
            "somefile.env",
        ]))
        .unwrap();
        assert_eq!(
            parsed.options,
            vec![
                ("renderer".to_string(), "gl".to_string()),
                ("vsync".to_string(), "1".to_string())
            ]
        );
        assert_eq!(rest, vec!["--fullscreen", "somefile.env"]);
    }

    #[test]
    fn ve_debug_sets_flags() {
        let (parsed, rest) = parse(&argv(&["-ve_debug", "mp,device"])).unwrap();
        assert!(parsed.debug.has(DebugFlags::MP));
        assert!(parsed.debug.has(DebugFlags::DEVICE));
        assert!(!parsed.debug.has(DebugFlags::ENV));
        assert!(rest.is_empty());
    }

    #[test]
    fn missing_operand_is_an_error() {
        assert!(parse(&argv(&["-ve_opt", "onlyname"])).is_err());
    }
}
