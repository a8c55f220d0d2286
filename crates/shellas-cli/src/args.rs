//! Ordered option parsing.
//!
//! Options are evaluated in the order they appear on the command line, with
//! later values overriding earlier ones; `--pid` and `--profile` replace the
//! whole working context. clap collects the occurrences, and the value
//! indices are used to replay them in order.

use std::ffi::CString;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use shellas::context::{FilterProfile, SecurityContext};
use shellas::{captext, ids, infer};

pub const USAGE: &str = "\
Usage: shellas [options] [<program> <arguments>...]

shellas executes a program in a specified Android security context. The
default program that is executed if none is specified is `/system/bin/sh`.

The following options can be used to define the target security context.

--verbose, -v                      Enables verbose logging.
--uid <uid>, -u <uid>              The target real and effective user ID.
--gid <gid>, -g <gid>              The target real and effective group ID.
--groups <gid1,2,..>, -G <1,2,..>  A comma separated list of supplementary
                                   group IDs.
--nogroups                         Specifies that all supplementary groups
                                   should be cleared.
--selinux <context>, -s <context>  The target SELinux context.
--seccomp <filter>, -f <filter>    The target seccomp filter. Valid values of
                                   filter are 'none', 'uid-inferred', 'app',
                                   'app-zygote', and 'system'.
--caps <capabilities>, -c <caps>   A capability text expression that
                                   describes the desired capability sets. The
                                   only capability set that matters is the
                                   permitted set, the other sets are ignored.

                                   Examples:

                                     \"=\"                  - Clear all capabilities
                                     \"=p\"                 - Raise all capabilities
                                     \"23,CAP_SYS_ADMIN+p\" - Raise CAP_SYS_ADMIN
                                                            and capability 23.

--pid <pid>, -p <pid>              Infer the target security context from a
                                   running process with the given process ID.
                                   This option implies --seccomp uid-inferred.
                                   The capability set is inferred from the
                                   target process's permitted set.
--profile <profile>, -P <profile>  Infer the target security context from a
                                   predefined security profile. Using this
                                   option will install and execute a donor
                                   app on the device. Currently, the only
                                   valid profile is 'untrusted-app'.

Options are evaluated in the order that they are given. For example, the
following will set the target context to that of process 1234 but override
the user ID to 0:

    shellas --pid 1234 --uid 0
";

const DEFAULT_SHELL: &str = "/system/bin/sh";

/// Fully resolved invocation.
pub struct Invocation {
    pub verbose: bool,
    pub context: SecurityContext,
    pub argv: Vec<CString>,
}

pub fn command() -> Command {
    let value = |name: &'static str, short: char, long: &'static str| {
        Arg::new(name)
            .short(short)
            .long(long)
            .action(ArgAction::Append)
    };

    Command::new("shellas")
        .about("Executes a program in a specified Android security context")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .short('h')
                .long("help")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(value("uid", 'u', "uid"))
        .arg(value("gid", 'g', "gid"))
        .arg(value("groups", 'G', "groups"))
        .arg(
            Arg::new("nogroups")
                .long("nogroups")
                .action(ArgAction::Count),
        )
        .arg(value("selinux", 's', "selinux"))
        .arg(value("seccomp", 'f', "seccomp"))
        .arg(value("caps", 'c', "caps"))
        .arg(value("pid", 'p', "pid"))
        .arg(value("profile", 'P', "profile"))
        .arg(
            Arg::new("command")
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true),
        )
}

/// One option occurrence, replayed in command-line order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Directive {
    Uid(String),
    Gid(String),
    Groups(String),
    NoGroups,
    Selinux(String),
    Seccomp(String),
    Caps(String),
    Pid(String),
    Profile(String),
}

/// Resolves parsed matches into a launch invocation.
pub fn resolve(matches: &ArgMatches) -> Result<Invocation> {
    let mut context = SecurityContext::default();
    let mut infer_filter = false;

    for directive in directives(matches) {
        match directive {
            Directive::Uid(value) => {
                context.user_id =
                    Some(ids::parse_u32(&value).with_context(|| format!("--uid {value}"))?);
            }
            Directive::Gid(value) => {
                context.group_id =
                    Some(ids::parse_u32(&value).with_context(|| format!("--gid {value}"))?);
            }
            Directive::Groups(value) => {
                let groups = ids::split_ids_skip(&value, &[','], 0)
                    .with_context(|| format!("--groups {value}"))?;
                context.supplementary_group_ids = Some(groups);
            }
            Directive::NoGroups => {
                context.supplementary_group_ids = Some(Vec::new());
            }
            Directive::Selinux(value) => {
                context.selinux_label = Some(value);
            }
            Directive::Seccomp(value) => {
                infer_filter = false;
                match value.as_str() {
                    "none" => context.seccomp_filter = None,
                    "uid-inferred" => infer_filter = true,
                    "app" => context.seccomp_filter = Some(FilterProfile::App),
                    "app-zygote" => context.seccomp_filter = Some(FilterProfile::AppZygote),
                    "system" => context.seccomp_filter = Some(FilterProfile::System),
                    other => bail!("invalid value for --seccomp: {other}"),
                }
            }
            Directive::Caps(value) => {
                let permitted =
                    captext::parse(&value).with_context(|| format!("--caps {value}"))?;
                context.capabilities = Some(permitted);
            }
            Directive::Pid(value) => {
                let pid = ids::parse_u32(&value).with_context(|| format!("--pid {value}"))?;
                infer::from_process(pid as i32, &mut context)?;
                infer_filter = true;
            }
            Directive::Profile(value) => {
                infer::from_profile(&value, &mut context)?;
                infer_filter = true;
            }
        }
    }

    if infer_filter {
        let uid = context.user_id.ok_or(infer::InferError::NoUserId)?;
        context.seccomp_filter = Some(infer::filter_for_uid(uid));
    }

    let argv = command_argv(matches)?;

    Ok(Invocation {
        verbose: matches.get_flag("verbose"),
        context,
        argv,
    })
}

/// Collects all option occurrences with their argv indices and replays them
/// in order.
fn directives(matches: &ArgMatches) -> Vec<Directive> {
    let mut ordered: Vec<(usize, Directive)> = Vec::new();

    let mut collect = |name: &str, make: fn(String) -> Directive| {
        if let (Some(values), Some(indices)) = (
            matches.get_many::<String>(name),
            matches.indices_of(name),
        ) {
            for (value, index) in values.zip(indices) {
                ordered.push((index, make(value.clone())));
            }
        }
    };

    collect("uid", Directive::Uid);
    collect("gid", Directive::Gid);
    collect("groups", Directive::Groups);
    collect("selinux", Directive::Selinux);
    collect("seccomp", Directive::Seccomp);
    collect("caps", Directive::Caps);
    collect("pid", Directive::Pid);
    collect("profile", Directive::Profile);

    if matches.get_count("nogroups") > 0 {
        if let Some(indices) = matches.indices_of("nogroups") {
            for index in indices {
                ordered.push((index, Directive::NoGroups));
            }
        }
    }

    ordered.sort_by_key(|(index, _)| *index);
    ordered.into_iter().map(|(_, directive)| directive).collect()
}

fn command_argv(matches: &ArgMatches) -> Result<Vec<CString>> {
    let words: Vec<&String> = matches
        .get_many::<String>("command")
        .map(|values| values.collect())
        .unwrap_or_default();

    if words.is_empty() {
        return Ok(vec![CString::new(DEFAULT_SHELL).expect("static path")]);
    }
    words
        .into_iter()
        .map(|word| {
            CString::new(word.as_str()).map_err(|_| anyhow!("argument contains a NUL byte"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_line(line: &[&str]) -> Result<Invocation> {
        let matches = command().try_get_matches_from(line)?;
        resolve(&matches)
    }

    #[test]
    fn identity_options_populate_only_their_fields() {
        let invocation = resolve_line(&["shellas", "--uid", "10123", "--gid", "10123"]).unwrap();
        assert_eq!(invocation.context.user_id, Some(10123));
        assert_eq!(invocation.context.group_id, Some(10123));
        assert!(invocation.context.supplementary_group_ids.is_none());
        assert!(invocation.context.selinux_label.is_none());
        assert!(invocation.context.seccomp_filter.is_none());
        assert!(invocation.context.capabilities.is_none());
    }

    #[test]
    fn later_values_override_earlier_ones() {
        let invocation = resolve_line(&["shellas", "-u", "1", "-u", "2"]).unwrap();
        assert_eq!(invocation.context.user_id, Some(2));
    }

    #[test]
    fn nogroups_clears_a_previous_group_list() {
        let invocation =
            resolve_line(&["shellas", "--groups", "1,2,3", "--nogroups"]).unwrap();
        assert_eq!(invocation.context.supplementary_group_ids, Some(Vec::new()));
    }

    #[test]
    fn groups_after_nogroups_win() {
        let invocation =
            resolve_line(&["shellas", "--nogroups", "--groups", "7,8"]).unwrap();
        assert_eq!(
            invocation.context.supplementary_group_ids,
            Some(vec![7, 8])
        );
    }

    #[test]
    fn uid_inferred_filter_resolves_after_parsing() {
        let invocation =
            resolve_line(&["shellas", "--uid", "10200", "--seccomp", "uid-inferred"]).unwrap();
        assert_eq!(
            invocation.context.seccomp_filter,
            Some(FilterProfile::App)
        );

        let invocation =
            resolve_line(&["shellas", "--seccomp", "uid-inferred", "--uid", "1000"]).unwrap();
        assert_eq!(
            invocation.context.seccomp_filter,
            Some(FilterProfile::System)
        );
    }

    #[test]
    fn uid_inferred_without_uid_fails() {
        assert!(resolve_line(&["shellas", "--seccomp", "uid-inferred"]).is_err());
    }

    #[test]
    fn explicit_filter_after_inference_request_wins() {
        let invocation = resolve_line(&[
            "shellas", "--seccomp", "uid-inferred", "--seccomp", "app-zygote",
        ])
        .unwrap();
        assert_eq!(
            invocation.context.seccomp_filter,
            Some(FilterProfile::AppZygote)
        );
    }

    #[test]
    fn seccomp_none_clears_the_filter() {
        let invocation =
            resolve_line(&["shellas", "--seccomp", "app", "--seccomp", "none"]).unwrap();
        assert!(invocation.context.seccomp_filter.is_none());
    }

    #[test]
    fn invalid_seccomp_value_is_rejected() {
        assert!(resolve_line(&["shellas", "--seccomp", "zygote"]).is_err());
    }

    #[test]
    fn caps_expression_is_parsed() {
        let invocation = resolve_line(&["shellas", "--caps", "=p"]).unwrap();
        assert_eq!(
            invocation.context.capabilities,
            Some(captext::parse("=p").unwrap())
        );
        assert!(!invocation.context.capabilities.unwrap().is_empty());

        let invocation = resolve_line(&["shellas", "--caps", "="]).unwrap();
        assert_eq!(invocation.context.capabilities.unwrap().len(), 0);
    }

    #[test]
    fn missing_command_defaults_to_the_shell() {
        let invocation = resolve_line(&["shellas", "--uid", "0"]).unwrap();
        assert_eq!(
            invocation.argv,
            vec![CString::new("/system/bin/sh").unwrap()]
        );
    }

    #[test]
    fn trailing_words_become_the_command() {
        let invocation =
            resolve_line(&["shellas", "-u", "0", "/system/bin/id", "-u"]).unwrap();
        assert_eq!(
            invocation.argv,
            vec![
                CString::new("/system/bin/id").unwrap(),
                CString::new("-u").unwrap(),
            ]
        );
    }

    #[test]
    fn malformed_ids_are_parse_errors() {
        assert!(resolve_line(&["shellas", "--uid", "12x"]).is_err());
        assert!(resolve_line(&["shellas", "--groups", "1,x"]).is_err());
    }
}
