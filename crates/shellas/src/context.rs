//! The target security context.
//!
//! A [`SecurityContext`] is the complete description of the posture the
//! child is moved into before it executes its first own instruction. Every
//! field is optional; an absent field leaves that attribute of the child
//! untouched. Contexts are built by the CLI or by inference and are consumed
//! read-only by the launcher.

use std::fmt::Write as _;

use caps::CapsHashSet;

use crate::captext;

/// Seccomp filter profiles installable on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterProfile {
    App,
    AppZygote,
    System,
}

impl FilterProfile {
    /// Name as it appears on the command line and in the verbose dump.
    pub fn name(self) -> &'static str {
        match self {
            FilterProfile::App => "app",
            FilterProfile::AppZygote => "app-zygote",
            FilterProfile::System => "system",
        }
    }
}

impl std::fmt::Display for FilterProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Target security posture of the child.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    /// Real, effective and saved user id.
    pub user_id: Option<u32>,
    /// Real, effective and saved primary group.
    pub group_id: Option<u32>,
    /// `Some(vec![])` clears the supplementary set; `None` leaves it alone.
    pub supplementary_group_ids: Option<Vec<u32>>,
    /// SELinux domain the tracee transitions itself into.
    pub selinux_label: Option<String>,
    pub seccomp_filter: Option<FilterProfile>,
    /// Desired permitted capability set. Only the permitted subset of a
    /// parsed expression is consumed; the other subsets are ignored.
    pub capabilities: Option<CapsHashSet>,
}

impl SecurityContext {
    /// Renders the six-line dump printed by `--verbose`.
    pub fn render_dump(&self) -> String {
        let mut out = String::new();
        dump_line(&mut out, "uid", self.user_id.map(|id| id.to_string()));
        dump_line(&mut out, "gid", self.group_id.map(|id| id.to_string()));
        dump_line(
            &mut out,
            "groups",
            self.supplementary_group_ids.as_ref().map(|ids| {
                ids.iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            }),
        );
        dump_line(&mut out, "selinux", self.selinux_label.clone());
        dump_line(
            &mut out,
            "seccomp",
            self.seccomp_filter.map(|f| f.name().to_string()),
        );
        dump_line(
            &mut out,
            "caps",
            self.capabilities.as_ref().map(captext::to_text),
        );
        out
    }
}

fn dump_line(out: &mut String, field: &str, value: Option<String>) {
    let value = value.unwrap_or_else(|| "<no value>".to_string());
    // String formatting cannot fail.
    let _ = writeln!(out, "\t{field} = {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_names_match_cli_spelling() {
        assert_eq!(FilterProfile::App.name(), "app");
        assert_eq!(FilterProfile::AppZygote.name(), "app-zygote");
        assert_eq!(FilterProfile::System.name(), "system");
    }

    #[test]
    fn dump_of_empty_context() {
        let dump = SecurityContext::default().render_dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(
            lines,
            vec![
                "\tuid = <no value>",
                "\tgid = <no value>",
                "\tgroups = <no value>",
                "\tselinux = <no value>",
                "\tseccomp = <no value>",
                "\tcaps = <no value>",
            ]
        );
    }

    #[test]
    fn dump_of_populated_fields() {
        let context = SecurityContext {
            user_id: Some(10123),
            group_id: Some(10123),
            supplementary_group_ids: Some(vec![3003, 9997]),
            selinux_label: Some("u:r:untrusted_app:s0".to_string()),
            seccomp_filter: Some(FilterProfile::App),
            capabilities: None,
        };
        let dump = context.render_dump();
        assert!(dump.contains("\tuid = 10123\n"));
        assert!(dump.contains("\tgroups = 3003,9997\n"));
        assert!(dump.contains("\tselinux = u:r:untrusted_app:s0\n"));
        assert!(dump.contains("\tseccomp = app\n"));
    }

    #[test]
    fn cleared_groups_render_as_empty_value() {
        let context = SecurityContext {
            supplementary_group_ids: Some(Vec::new()),
            ..Default::default()
        };
        assert!(context.render_dump().contains("\tgroups = \n"));
    }
}
