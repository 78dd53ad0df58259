use crate::models::{CurrentIdentity, Profile};

pub fn normalize_identity_value(value: Option<&str>) -> Option<String> {
    let text = value.unwrap_or_default().trim().to_lowercase();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn workspace_name_of<'a>(workspace_name: Option<&'a str>, display_workspace: &'a str) -> Option<&'a str> {
    workspace_name.or(Some(display_workspace))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct IdentityKey {
    workspace_id: Option<String>,
    workspace_name: Option<String>,
    email: Option<String>,
}

impl IdentityKey {
    fn of_profile(profile: &Profile) -> Self {
        Self {
            workspace_id: normalize_identity_value(profile.workspace_id.as_deref()),
            workspace_name: normalize_identity_value(workspace_name_of(
                profile.workspace_name.as_deref(),
                &profile.display_workspace,
            )),
            email: normalize_identity_value(profile.email.as_deref()),
        }
    }

    fn of_current(current: &CurrentIdentity) -> Self {
        Self {
            workspace_id: normalize_identity_value(current.workspace_id.as_deref()),
            workspace_name: normalize_identity_value(workspace_name_of(
                current.workspace_name.as_deref(),
                &current.display_workspace,
            )),
            email: normalize_identity_value(current.email.as_deref()),
        }
    }
}

fn same(wanted: &Option<String>, candidate: &Option<String>) -> bool {
    matches!((wanted, candidate), (Some(a), Some(b)) if a == b)
}

#[derive(Default)]
struct Tally<'a> {
    count: usize,
    name: Option<&'a str>,
}

impl<'a> Tally<'a> {
    fn hit(&mut self, name: &'a str) {
        self.count += 1;
        self.name = Some(name);
    }

    fn unique(&self) -> Option<&'a str> {
        if self.count == 1 {
            self.name
        } else {
            None
        }
    }
}

/// Returns the one profile the live identity unambiguously belongs to.
///
/// Rules are tried strongest first: workspace id + email, workspace id,
/// workspace name + email, workspace name, email. A rule only wins when exactly
/// one profile satisfies it; ties fall through to the next rule.
pub fn match_identity<'a>(profiles: &'a [Profile], current: &CurrentIdentity) -> Option<&'a str> {
    let wanted = IdentityKey::of_current(current);
    let mut id_and_email = Tally::default();
    let mut id_only = Tally::default();
    let mut name_and_email = Tally::default();
    let mut name_only = Tally::default();
    let mut email_only = Tally::default();

    for profile in profiles {
        let key = IdentityKey::of_profile(profile);
        let name = profile.name.as_str();
        let id_hit = same(&wanted.workspace_id, &key.workspace_id);
        let name_hit = same(&wanted.workspace_name, &key.workspace_name);
        let email_hit = same(&wanted.email, &key.email);

        if id_hit && email_hit {
            id_and_email.hit(name);
        }
        if id_hit {
            id_only.hit(name);
        }
        if name_hit && email_hit {
            name_and_email.hit(name);
        }
        if name_hit {
            name_only.hit(name);
        }
        if email_hit {
            email_only.hit(name);
        }
    }

    id_and_email
        .unique()
        .or_else(|| id_only.unique())
        .or_else(|| name_and_email.unique())
        .or_else(|| name_only.unique())
        .or_else(|| email_only.unique())
}

/// Best profile name for the live identity, falling back to the remembered
/// profile and then to the backend's own active profile.
pub fn resolve_profile_name(
    profiles: &[Profile],
    current: Option<&CurrentIdentity>,
    remembered: Option<&str>,
    active_profile: Option<&str>,
) -> Option<String> {
    let fallback = || remembered.or(active_profile).map(str::to_string);
    let Some(current) = current else {
        return fallback();
    };
    match_identity(profiles, current)
        .map(str::to_string)
        .or_else(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, ws: Option<&str>, ws_name: Option<&str>, email: Option<&str>) -> Profile {
        Profile {
            name: name.to_string(),
            workspace_id: ws.map(str::to_string),
            workspace_name: ws_name.map(str::to_string),
            email: email.map(str::to_string),
            ..Default::default()
        }
    }

    fn current(ws: Option<&str>, ws_name: Option<&str>, email: Option<&str>) -> CurrentIdentity {
        CurrentIdentity {
            workspace_id: ws.map(str::to_string),
            workspace_name: ws_name.map(str::to_string),
            email: email.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn no_identity_prefers_remembered_then_active() {
        let profiles = vec![profile("a", Some("w1"), None, None)];
        assert_eq!(
            resolve_profile_name(&profiles, None, Some("r"), Some("act")).as_deref(),
            Some("r")
        );
        assert_eq!(
            resolve_profile_name(&profiles, None, None, Some("act")).as_deref(),
            Some("act")
        );
        assert_eq!(resolve_profile_name(&profiles, None, None, None), None);
    }

    #[test]
    fn workspace_and_email_beats_partial_matches() {
        let profiles = vec![
            profile("a", Some("w1"), None, Some("x@example.com")),
            profile("b", Some("w1"), None, Some("y@example.com")),
            profile("c", Some("w2"), None, Some("y@example.com")),
        ];
        let live = current(Some(" W1 "), None, Some("Y@Example.com"));
        assert_eq!(
            resolve_profile_name(&profiles, Some(&live), Some("a"), Some("c")).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn ambiguous_workspace_falls_back() {
        let profiles = vec![
            profile("A", Some("w1"), None, None),
            profile("B", Some("w1"), None, None),
        ];
        let live = current(Some("w1"), None, None);
        assert_eq!(match_identity(&profiles, &live), None);
        assert_eq!(
            resolve_profile_name(&profiles, Some(&live), Some("remembered"), Some("A")).as_deref(),
            Some("remembered")
        );
        assert_eq!(
            resolve_profile_name(&profiles, Some(&live), None, Some("active")).as_deref(),
            Some("active")
        );
    }

    #[test]
    fn unique_workspace_id_wins_without_email() {
        let profiles = vec![
            profile("a", Some("w1"), None, Some("x@example.com")),
            profile("b", Some("w2"), None, Some("x@example.com")),
        ];
        let live = current(Some("w2"), None, None);
        assert_eq!(match_identity(&profiles, &live), Some("b"));
    }

    #[test]
    fn workspace_name_rules_apply_when_id_absent() {
        let profiles = vec![
            profile("a", None, Some("Team"), Some("x@example.com")),
            profile("b", None, Some("team"), Some("y@example.com")),
            profile("c", None, Some("Solo"), Some("y@example.com")),
        ];
        assert_eq!(
            match_identity(&profiles, &current(None, Some("TEAM"), Some("y@example.com"))),
            Some("b")
        );
        assert_eq!(
            match_identity(&profiles, &current(None, Some("solo"), None)),
            Some("c")
        );
        assert_eq!(match_identity(&profiles, &current(None, Some("team"), None)), None);
    }

    #[test]
    fn email_alone_is_last_resort() {
        let profiles = vec![
            profile("a", None, None, Some("x@example.com")),
            profile("b", None, None, Some("y@example.com")),
        ];
        assert_eq!(
            match_identity(&profiles, &current(Some("unknown"), None, Some("x@example.com"))),
            Some("a")
        );
    }

    #[test]
    fn blank_values_never_match() {
        let profiles = vec![profile("a", Some("  "), None, Some(""))];
        let live = current(Some(""), None, Some("   "));
        assert_eq!(match_identity(&profiles, &live), None);
        assert_eq!(normalize_identity_value(Some("  Mixed ")).as_deref(), Some("mixed"));
        assert_eq!(normalize_identity_value(Some(" ")), None);
    }

    #[test]
    fn display_workspace_stands_in_for_missing_name() {
        let mut only = profile("a", None, None, None);
        only.display_workspace = "Team".to_string();
        let live = CurrentIdentity {
            display_workspace: "team".to_string(),
            ..Default::default()
        };
        assert_eq!(match_identity(&[only], &live), Some("a"));
    }

    #[test]
    fn blank_workspace_name_does_not_fall_back_to_display_name() {
        let mut blank = profile("a", None, Some("  "), None);
        blank.display_workspace = "Team".to_string();
        let live = current(None, Some("team"), None);
        assert_eq!(match_identity(std::slice::from_ref(&blank), &live), None);

        let mut unnamed = profile("b", None, None, None);
        unnamed.display_workspace = "Team".to_string();
        assert_eq!(match_identity(&[blank, unnamed], &live), Some("b"));
    }
}
