use crate::identity::{match_identity, resolve_profile_name};
use crate::models::{AppMode, CurrentIdentity, DashboardSnapshot, Profile};
use sha2::{Digest, Sha256};

/// The canonical in-memory model: the last reconciled snapshot plus the view
/// state derived from it. Always replaced wholesale, never patched in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardModel {
    pub snapshot: DashboardSnapshot,
    /// Display order. Starts equal to `snapshot.profiles`; the order queue may
    /// permute it optimistically while a save is in flight.
    pub display_profiles: Vec<Profile>,
    pub selected: Option<String>,
    /// Profile the live identity of the reconciled mode resolves to.
    pub current_profile: Option<String>,
    pub signature: String,
}

impl DashboardModel {
    pub fn display_names(&self) -> Vec<String> {
        self.display_profiles
            .iter()
            .map(|profile| profile.name.clone())
            .collect()
    }

    /// Same model with `display_profiles` permuted to `names`. Unknown names are
    /// ignored and profiles missing from `names` keep their relative order at
    /// the end. The signature is left untouched: it describes the last
    /// reconciled snapshot, not the optimistic view.
    pub fn with_display_order(&self, names: &[String]) -> Self {
        let mut remaining = self.display_profiles.clone();
        let mut ordered = Vec::with_capacity(remaining.len());
        for name in names {
            if let Some(index) = remaining.iter().position(|profile| &profile.name == name) {
                ordered.push(remaining.remove(index));
            }
        }
        ordered.extend(remaining);
        Self {
            display_profiles: ordered,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext<'a> {
    pub mode: AppMode,
    pub remembered: Option<&'a str>,
    /// Back-fill absent fields from the previous model (silent polls).
    pub preserve_quota: bool,
}

pub fn snapshot_signature(snapshot: &DashboardSnapshot) -> String {
    let serialized = serde_json::to_vec(snapshot).unwrap_or_default();
    let digest = Sha256::digest(&serialized);
    hex::encode(digest)
}

fn pick<T: Clone>(next: &Option<T>, previous: &Option<T>) -> Option<T> {
    next.clone().or_else(|| previous.clone())
}

fn overwrite_quota_from_identity(profile: &mut Profile, current: &CurrentIdentity) {
    profile.five_hour_remaining_percent = current.five_hour_remaining_percent;
    profile.five_hour_resets_at = current.five_hour_resets_at;
    profile.one_week_remaining_percent = current.one_week_remaining_percent;
    profile.one_week_resets_at = current.one_week_resets_at;
    if current.checked_at.is_some() {
        profile.last_checked_at = current.checked_at.clone();
    }
}

fn backfill_profile(profile: &mut Profile, previous: &Profile) {
    profile.five_hour_remaining_percent = pick(
        &profile.five_hour_remaining_percent,
        &previous.five_hour_remaining_percent,
    );
    profile.five_hour_resets_at = pick(&profile.five_hour_resets_at, &previous.five_hour_resets_at);
    profile.one_week_remaining_percent = pick(
        &profile.one_week_remaining_percent,
        &previous.one_week_remaining_percent,
    );
    profile.one_week_resets_at = pick(&profile.one_week_resets_at, &previous.one_week_resets_at);
    profile.last_checked_at = pick(&profile.last_checked_at, &previous.last_checked_at);
    profile.last_error = pick(&profile.last_error, &previous.last_error);
}

fn backfill_identity(current: &mut CurrentIdentity, previous: &CurrentIdentity) {
    current.five_hour_remaining_percent = pick(
        &current.five_hour_remaining_percent,
        &previous.five_hour_remaining_percent,
    );
    current.five_hour_resets_at = pick(&current.five_hour_resets_at, &previous.five_hour_resets_at);
    current.one_week_remaining_percent = pick(
        &current.one_week_remaining_percent,
        &previous.one_week_remaining_percent,
    );
    current.one_week_resets_at = pick(&current.one_week_resets_at, &previous.one_week_resets_at);
    current.checked_at = pick(&current.checked_at, &previous.checked_at);
}

/// The profile that represents `mode` when nothing more specific is known:
/// the remembered one, then (GPT only) the backend's active profile, then the
/// first profile that supports the mode.
pub fn mode_active_profile(
    snapshot: &DashboardSnapshot,
    mode: AppMode,
    remembered: Option<&str>,
) -> Option<String> {
    let supported = |name: &str| {
        snapshot
            .profile(name)
            .is_some_and(|profile| profile.support.supports(mode))
    };
    if let Some(name) = remembered.filter(|name| supported(name)) {
        return Some(name.to_string());
    }
    if mode == AppMode::Gpt {
        if let Some(name) = snapshot.active_profile.as_deref().filter(|name| supported(name)) {
            return Some(name.to_string());
        }
    }
    snapshot
        .profiles
        .iter()
        .find(|profile| profile.support.supports(mode))
        .map(|profile| profile.name.clone())
}

pub fn reconcile(
    incoming: DashboardSnapshot,
    previous: Option<&DashboardModel>,
    ctx: ReconcileContext<'_>,
) -> DashboardModel {
    let mut snapshot = incoming;

    let matched = snapshot
        .identity(ctx.mode)
        .and_then(|current| {
            match_identity(&snapshot.profiles, current).map(|name| (name.to_string(), current.clone()))
        });
    if let Some((name, current)) = matched {
        if let Some(profile) = snapshot.profiles.iter_mut().find(|p| p.name == name) {
            overwrite_quota_from_identity(profile, &current);
        }
    }

    if ctx.preserve_quota {
        if let Some(previous) = previous {
            for profile in snapshot.profiles.iter_mut() {
                if let Some(old) = previous.snapshot.profile(&profile.name) {
                    backfill_profile(profile, old);
                }
            }
            if let (Some(current), Some(old)) = (
                snapshot.identities[ctx.mode].as_mut(),
                previous.snapshot.identity(ctx.mode),
            ) {
                backfill_identity(current, old);
            }
        }
    }

    let selected = previous
        .and_then(|model| model.selected.as_deref())
        .filter(|name| snapshot.contains(name))
        .map(str::to_string)
        .or_else(|| mode_active_profile(&snapshot, ctx.mode, ctx.remembered))
        .or_else(|| snapshot.profiles.first().map(|profile| profile.name.clone()));

    let current_profile = resolve_profile_name(
        &snapshot.profiles,
        snapshot.identity(ctx.mode),
        ctx.remembered,
        snapshot.active_profile.as_deref(),
    );

    let signature = snapshot_signature(&snapshot);
    DashboardModel {
        display_profiles: snapshot.profiles.clone(),
        snapshot,
        selected,
        current_profile,
        signature,
    }
}
