use foundation::LatLon;

use crate::state::{EntityState, StateTable, ZONE_DOMAIN, object_id};

/// Canonical form of a zone-name hint.
///
/// Lowercases, drops a leading `zone.` prefix, folds runs of whitespace,
/// hyphens and underscores into one `_`, and keeps only `[a-z0-9_]` plus
/// lowercase Cyrillic (Russian and Belarusian letters). Separators never lead
/// or trail the result.
pub fn normalize_hint(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let body = lowered
        .strip_prefix(ZONE_PREFIX)
        .unwrap_or(lowered.as_str());

    let mut out = String::with_capacity(body.len());
    let mut pending_sep = false;
    for ch in body.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_sep = true;
            continue;
        }
        if !is_hint_char(ch) {
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.push(ch);
    }
    out
}

const ZONE_PREFIX: &str = "zone.";

fn is_hint_char(ch: char) -> bool {
    ch.is_ascii_lowercase()
        || ch.is_ascii_digit()
        || ('а'..='я').contains(&ch)
        || matches!(ch, 'ё' | 'і' | 'ў')
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneMatch<'a> {
    pub zone: &'a EntityState,
    pub position: LatLon,
}

/// Finds the first zone (in identifier order) whose id suffix, friendly name
/// or `name` attribute normalizes to the same string as `hint` and that has
/// usable coordinates.
pub fn find_zone<'a>(table: &'a StateTable, hint: &str) -> Option<ZoneMatch<'a>> {
    let wanted = normalize_hint(hint);
    if wanted.is_empty() {
        return None;
    }

    table
        .in_domain(ZONE_DOMAIN)
        .filter(|zone| zone_matches(zone, &wanted))
        .find_map(|zone| {
            zone.attributes
                .coordinate()
                .map(|position| ZoneMatch { zone, position })
        })
}

fn zone_matches(zone: &EntityState, wanted: &str) -> bool {
    let attrs = &zone.attributes;
    std::iter::once(object_id(&zone.entity_id))
        .chain(attrs.friendly_name.as_deref())
        .chain(attrs.name.as_deref())
        .any(|candidate| normalize_hint(candidate) == wanted)
}

#[cfg(test)]
mod tests {
    use super::{find_zone, normalize_hint};
    use crate::state::{Attributes, EntityState, StateTable};

    fn zone(id: &str, friendly: Option<&str>, coords: Option<(f64, f64)>) -> EntityState {
        EntityState::new(
            id,
            "0",
            Attributes {
                latitude: coords.map(|c| c.0),
                longitude: coords.map(|c| c.1),
                friendly_name: friendly.map(str::to_string),
                ..Attributes::default()
            },
        )
    }

    #[test]
    fn normalizes_case_prefix_and_separators() {
        assert_eq!(normalize_hint("  Home  "), "home");
        assert_eq!(normalize_hint("zone.Work_Office"), "work_office");
        assert_eq!(normalize_hint("Mom's  House"), "moms_house");
        assert_eq!(normalize_hint("gym - downtown"), "gym_downtown");
        assert_eq!(normalize_hint("--edge--"), "edge");
        assert_eq!(normalize_hint("Дача-Ўзлесся"), "дача_ўзлесся");
        assert_eq!(normalize_hint("!!!"), "");
    }

    #[test]
    fn matches_by_friendly_name_or_id_suffix() {
        let table: StateTable = [
            zone("zone.home", Some("Home"), Some((53.9, 27.5))),
            zone("zone.office_2", Some("Main Office"), Some((53.8, 27.6))),
        ]
        .into_iter()
        .collect();

        let hit = find_zone(&table, "main-office").unwrap();
        assert_eq!(hit.zone.entity_id, "zone.office_2");
        assert_eq!(hit.position.lat, 53.8);

        let hit = find_zone(&table, "Office 2").unwrap();
        assert_eq!(hit.zone.entity_id, "zone.office_2");

        assert!(find_zone(&table, "not_home").is_none());
        assert!(find_zone(&table, "").is_none());
    }

    #[test]
    fn skips_matching_zone_without_coordinates() {
        let table: StateTable = [
            zone("zone.a_home", Some("Home"), None),
            zone("zone.b_home", Some("Home"), Some((1.0, 2.0))),
        ]
        .into_iter()
        .collect();
        let hit = find_zone(&table, "home").unwrap();
        assert_eq!(hit.zone.entity_id, "zone.b_home");
    }
}
