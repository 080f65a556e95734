//! Best-effort coordinate resolution.
//!
//! Resolution is a fixed chain of pure strategies tried in order; the first
//! one that yields a valid coordinate wins. Only `person` entities go past the
//! direct-attribute step.

use foundation::LatLon;
use serde::Serialize;

use crate::state::{EntityState, PERSON_DOMAIN, StateTable, in_domain};
use crate::zones::find_zone;

/// Which link of the chain produced the coordinate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedVia {
    Direct,
    Source,
    Zone,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Resolution {
    pub position: LatLon,
    pub via: ResolvedVia,
}

type Strategy = fn(&StateTable, &EntityState) -> Option<LatLon>;

struct Link {
    via: ResolvedVia,
    person_only: bool,
    run: Strategy,
}

const CHAIN: [Link; 3] = [
    Link {
        via: ResolvedVia::Direct,
        person_only: false,
        run: direct,
    },
    Link {
        via: ResolvedVia::Source,
        person_only: true,
        run: via_source,
    },
    Link {
        via: ResolvedVia::Zone,
        person_only: true,
        run: via_zone,
    },
];

pub fn resolve(table: &StateTable, entity: &EntityState) -> Option<LatLon> {
    resolve_detailed(table, entity).map(|r| r.position)
}

pub fn resolve_detailed(table: &StateTable, entity: &EntityState) -> Option<Resolution> {
    let is_person = in_domain(&entity.entity_id, PERSON_DOMAIN);
    let resolution = CHAIN
        .iter()
        .filter(|link| is_person || !link.person_only)
        .find_map(|link| {
            (link.run)(table, entity).map(|position| Resolution {
                position,
                via: link.via,
            })
        });

    if resolution.is_none() {
        tracing::trace!(entity = %entity.entity_id, "no coordinate resolved");
    }
    resolution
}

/// Coordinates from the entity's own `latitude`/`longitude`.
pub fn direct(_table: &StateTable, entity: &EntityState) -> Option<LatLon> {
    entity.attributes.coordinate()
}

/// Coordinates of the entity named by `source` (or `entity_id`). One hop only.
pub fn via_source(table: &StateTable, entity: &EntityState) -> Option<LatLon> {
    let attrs = &entity.attributes;
    [attrs.source.as_deref(), attrs.entity_id.as_deref()]
        .into_iter()
        .flatten()
        .filter_map(|reference| table.lookup(reference))
        .filter(|target| target.entity_id != entity.entity_id)
        .find_map(|target| target.attributes.coordinate())
}

/// Coordinates of a zone named by the primary value or the `zone` attribute.
pub fn via_zone(table: &StateTable, entity: &EntityState) -> Option<LatLon> {
    [Some(entity.state.as_str()), entity.attributes.zone.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|hint| find_zone(table, hint))
        .map(|hit| hit.position)
}
