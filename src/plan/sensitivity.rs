// ABOUTME: Field-sensitivity table: which changed fields can be applied in place.
// ABOUTME: Anything not listed as in-place forces a destroy and re-create.

use crate::types::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    InPlace,
    Replace,
}

/// Field groups the runtime can change without replacing the resource.
fn in_place_fields(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Service => &["env", "restart", "replicas", "labels", "depends_on"],
        ResourceKind::ProxyRoute => &["domain", "upstream", "proxy", "email", "dns", "path"],
        ResourceKind::ImageLayer | ResourceKind::Network | ResourceKind::Volume => &[],
    }
}

pub fn classify_field(kind: ResourceKind, group: &str) -> Change {
    if in_place_fields(kind).contains(&group) {
        Change::InPlace
    } else {
        Change::Replace
    }
}

/// A set of changed field groups needs replacement if any single one does.
pub fn classify<'a>(kind: ResourceKind, groups: impl IntoIterator<Item = &'a str>) -> Change {
    if groups
        .into_iter()
        .any(|g| classify_field(kind, g) == Change::Replace)
    {
        Change::Replace
    } else {
        Change::InPlace
    }
}
