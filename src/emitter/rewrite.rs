//! Entity-rewrite and loopback-replacement helpers, spec §4.7.

use crate::model::EntityInfo;

/// One `(match, replace_field, action)` tuple applied in order before
/// emission. `field` names which entity field is inspected for the match;
/// `replace_field` names which field the replacement is written into.
#[derive(Debug, Clone)]
pub struct EntityRewrite {
    pub field: RewriteField,
    pub matches: String,
    pub replace_field: RewriteField,
    pub replacement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteField {
    Name,
    DisplayName,
}

impl EntityRewrite {
    fn read(&self, entity: &EntityInfo, field: RewriteField) -> Option<String> {
        match field {
            RewriteField::Name => Some(entity.name.clone()),
            RewriteField::DisplayName => entity.display_name.clone(),
        }
    }

    fn write(&self, entity: &mut EntityInfo, field: RewriteField, value: String) {
        match field {
            RewriteField::Name => entity.name = value,
            RewriteField::DisplayName => entity.display_name = Some(value),
        }
    }
}

/// Applies every rewrite in order, then replaces loopback references
/// (`localhost`, `127.0.0.1`, `::1`) in the entity name with `short_name`
/// (spec §4.7 "Entity-rewrite application").
pub fn apply_rewrites(entity: &mut EntityInfo, rewrites: &[EntityRewrite], short_name: &str) {
    for rewrite in rewrites {
        if rewrite.read(entity, rewrite.field).as_deref() == Some(rewrite.matches.as_str()) {
            rewrite.write(entity, rewrite.replace_field, rewrite.replacement.clone());
        }
    }
    replace_loopback(entity, short_name);
}

const LOOPBACK_REFERENCES: &[&str] = &["localhost", "127.0.0.1", "::1"];

fn replace_loopback(entity: &mut EntityInfo, short_name: &str) {
    if LOOPBACK_REFERENCES.contains(&entity.name.as_str()) {
        entity.name = short_name.to_string();
    }
    if let Some(display_name) = &entity.display_name {
        if LOOPBACK_REFERENCES.contains(&display_name.as_str()) {
            entity.display_name = Some(short_name.to_string());
        }
    }
}
