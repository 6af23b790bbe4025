//! Entity classification for fetched datasets.
//!
//! Given a source name, an optional explicit override and the dataset's
//! column names, decide which logical entity the dataset represents. The
//! rules form an explicit ordered list; the first match wins, so adding a
//! rule never changes the outcome for data the earlier rules already cover.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::types::Entity;

/// Source-name synonyms, checked after the explicit override.
const NAME_SYNONYMS: [(&str, Entity); 9] = [
    ("sales", Entity::Sales),
    ("orders", Entity::Sales),
    ("users", Entity::Users),
    ("user", Entity::Users),
    ("products", Entity::Products),
    ("product", Entity::Products),
    ("customers", Entity::Customers),
    ("clients", Entity::Customers),
    ("customer", Entity::Customers),
];

/// Column signatures, checked in priority order after the name synonyms.
const SIGNATURES: [(&[&str], Entity); 4] = [
    (&["order_id", "amount"], Entity::Sales),
    (&["customer_id", "country"], Entity::Customers),
    (&["id", "firstname", "email"], Entity::Users),
    (&["id", "title", "price"], Entity::Products),
];

/// Classify a dataset by explicit override, source name, then column
/// signature.
pub fn classify(name: &str, columns: &[String], explicit_target: Option<&str>) -> Entity {
    // Rule 1: explicit override always wins.
    if let Some(target) = explicit_target {
        if !target.trim().is_empty() {
            match Entity::from_label(target) {
                Some(entity) => {
                    debug!("Source '{}' classified as {} by explicit target", name, entity);
                    return entity;
                }
                None => {
                    warn!(
                        "Source '{}' has unrecognized explicit target '{}', falling back to heuristics",
                        name, target
                    );
                }
            }
        }
    }

    // Rule 2: source name synonym.
    let name_lower = name.trim().to_lowercase();
    for (synonym, entity) in NAME_SYNONYMS {
        if name_lower == synonym {
            debug!("Source '{}' classified as {} by source name", name, entity);
            return entity;
        }
    }

    // Rule 3: column signature.
    let column_set: HashSet<String> = columns.iter().map(|c| c.to_lowercase()).collect();
    for (signature, entity) in SIGNATURES {
        if signature.iter().all(|c| column_set.contains(*c)) {
            debug!("Source '{}' classified as {} by column signature", name, entity);
            return entity;
        }
    }

    debug!("Source '{}' entity undetermined", name);
    Entity::Unknown
}

/// Permissive name-substring fallback for API sources.
///
/// Applies only when classification came back undetermined; a positive
/// classification is never overridden.
pub fn with_api_fallback(name: &str, entity: Entity) -> Entity {
    if entity != Entity::Unknown {
        return entity;
    }
    let name_lower = name.to_lowercase();
    let fallback = if name_lower.contains("sale") || name_lower.contains("order") {
        Entity::Sales
    } else if name_lower.contains("user") {
        Entity::Users
    } else if name_lower.contains("product") {
        Entity::Products
    } else {
        Entity::Unknown
    };
    if fallback != Entity::Unknown {
        debug!("Source '{}' classified as {} by api name substring", name, fallback);
    }
    fallback
}
