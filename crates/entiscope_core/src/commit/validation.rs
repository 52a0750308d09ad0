//! Commit-time checks of a commit set.

use crate::commit::agent::CommitEntry;
use crate::data::{DataManager, OperationContext};
use crate::entity::{EntityId, RecordState};
use crate::error::{CoreError, CoreResult};
use crate::relation::RelationEndpointId;
use std::sync::Arc;

/// Checks every entry of a commit set. The first failure aborts.
///
/// Deleted records only get the timestamp check; new records have no
/// stored counterpart to compare against.
pub(crate) fn validate(
    data: &mut DataManager,
    ctx: &mut OperationContext<'_>,
    entries: &[CommitEntry],
) -> CoreResult<()> {
    for entry in entries {
        if entry.state != RecordState::Deleted {
            if data.config.validate_property_nullability {
                check_nullability(data, entry.id)?;
            }
            if data.config.validate_mandatory_relations {
                check_mandatory_relations(data, ctx, entry.id)?;
            }
        }
        if entry.state != RecordState::New {
            check_timestamp(data, ctx, entry.id)?;
        }
    }
    Ok(())
}

fn check_nullability(data: &DataManager, id: EntityId) -> CoreResult<()> {
    let class = data.metadata().require_class(id.class())?;
    let record = data.record(id).ok_or(CoreError::NotFound { id })?;
    let missing = class
        .properties()
        .iter()
        .enumerate()
        .find(|(slot, p)| !p.is_nullable() && p.relation().is_none() && record.value(*slot).is_null());
    match missing {
        Some((_, property)) => Err(CoreError::MandatoryProperty {
            id,
            property: property.name().to_string(),
        }),
        None => Ok(()),
    }
}

fn check_mandatory_relations(
    data: &mut DataManager,
    ctx: &mut OperationContext<'_>,
    id: EntityId,
) -> CoreResult<()> {
    let metadata = Arc::clone(&data.metadata);
    let class = metadata.require_class(id.class())?;
    for def_id in class.endpoints() {
        let definition = metadata.require_endpoint(*def_id)?;
        if !definition.is_mandatory() {
            continue;
        }
        let is_empty = match definition.foreign_key_slot() {
            Some(slot) => data
                .record(id)
                .map_or(true, |r| r.value(slot).as_reference().is_none()),
            None => {
                let endpoint_id = RelationEndpointId::new(id, *def_id);
                data.load_endpoint(ctx, endpoint_id)?;
                data.endpoint(endpoint_id)
                    .map_or(true, |e| e.related_ids(data.records()).is_empty())
            }
        };
        if is_empty {
            return Err(CoreError::mandatory_relation(id, definition.property()));
        }
    }
    Ok(())
}

fn check_timestamp(
    data: &DataManager,
    ctx: &mut OperationContext<'_>,
    id: EntityId,
) -> CoreResult<()> {
    let loaded = data.record(id).and_then(|r| r.timestamp());
    let current = ctx.loader.current_timestamp(id)?;
    if loaded != current {
        return Err(CoreError::ConcurrencyViolation { id });
    }
    Ok(())
}
